// Protocol definitions for the OpenAI-compatible surface this proxy fronts.

pub mod chat;
