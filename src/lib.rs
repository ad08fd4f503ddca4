//! Reverse proxy in front of an OpenAI-compatible inference gateway.
//!
//! Chat-completion requests flow through a bounded tool-calling loop: when
//! the model asks for tools served by configured backend processes, the
//! proxy executes them, feeds the results back, and returns one synthesized
//! answer while preserving the wire contract the client expects. Streaming
//! clients get either a verbatim relay of the upstream SSE stream or, with
//! hybrid streaming enabled, a streamed final answer after the tool rounds.

pub mod app_context;
pub mod backend;
pub mod config;
pub mod hooks;
pub mod observability;
pub mod protocols;
pub mod routers;
pub mod server;
