//! Tool backend subsystem: child-process tool servers speaking a
//! line-delimited JSON protocol over stdio, plus the registry that owns them.

pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;

pub use config::{BackendDescriptor, BackendsConfig};
pub use error::{BackendError, BackendResult};
pub use registry::{ToolDispatch, ToolRegistry};
