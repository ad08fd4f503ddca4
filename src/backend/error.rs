//! Error types for tool backend sessions and the registry.

/// Errors surfaced by backend sessions and the tool registry.
///
/// These are in-band failures from the orchestrator's point of view: the
/// invoker renders them into tool-message content so the model can react
/// within its round budget.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend '{backend}' exited while the call was in flight")]
    BackendCrashed { backend: String },

    #[error("backend '{backend}' is not available")]
    BackendUnavailable { backend: String },

    #[error("no tool named '{0}' is registered")]
    UnknownTool(String),

    #[error("{0}")]
    ToolFailed(String),

    #[error("registry is shutting down")]
    Shutdown,

    #[error("failed to spawn backend '{backend}': {reason}")]
    SpawnFailed { backend: String, reason: String },

    #[error("backend '{backend}' did not answer list_tools within {timeout_secs}s")]
    ListToolsTimeout { backend: String, timeout_secs: u64 },
}

pub type BackendResult<T> = Result<T, BackendError>;
