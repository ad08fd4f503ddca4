//! Configuration types and validation.
//!
//! Values come from CLI flags or environment variables (see `main.rs`);
//! invalid configuration is fatal at startup.

use std::{path::PathBuf, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid upstream base URL '{0}': must start with http:// or https://")]
    InvalidUpstreamUrl(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,

    /// Base URL of the OpenAI-compatible upstream gateway.
    pub upstream_base_url: String,
    /// Sent as `Authorization: Bearer ...` upstream; when unset, the client's
    /// own Authorization header is forwarded instead.
    pub upstream_api_key: Option<String>,

    pub max_tool_rounds: usize,
    pub tool_execution_timeout: Duration,
    pub enable_hybrid_streaming: bool,

    pub request_timeout: Duration,
    pub max_connections: usize,
    pub max_keepalive_connections: usize,

    /// Backend list file; absent file means an empty catalog.
    pub backends_config: PathBuf,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            debug: false,
            upstream_base_url: "http://localhost:4000".to_string(),
            upstream_api_key: None,
            max_tool_rounds: 5,
            tool_execution_timeout: Duration::from_secs(30),
            enable_hybrid_streaming: false,
            request_timeout: Duration::from_secs(300),
            max_connections: 100,
            max_keepalive_connections: 20,
            backends_config: PathBuf::from("config/backends.yaml"),
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.upstream_base_url.starts_with("http://")
            && !self.upstream_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidUpstreamUrl(
                self.upstream_base_url.clone(),
            ));
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_tool_rounds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.tool_execution_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "tool_execution_timeout".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.max_keepalive_connections > self.max_connections {
            return Err(ConfigError::InvalidValue {
                field: "max_keepalive_connections".to_string(),
                reason: "must not exceed max_connections".to_string(),
            });
        }
        Ok(())
    }

    /// Upstream chat-completions endpoint.
    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.upstream_base_url.trim_end_matches('/')
        )
    }

    /// Upstream URL for an arbitrary forwarded path.
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!(
            "{}{}",
            self.upstream_base_url.trim_end_matches('/'),
            path_and_query
        )
    }
}
