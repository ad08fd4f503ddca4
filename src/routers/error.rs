//! Proxy-level error types and their HTTP surfacing.
//!
//! Tool failures are in-band (they become tool-message content the model can
//! see); the errors here are out-of-band transport and protocol failures
//! that surface as HTTP errors to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Non-2xx from upstream. Relayed to the client with the same status and
    /// body.
    #[error("upstream returned {status}")]
    UpstreamHttp { status: StatusCode, body: String },

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    /// Upstream stream ended before the `[DONE]` sentinel with nothing
    /// reassembled.
    #[error("upstream stream truncated before [DONE]")]
    UpstreamTruncated,

    #[error("upstream sent a malformed response: {0}")]
    UpstreamMalformed(String),

    /// Overall request budget expired.
    #[error("request timed out")]
    RequestTimeout,
}

pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::RequestTimeout
        } else {
            ProxyError::UpstreamTransport(err.to_string())
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::UpstreamHttp { status, body } => (status, body).into_response(),
            ProxyError::UpstreamTransport(message) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": { "message": message, "type": "upstream_error" }
                })),
            )
                .into_response(),
            ProxyError::UpstreamTruncated => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": {
                        "message": "upstream stream ended before completion",
                        "type": "upstream_error"
                    }
                })),
            )
                .into_response(),
            ProxyError::UpstreamMalformed(message) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": { "message": message, "type": "upstream_error" }
                })),
            )
                .into_response(),
            ProxyError::RequestTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({
                    "error": { "message": "upstream request timeout", "type": "proxy_error" }
                })),
            )
                .into_response(),
        }
    }
}
