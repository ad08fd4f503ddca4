//! HTTP server: routes, state, and graceful shutdown.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use crate::{app_context::AppContext, routers};

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<AppContext>,
}

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// Registered tools and backend state, served locally.
async fn tools_status(State(state): State<AppState>) -> Response {
    let names = state.context.registry.tool_names();
    Json(json!({
        "total_tools": names.len(),
        "tools": names,
    }))
    .into_response()
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    routers::dispatch_chat(&state.context, headers, body).await
}

/// Everything else is forwarded upstream byte-for-byte.
async fn forward_any(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    routers::forward::forward_request(&state.context, method, &uri, &headers, body).await
}

pub fn build_app(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools/status", get(tools_status))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/chat/completions", post(chat_completions))
        .fallback(forward_any)
        .with_state(AppState { context })
}

/// Bind and serve until ctrl-c, then tear the registry down.
pub async fn serve(context: Arc<AppContext>) -> Result<(), String> {
    let addr = format!("{}:{}", context.config.host, context.config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("bind {}: {}", addr, e))?;

    info!(addr = %addr, "Proxy listening");

    let app = build_app(Arc::clone(&context));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {}", e))?;

    context.registry.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    #[tokio::test]
    async fn test_health_is_local() {
        let response = health().await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "status": "ok" }));
    }
}
