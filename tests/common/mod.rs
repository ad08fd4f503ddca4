#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use toolgate::{app_context::AppContext, config::ProxyConfig};

static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One scripted upstream reply.
#[derive(Clone)]
pub enum Scripted {
    Json(Value),
    /// Raw SSE frames, each already formatted as `data: ...\n\n`.
    Sse(Vec<String>),
}

/// Minimal OpenAI-compatible upstream with scripted replies.
#[derive(Clone, Default)]
pub struct MockUpstream {
    responses: Arc<Mutex<Vec<Scripted>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockUpstream {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(script)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bind on an ephemeral port and serve; returns the base URL.
    pub async fn serve(&self) -> String {
        let router = Router::new()
            .route("/v1/chat/completions", post(chat_handler))
            .route("/v1/models", get(models_handler))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Every chat payload the upstream has received, in order.
    pub fn seen(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn chat_handler(State(mock): State<MockUpstream>, Json(body): Json<Value>) -> Response {
    mock.requests.lock().unwrap().push(body);
    let next = {
        let mut responses = mock.responses.lock().unwrap();
        if responses.is_empty() {
            panic!("mock upstream ran out of scripted responses");
        }
        responses.remove(0)
    };
    match next {
        Scripted::Json(value) => Json(value).into_response(),
        Scripted::Sse(frames) => (
            [(CONTENT_TYPE, "text/event-stream")],
            frames.concat(),
        )
            .into_response(),
    }
}

async fn models_handler() -> Response {
    Json(serde_json::json!({
        "object": "list",
        "data": [{"id": "m", "object": "model"}]
    }))
    .into_response()
}

/// Write a backend list file pointing at the compiled debug backend.
pub fn write_debug_backend_config() -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "toolgate-backends-{}-{}.yaml",
        std::process::id(),
        FILE_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let yaml = format!(
        "backends:\n  debug:\n    command: \"{}\"\n",
        debug_backend_path()
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

pub fn debug_backend_path() -> &'static str {
    env!("CARGO_BIN_EXE_debug-backend")
}

/// Start the proxy against `config` on an ephemeral port; returns its base
/// URL.
pub async fn spawn_proxy(config: ProxyConfig) -> String {
    let context = AppContext::new(config).await.unwrap();
    let app = toolgate::server::build_app(context);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Scripted assistant reply requesting one tool call.
pub fn tool_call_reply(call_id: &str, tool: &str, arguments: &str) -> Scripted {
    Scripted::Json(serde_json::json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "model": "m",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": call_id,
                    "type": "function",
                    "function": { "name": tool, "arguments": arguments }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    }))
}

/// Scripted assistant reply with plain content.
pub fn content_reply(text: &str) -> Scripted {
    Scripted::Json(serde_json::json!({
        "id": "cmpl-2",
        "object": "chat.completion",
        "model": "m",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    }))
}

/// Tool-role messages in an upstream payload, as (tool_call_id, content).
pub fn tool_messages(payload: &Value) -> Vec<(String, String)> {
    payload["messages"]
        .as_array()
        .unwrap_or(&Vec::new())
        .iter()
        .filter(|m| m["role"] == "tool")
        .map(|m| {
            (
                m["tool_call_id"].as_str().unwrap_or_default().to_string(),
                m["content"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}
