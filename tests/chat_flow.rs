//! End-to-end chat-completion flows against a scripted upstream.

mod common;

use std::{path::PathBuf, time::Duration};

use common::{content_reply, tool_call_reply, tool_messages, MockUpstream, Scripted};
use serde_json::json;
use toolgate::config::ProxyConfig;

fn proxy_config(upstream: &str, backends_config: PathBuf) -> ProxyConfig {
    ProxyConfig {
        upstream_base_url: upstream.to_string(),
        backends_config,
        ..Default::default()
    }
}

fn no_backends(upstream: &str) -> ProxyConfig {
    proxy_config(upstream, PathBuf::from("/nonexistent/backends.yaml"))
}

#[tokio::test]
async fn chat_without_backends_forwards_verbatim() {
    let reply = json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "model": "m",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "hello" },
            "finish_reason": "stop"
        }]
    });
    let mock = MockUpstream::new(vec![Scripted::Json(reply.clone())]);
    let upstream = mock.serve().await;
    let proxy = common::spawn_proxy(no_backends(&upstream)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", proxy))
        .json(&json!({
            "model": "m",
            "messages": [{ "role": "user", "content": "hi" }],
            "stream": false
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.bytes().await.unwrap();
    // Byte-for-byte what the upstream produced.
    assert_eq!(body.as_ref(), serde_json::to_vec(&reply).unwrap().as_slice());

    let seen = mock.seen();
    assert_eq!(seen.len(), 1);
    // The request reached upstream untouched: no tools injected.
    assert!(seen[0].get("tools").is_none());
}

#[tokio::test]
async fn one_tool_round_resolves_and_returns_final_answer() {
    let mock = MockUpstream::new(vec![
        tool_call_reply("c1", "echo_message", r#"{"message":"x"}"#),
        content_reply("done"),
    ]);
    let upstream = mock.serve().await;
    let proxy = common::spawn_proxy(proxy_config(
        &upstream,
        common::write_debug_backend_config(),
    ))
    .await;

    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", proxy))
        .json(&json!({
            "model": "m",
            "messages": [{ "role": "user", "content": "echo x please" }],
            "stream": false
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response["choices"][0]["message"]["content"], "done");

    let seen = mock.seen();
    assert_eq!(seen.len(), 2, "exactly two upstream calls");

    // First call advertises the backend catalog.
    let tools = seen[0]["tools"].as_array().unwrap();
    assert!(tools
        .iter()
        .any(|t| t["function"]["name"] == "echo_message"));

    // Second call carries the assistant tool_calls message followed by the
    // matching tool result.
    let messages = seen[1]["messages"].as_array().unwrap();
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["tool_calls"][0]["id"], "c1");
    assert_eq!(tool_messages(&seen[1]), vec![("c1".to_string(), "ECHO: x".to_string())]);
}

#[tokio::test]
async fn tool_timeout_is_reported_in_band() {
    let mock = MockUpstream::new(vec![
        tool_call_reply("c1", "sleep", r#"{"ms":60000}"#),
        content_reply("recovered"),
    ]);
    let upstream = mock.serve().await;
    let config = ProxyConfig {
        tool_execution_timeout: Duration::from_secs(1),
        ..proxy_config(&upstream, common::write_debug_backend_config())
    };
    let proxy = common::spawn_proxy(config).await;

    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", proxy))
        .json(&json!({
            "model": "m",
            "messages": [{ "role": "user", "content": "sleep" }],
            "stream": false
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response["choices"][0]["message"]["content"], "recovered");

    let seen = mock.seen();
    assert_eq!(seen.len(), 2);
    let results = tool_messages(&seen[1]);
    assert_eq!(results[0].0, "c1");
    assert!(
        results[0].1.starts_with("Error: tool 'sleep' timed out after 1"),
        "{}",
        results[0].1
    );
}

#[tokio::test]
async fn round_exhaustion_returns_last_assistant_message() {
    let mock = MockUpstream::new(vec![
        tool_call_reply("c1", "echo_message", r#"{"message":"1"}"#),
        tool_call_reply("c2", "echo_message", r#"{"message":"2"}"#),
        tool_call_reply("c3", "echo_message", r#"{"message":"3"}"#),
    ]);
    let upstream = mock.serve().await;
    let config = ProxyConfig {
        max_tool_rounds: 2,
        ..proxy_config(&upstream, common::write_debug_backend_config())
    };
    let proxy = common::spawn_proxy(config).await;

    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", proxy))
        .json(&json!({
            "model": "m",
            "messages": [{ "role": "user", "content": "loop forever" }],
            "stream": false
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Two in-loop rounds plus the entry call.
    assert_eq!(mock.seen().len(), 3);

    // The unresolved tool call is preserved in the response.
    assert_eq!(
        response["choices"][0]["message"]["tool_calls"][0]["id"],
        "c3"
    );
}

#[tokio::test]
async fn upstream_error_status_is_relayed() {
    // An empty script makes any upstream call panic, so script nothing and
    // point the proxy at a closed port instead.
    let proxy = common::spawn_proxy(no_backends("http://127.0.0.1:9")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", proxy))
        .json(&json!({
            "model": "m",
            "messages": [{ "role": "user", "content": "hi" }],
            "stream": false
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn non_chat_routes_are_byte_forwarded() {
    let mock = MockUpstream::new(vec![]);
    let upstream = mock.serve().await;
    let proxy = common::spawn_proxy(no_backends(&upstream)).await;

    let response = reqwest::Client::new()
        .get(format!("{}/v1/models", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let value: serde_json::Value = response.json().await.unwrap();
    assert_eq!(value["data"][0]["id"], "m");
}

#[tokio::test]
async fn health_never_touches_upstream() {
    // Upstream is unreachable; /health still answers.
    let proxy = common::spawn_proxy(no_backends("http://127.0.0.1:9")).await;

    let response = reqwest::Client::new()
        .get(format!("{}/health", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let value: serde_json::Value = response.json().await.unwrap();
    assert_eq!(value, json!({ "status": "ok" }));
}
