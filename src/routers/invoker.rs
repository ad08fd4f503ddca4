//! Concurrent execution of one batch of tool calls.
//!
//! Every call in a batch runs concurrently with its own timeout. The output
//! sequence always has the same length and order as the input: failures are
//! rendered into the tool-message content instead of short-circuiting the
//! batch, so the model gets a chance to recover on its own.

use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    backend::ToolDispatch,
    protocols::chat::{ChatMessage, ToolCall},
};

/// Execute `calls` against `dispatch`, one tool-role message per call, in
/// input order.
pub async fn invoke_batch<D: ToolDispatch + ?Sized>(
    dispatch: &D,
    calls: &[ToolCall],
    timeout: Duration,
) -> Vec<ChatMessage> {
    let futures = calls
        .iter()
        .map(|call| async move { invoke_one(dispatch, call, timeout).await });
    join_all(futures).await
}

async fn invoke_one<D: ToolDispatch + ?Sized>(
    dispatch: &D,
    call: &ToolCall,
    timeout: Duration,
) -> ChatMessage {
    let name = call.function.name.as_str();

    // Arguments arrive as a JSON-encoded string; an unparseable string never
    // reaches the backend.
    let raw = if call.function.arguments.is_empty() {
        "{}"
    } else {
        call.function.arguments.as_str()
    };
    let arguments: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(tool = %name, error = %e, "Rejecting tool call with invalid arguments");
            return ChatMessage::tool_result(
                &call.id,
                format!("Error: invalid tool arguments: {}", e),
            );
        }
    };

    debug!(tool = %name, call_id = %call.id, "Executing tool");
    let content = match tokio::time::timeout(timeout, dispatch.dispatch(name, arguments)).await {
        Ok(Ok(content)) => content,
        Ok(Err(e)) => {
            warn!(tool = %name, call_id = %call.id, error = %e, "Tool execution failed");
            format!("Error executing tool {}: {}", name, e)
        }
        Err(_) => {
            warn!(
                tool = %name,
                call_id = %call.id,
                timeout_secs = timeout.as_secs(),
                "Tool execution timed out"
            );
            format!(
                "Error: tool '{}' timed out after {}s",
                name,
                timeout.as_secs()
            )
        }
    };

    ChatMessage::tool_result(&call.id, content)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        backend::{BackendError, BackendResult},
        protocols::chat::FunctionCall,
    };

    struct ScriptedDispatch;

    #[async_trait]
    impl ToolDispatch for ScriptedDispatch {
        async fn dispatch(&self, name: &str, arguments: Value) -> BackendResult<String> {
            match name {
                "echo_message" => {
                    let message = arguments["message"].as_str().unwrap_or_default();
                    Ok(format!("ECHO: {}", message))
                }
                "slow" => {
                    let ms = arguments["ms"].as_u64().unwrap_or(60_000);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok("done".to_string())
                }
                "broken" => Err(BackendError::ToolFailed("backend said no".to_string())),
                other => Err(BackendError::UnknownTool(other.to_string())),
            }
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn content_of(msg: &ChatMessage) -> (&str, &str) {
        match msg {
            ChatMessage::Tool {
                content,
                tool_call_id,
                ..
            } => (tool_call_id.as_str(), content.as_str()),
            other => panic!("expected tool message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let calls = vec![
            call("c1", "slow", r#"{"ms": 50}"#),
            call("c2", "echo_message", r#"{"message": "x"}"#),
        ];
        let results = invoke_batch(&ScriptedDispatch, &calls, Duration::from_secs(5)).await;
        assert_eq!(results.len(), 2);
        assert_eq!(content_of(&results[0]), ("c1", "done"));
        assert_eq!(content_of(&results[1]), ("c2", "ECHO: x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_runs_concurrently() {
        let calls: Vec<ToolCall> = (0..4)
            .map(|i| call(&format!("c{}", i), "slow", r#"{"ms": 1000}"#))
            .collect();

        let started = tokio::time::Instant::now();
        let results = invoke_batch(&ScriptedDispatch, &calls, Duration::from_secs(30)).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 4);
        // Four concurrent one-second calls take one second, not four.
        assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_per_call() {
        let calls = vec![
            call("c1", "slow", r#"{"ms": 5000}"#),
            call("c2", "echo_message", r#"{"message": "ok"}"#),
        ];
        let results = invoke_batch(&ScriptedDispatch, &calls, Duration::from_secs(1)).await;

        let (id, content) = content_of(&results[0]);
        assert_eq!(id, "c1");
        assert_eq!(content, "Error: tool 'slow' timed out after 1s");

        // The other call is unaffected by its sibling's timeout.
        assert_eq!(content_of(&results[1]), ("c2", "ECHO: ok"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_backend() {
        let calls = vec![call("c1", "echo_message", "{not json")];
        let results = invoke_batch(&ScriptedDispatch, &calls, Duration::from_secs(1)).await;
        let (_, content) = content_of(&results[0]);
        assert!(
            content.starts_with("Error: invalid tool arguments:"),
            "{}",
            content
        );
    }

    #[tokio::test]
    async fn test_empty_arguments_default_to_empty_object() {
        let calls = vec![call("c1", "echo_message", "")];
        let results = invoke_batch(&ScriptedDispatch, &calls, Duration::from_secs(1)).await;
        assert_eq!(content_of(&results[0]).1, "ECHO: ");
    }

    #[tokio::test]
    async fn test_backend_error_and_unknown_tool_are_in_band() {
        let calls = vec![
            call("c1", "broken", "{}"),
            call("c2", "nonexistent", "{}"),
        ];
        let results = invoke_batch(&ScriptedDispatch, &calls, Duration::from_secs(1)).await;

        assert_eq!(
            content_of(&results[0]).1,
            "Error executing tool broken: backend said no"
        );
        assert_eq!(
            content_of(&results[1]).1,
            "Error executing tool nonexistent: no tool named 'nonexistent' is registered"
        );
    }
}
