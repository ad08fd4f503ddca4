//! The tool-calling loop over chat completions.
//!
//! One round: call upstream non-streaming, inspect the first choice for
//! `tool_calls`, execute them, append the assistant message and one tool
//! message per call to the conversation, and go again. The loop ends when
//! the model stops asking for tools or the round budget runs out; in the
//! latter case the last assistant message is returned as-is, unresolved
//! tool calls included.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    backend::ToolDispatch,
    protocols::chat::{ChatCompletion, ChatCompletionRequest, ToolSpec},
    routers::{error::ProxyResult, invoker::invoke_batch},
};

/// Upstream surface the loop runs against. Implemented by the HTTP client
/// wrapper; tests substitute scripted responses.
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    async fn complete(&self, request: &ChatCompletionRequest) -> ProxyResult<ChatCompletion>;
}

#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    /// Maximum tool rounds before the loop stops resolving tool calls.
    pub max_rounds: usize,
    /// Per-tool-call execution budget.
    pub tool_timeout: Duration,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a completed loop.
pub struct ToolLoopResult {
    pub response: ChatCompletion,
    /// Tool rounds executed (0 when the first reply had no tool calls).
    pub rounds: usize,
    pub upstream_calls: usize,
    pub tool_calls_executed: usize,
    /// The working request that produced `response`. Hybrid streaming
    /// re-issues exactly this request with `stream=true`.
    pub final_request: ChatCompletionRequest,
    pub max_rounds_reached: bool,
}

/// Union of client-supplied tools and the backend catalog, deduplicated by
/// function name with client entries winning on conflict.
pub fn merge_tools(
    client_tools: Option<&[ToolSpec]>,
    catalog: &[ToolSpec],
) -> Option<Vec<ToolSpec>> {
    let client = client_tools.unwrap_or(&[]);
    if client.is_empty() && catalog.is_empty() {
        return None;
    }

    let mut merged: Vec<ToolSpec> = client.to_vec();
    for spec in catalog {
        if !merged
            .iter()
            .any(|existing| existing.function.name == spec.function.name)
        {
            merged.push(spec.clone());
        }
    }
    Some(merged)
}

/// Run the loop to completion. The caller's request is never mutated; all
/// conversation growth happens on a local copy.
pub async fn run_tool_loop<U, D>(
    upstream: &U,
    dispatch: &D,
    request: &ChatCompletionRequest,
    catalog: &[ToolSpec],
    config: &ToolLoopConfig,
) -> ProxyResult<ToolLoopResult>
where
    U: ChatUpstream + ?Sized,
    D: ToolDispatch + ?Sized,
{
    let mut working = request.clone();
    working.stream = Some(false);
    working.tools = merge_tools(request.tools.as_deref(), catalog);
    if !catalog.is_empty() && working.tools.is_some() && working.tool_choice.is_none() {
        working.tool_choice = Some(serde_json::Value::String("auto".to_string()));
    }

    let mut rounds = 0usize;
    let mut upstream_calls = 0usize;
    let mut tool_calls_executed = 0usize;

    let mut response = upstream.complete(&working).await?;
    upstream_calls += 1;

    loop {
        let assistant = match response.first_message() {
            Some(message) => message.clone(),
            None => break,
        };
        let tool_calls = assistant.tool_calls().to_vec();
        if tool_calls.is_empty() {
            break;
        }

        if rounds == config.max_rounds {
            warn!(
                max_rounds = config.max_rounds,
                "Max tool rounds reached, stopping"
            );
            break;
        }
        rounds += 1;

        info!(
            round = rounds,
            tool_count = tool_calls.len(),
            "Processing tool calls"
        );

        let results = invoke_batch(dispatch, &tool_calls, config.tool_timeout).await;
        tool_calls_executed += tool_calls.len();

        // Upstream needs the assistant message with its tool_calls in place
        // before the matching tool messages, in call order.
        working.messages.push(assistant);
        working.messages.extend(results);

        debug!(
            round = rounds,
            message_count = working.messages.len(),
            "Sending tool results back for the next round"
        );

        response = upstream.complete(&working).await?;
        upstream_calls += 1;
    }

    let max_rounds_reached = response
        .first_message()
        .map(|m| !m.tool_calls().is_empty())
        .unwrap_or(false);

    info!(
        rounds = rounds,
        upstream_calls = upstream_calls,
        tool_calls = tool_calls_executed,
        "Tool calling completed"
    );

    Ok(ToolLoopResult {
        response,
        rounds,
        upstream_calls,
        tool_calls_executed,
        final_request: working,
        max_rounds_reached,
    })
}
