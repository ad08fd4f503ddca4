//! Per-request mode selection for the chat-completions path.
//!
//! Non-streaming requests run the tool loop and return a buffered response.
//! Streaming requests pass through untouched unless hybrid streaming is
//! enabled and tool backends are present, in which case the loop runs
//! non-streaming first and the final upstream call is re-issued with
//! `stream=true` and relayed.

use std::sync::Arc;

use axum::{
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{
    app_context::AppContext,
    protocols::chat::ChatCompletionRequest,
    routers::{
        error::ProxyError,
        forward,
        streaming::relay_response,
        tool_loop::{run_tool_loop, ToolLoopConfig, ToolLoopResult},
        upstream::HttpUpstream,
    },
};

/// Entry point for `POST /v1/chat/completions`.
pub async fn dispatch_chat(ctx: &Arc<AppContext>, headers: HeaderMap, body: Bytes) -> Response {
    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Unparseable chat body, forwarding verbatim");
            return forward::forward_to_url(
                ctx,
                Method::POST,
                &ctx.config.chat_completions_url(),
                &headers,
                body,
            )
            .await;
        }
    };

    if request.is_stream() {
        if ctx.config.enable_hybrid_streaming && !ctx.registry.is_empty() {
            hybrid_streaming(ctx, &headers, request).await
        } else {
            passthrough_stream(ctx, &headers, body).await
        }
    } else {
        non_streaming(ctx, &headers, request, body).await
    }
}

/// Buffered mode: tool loop, then one JSON response.
async fn non_streaming(
    ctx: &Arc<AppContext>,
    headers: &HeaderMap,
    request: ChatCompletionRequest,
    raw_body: Bytes,
) -> Response {
    // With no tools and no hooks there is nothing to orchestrate; forward the
    // original bytes so the upstream response comes back verbatim.
    if ctx.registry.is_empty() && ctx.hooks.is_empty() {
        return forward::forward_to_url(
            ctx,
            Method::POST,
            &ctx.config.chat_completions_url(),
            headers,
            raw_body,
        )
        .await;
    }

    let request = apply_request_hooks(ctx, request);
    let result = match run_loop(ctx, headers, &request).await {
        Ok(result) => result,
        Err(e) => return e.into_response(),
    };

    let mut value = match serde_json::to_value(&result.response) {
        Ok(value) => value,
        Err(e) => {
            return ProxyError::UpstreamMalformed(format!("serialize response: {}", e))
                .into_response()
        }
    };
    ctx.hooks.apply_after(&mut value);

    (StatusCode::OK, Json(value)).into_response()
}

/// Hybrid mode: resolve tools non-streaming, then stream the final answer.
async fn hybrid_streaming(
    ctx: &Arc<AppContext>,
    headers: &HeaderMap,
    request: ChatCompletionRequest,
) -> Response {
    let request = apply_request_hooks(ctx, request);
    let result = match run_loop(ctx, headers, &request).await {
        Ok(result) => result,
        Err(e) => return e.into_response(),
    };

    info!(
        rounds = result.rounds,
        tool_calls = result.tool_calls_executed,
        "Tool phase complete, opening final upstream stream"
    );

    let mut final_request = result.final_request;
    final_request.stream = Some(true);

    let upstream = HttpUpstream::new(
        ctx.client.clone(),
        ctx.config.chat_completions_url(),
        headers,
        ctx.config.upstream_api_key.as_deref(),
    );
    match upstream.open_stream(&final_request).await {
        Ok(response) => relay_response(response),
        Err(e) => e.into_response(),
    }
}

/// Pass-through mode: open the upstream stream and relay every frame.
async fn passthrough_stream(
    ctx: &Arc<AppContext>,
    headers: &HeaderMap,
    raw_body: Bytes,
) -> Response {
    let body = if ctx.hooks.has_request_hooks() {
        match serde_json::from_slice::<serde_json::Value>(&raw_body) {
            Ok(mut value) => {
                ctx.hooks.apply_before(&mut value);
                Bytes::from(value.to_string())
            }
            Err(_) => raw_body,
        }
    } else {
        raw_body
    };

    let upstream_headers = crate::routers::header_utils::upstream_headers(
        headers,
        ctx.config.upstream_api_key.as_deref(),
    );
    let result = ctx
        .client
        .post(ctx.config.chat_completions_url())
        .headers(upstream_headers)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => relay_response(response),
        Ok(response) => {
            let status = StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Upstream rejected streaming request");
            (status, body).into_response()
        }
        Err(e) => ProxyError::from(e).into_response(),
    }
}

async fn run_loop(
    ctx: &Arc<AppContext>,
    headers: &HeaderMap,
    request: &ChatCompletionRequest,
) -> Result<ToolLoopResult, ProxyError> {
    let upstream = HttpUpstream::new(
        ctx.client.clone(),
        ctx.config.chat_completions_url(),
        headers,
        ctx.config.upstream_api_key.as_deref(),
    );
    let config = ToolLoopConfig {
        max_rounds: ctx.config.max_tool_rounds,
        tool_timeout: ctx.config.tool_execution_timeout,
    };
    let catalog = ctx.registry.specs();

    // The overall budget bounds the whole loop; its expiry cancels whatever
    // upstream call or tool invocation is in flight.
    match tokio::time::timeout(
        ctx.config.request_timeout,
        run_tool_loop(&upstream, ctx.registry.as_ref(), request, &catalog, &config),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            warn!("Overall request budget expired during tool loop");
            Err(ProxyError::RequestTimeout)
        }
    }
}

fn apply_request_hooks(
    ctx: &Arc<AppContext>,
    request: ChatCompletionRequest,
) -> ChatCompletionRequest {
    if !ctx.hooks.has_request_hooks() {
        return request;
    }
    let mut value = match serde_json::to_value(&request) {
        Ok(value) => value,
        Err(_) => return request,
    };
    ctx.hooks.apply_before(&mut value);
    match serde_json::from_value(value) {
        Ok(hooked) => hooked,
        Err(e) => {
            warn!(error = %e, "Request hook produced an invalid request, ignoring hooks");
            request
        }
    }
}
