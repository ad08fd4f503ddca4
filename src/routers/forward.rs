//! Byte-level forwarding for everything that is not a chat completion.

use std::io;

use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::TryStreamExt;
use tracing::{debug, error};

use crate::{app_context::AppContext, routers::header_utils};

/// Forward a request upstream verbatim and stream the response back,
/// preserving status and body bytes. `Host` and hop-by-hop headers are
/// stripped in both directions; the configured API key replaces the client's
/// Authorization when present.
pub async fn forward_request(
    ctx: &AppContext,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let url = ctx.config.upstream_url(path_and_query);
    forward_to_url(ctx, method, &url, headers, body).await
}

/// Forward to an explicit upstream URL (used by the dispatcher for raw
/// chat-completions bodies).
pub async fn forward_to_url(
    ctx: &AppContext,
    method: Method,
    url: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    debug!(method = %method, url = %url, "Forwarding request upstream");

    let upstream_headers =
        header_utils::upstream_headers(headers, ctx.config.upstream_api_key.as_deref());

    let result = ctx
        .client
        .request(method, url)
        .headers(upstream_headers)
        .body(body)
        .send()
        .await;

    let upstream = match result {
        Ok(response) => response,
        Err(e) => {
            error!(url = %url, error = %e, "Upstream request failed");
            return (
                StatusCode::BAD_GATEWAY,
                axum::Json(serde_json::json!({
                    "error": { "message": "Upstream request failed", "type": "proxy_error" }
                })),
            )
                .into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if header_utils::is_stripped(name) {
            continue;
        }
        response_headers.append(name.clone(), value.clone());
    }

    let stream = upstream.bytes_stream().map_err(io::Error::other);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}
