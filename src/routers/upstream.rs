//! HTTP client wrapper for the upstream chat-completions endpoint.

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::error;

use crate::{
    protocols::chat::{ChatCompletion, ChatCompletionRequest},
    routers::{
        error::{ProxyError, ProxyResult},
        header_utils::upstream_headers,
        streaming::reassemble_response,
        tool_loop::ChatUpstream,
    },
};

/// One request's view of the upstream gateway: shared connection pool plus
/// the forwarded header set resolved for this client.
pub struct HttpUpstream {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl HttpUpstream {
    pub fn new(
        client: reqwest::Client,
        url: String,
        client_headers: &HeaderMap,
        api_key: Option<&str>,
    ) -> Self {
        Self {
            client,
            url,
            headers: upstream_headers(client_headers, api_key),
        }
    }

    async fn send(
        &self,
        request: &ChatCompletionRequest,
        accept_sse: bool,
    ) -> ProxyResult<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(request);
        if accept_sse {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        let response = builder.send().await.map_err(|e| {
            error!(url = %self.url, error = %e, "Failed to contact upstream");
            ProxyError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::UpstreamHttp {
                status: axum::http::StatusCode::from_u16(status.as_u16())
                    .unwrap_or(axum::http::StatusCode::BAD_GATEWAY),
                body,
            });
        }
        Ok(response)
    }

    /// Issue the request with `stream=true` and hand back the raw response
    /// for relaying.
    pub async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> ProxyResult<reqwest::Response> {
        self.send(request, true).await
    }
}

#[async_trait]
impl ChatUpstream for HttpUpstream {
    async fn complete(&self, request: &ChatCompletionRequest) -> ProxyResult<ChatCompletion> {
        let response = self.send(request, false).await?;

        // Some gateways answer with an event stream regardless; fold it back
        // into a plain completion instead of failing.
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false);
        if is_sse {
            return reassemble_response(response).await;
        }

        response
            .json::<ChatCompletion>()
            .await
            .map_err(|e| ProxyError::UpstreamMalformed(format!("parse upstream response: {}", e)))
    }
}
