//! SSE handling for streamed chat completions.
//!
//! Two modes. Relay re-emits upstream bytes verbatim, `[DONE]` included.
//! Reassemble folds the stream of deltas back into a non-streaming
//! `ChatCompletion`: content fragments concatenate, tool-call fragments merge
//! by `index` and are promoted to full calls only once the stream finishes.

use std::{borrow::Cow, collections::BTreeMap, io};

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::{
    protocols::chat::{
        ChatChoice, ChatCompletion, ChatMessage, FunctionCall, StreamChunk, ToolCall,
    },
    routers::error::{ProxyError, ProxyResult},
};

pub const DONE_SENTINEL: &str = "[DONE]";

// ============================================================================
// Chunk Processor
// ============================================================================

/// Buffers incoming byte chunks into complete SSE blocks, normalizing CRLF.
pub struct ChunkProcessor {
    pending: String,
}

impl ChunkProcessor {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        let chunk_str = match std::str::from_utf8(chunk) {
            Ok(s) => Cow::Borrowed(s),
            Err(_) => Cow::Owned(String::from_utf8_lossy(chunk).into_owned()),
        };
        let mut chars = chunk_str.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\r' && chars.peek() == Some(&'\n') {
                continue;
            }
            self.pending.push(c);
        }
    }

    /// Next complete block (terminated by a blank line), if buffered.
    pub fn next_block(&mut self) -> Option<String> {
        loop {
            let pos = self.pending.find("\n\n")?;
            let block = self.pending[..pos].to_string();
            self.pending.drain(..pos + 2);
            if !block.trim().is_empty() {
                return Some(block);
            }
        }
    }

    pub fn has_remaining(&self) -> bool {
        !self.pending.trim().is_empty()
    }

    pub fn take_remaining(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

impl Default for ChunkProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an SSE block into event name and joined data payload.
pub fn parse_sse_block(block: &str) -> (Option<&str>, Cow<'_, str>) {
    let mut event_name: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }

    let data = if data_lines.len() == 1 {
        Cow::Borrowed(data_lines[0])
    } else {
        Cow::Owned(data_lines.join("\n"))
    };

    (event_name, data)
}

// ============================================================================
// Reassemble Mode
// ============================================================================

#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    call_type: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Folds streamed deltas into one complete assistant message.
pub struct StreamReassembler {
    head: Option<StreamChunk>,
    content: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: Option<String>,
    saw_done: bool,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self {
            head: None,
            content: String::new(),
            tool_calls: BTreeMap::new(),
            finish_reason: None,
            saw_done: false,
        }
    }

    pub fn saw_done(&self) -> bool {
        self.saw_done
    }

    /// Feed one `data:` payload.
    pub fn push_data(&mut self, data: &str) {
        let data = data.trim();
        if data == DONE_SENTINEL {
            self.saw_done = true;
            return;
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Skipping unparseable stream event");
                return;
            }
        };

        if let Some(choice) = chunk.choices.iter().find(|c| c.index == 0) {
            if let Some(content) = &choice.delta.content {
                self.content.push_str(content);
            }
            if let Some(deltas) = &choice.delta.tool_calls {
                for delta in deltas {
                    let acc = self.tool_calls.entry(delta.index).or_default();
                    // First-seen id, type, and name win; arguments concatenate
                    // in arrival order.
                    if acc.id.is_none() {
                        acc.id = delta.id.clone();
                    }
                    if acc.call_type.is_none() {
                        acc.call_type = delta.call_type.clone();
                    }
                    if let Some(function) = &delta.function {
                        if acc.name.is_none() {
                            acc.name = function.name.clone();
                        }
                        if let Some(fragment) = &function.arguments {
                            acc.arguments.push_str(fragment);
                        }
                    }
                }
            }
            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }

        if self.head.is_none() {
            self.head = Some(chunk);
        }
    }

    /// Promote the accumulated state into a non-streaming completion.
    pub fn finish(self) -> ProxyResult<ChatCompletion> {
        let has_output = !self.content.is_empty() || !self.tool_calls.is_empty();
        if !self.saw_done && !has_output {
            return Err(ProxyError::UpstreamTruncated);
        }

        let tool_calls = promote_tool_calls(self.tool_calls);

        let finish_reason = if !self.saw_done {
            warn!("Upstream stream truncated, returning partial content");
            Some("length".to_string())
        } else {
            self.finish_reason.or_else(|| {
                Some(if tool_calls.is_some() {
                    "tool_calls".to_string()
                } else {
                    "stop".to_string()
                })
            })
        };

        let content = if self.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(serde_json::Value::String(self.content))
        };

        let message = ChatMessage::Assistant {
            content,
            tool_calls,
            extra: serde_json::Map::new(),
        };

        let (id, model, mut extra) = match self.head {
            Some(head) => (head.id, head.model, head.extra),
            None => (None, None, serde_json::Map::new()),
        };
        // The reassembled result stands in for a non-streaming response.
        if extra.contains_key("object") {
            extra.insert(
                "object".to_string(),
                serde_json::Value::String("chat.completion".to_string()),
            );
        }

        Ok(ChatCompletion {
            id,
            model,
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason,
                extra: serde_json::Map::new(),
            }],
            extra,
        })
    }
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

fn promote_tool_calls(accumulated: BTreeMap<u32, ToolCallAccumulator>) -> Option<Vec<ToolCall>> {
    if accumulated.is_empty() {
        return None;
    }
    let max_index = *accumulated.keys().next_back().unwrap();
    let mut calls = Vec::with_capacity(max_index as usize + 1);
    for index in 0..=max_index {
        match accumulated.get(&index) {
            Some(acc) => calls.push(ToolCall {
                id: acc.id.clone().unwrap_or_else(|| format!("call_{}", index)),
                call_type: acc
                    .call_type
                    .clone()
                    .unwrap_or_else(|| "function".to_string()),
                function: FunctionCall {
                    name: acc.name.clone().unwrap_or_default(),
                    arguments: acc.arguments.clone(),
                },
            }),
            None => {
                warn!(index = index, "Stream never produced a tool call for this index");
                calls.push(ToolCall {
                    id: format!("missing_{}", index),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: String::new(),
                        arguments: String::new(),
                    },
                });
            }
        }
    }
    Some(calls)
}

/// Drive an upstream SSE response through the reassembler.
pub async fn reassemble_response(response: reqwest::Response) -> ProxyResult<ChatCompletion> {
    let mut processor = ChunkProcessor::new();
    let mut reassembler = StreamReassembler::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                processor.push_chunk(&bytes);
                while let Some(block) = processor.next_block() {
                    let (_event, data) = parse_sse_block(&block);
                    if !data.is_empty() {
                        reassembler.push_data(&data);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Upstream stream failed mid-read");
                break;
            }
        }
    }

    if processor.has_remaining() {
        let remainder = processor.take_remaining();
        let (_event, data) = parse_sse_block(&remainder);
        if !data.is_empty() {
            reassembler.push_data(&data);
        }
    }

    reassembler.finish()
}

// ============================================================================
// Relay Mode
// ============================================================================

/// Forward an upstream SSE response to the client byte-for-byte.
///
/// Frames are never rewritten or re-chunked; a `ChunkProcessor` runs on the
/// side only to notice whether `[DONE]` ever arrived.
pub fn relay_response(upstream: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, io::Error>>();

    tokio::spawn(async move {
        let mut stream = upstream.bytes_stream();
        let mut processor = ChunkProcessor::new();
        let mut saw_done = false;

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    processor.push_chunk(&bytes);
                    while let Some(block) = processor.next_block() {
                        let (_event, data) = parse_sse_block(&block);
                        if data.trim() == DONE_SENTINEL {
                            saw_done = true;
                        }
                    }
                    if tx.send(Ok(bytes)).is_err() {
                        debug!("Client disconnected, dropping upstream stream");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Upstream stream failed during relay");
                    let _ = tx.send(Err(io::Error::other(format!("stream error: {}", e))));
                    return;
                }
            }
        }

        if !saw_done {
            warn!("Upstream stream ended without [DONE]");
        }
    });

    let mut response = Response::new(Body::from_stream(UnboundedReceiverStream::new(rx)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
}
