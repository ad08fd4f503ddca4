//! Tool backend wire protocol.
//!
//! Backends speak newline-delimited JSON over stdio: one object per line,
//! requests carry a monotonically increasing `id`, and every reply echoes the
//! `id` of the request it answers. Replies may arrive in any order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocols::chat::ToolSpec;

/// A client-to-backend frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireRequest {
    pub id: u64,

    #[serde(flatten)]
    pub method: WireMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum WireMethod {
    ListTools,
    CallTool(CallToolParams),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallToolParams {
    pub name: String,

    /// Already-parsed arguments object.
    pub arguments: Value,
}

/// A backend-to-client frame. Exactly one of `result` / `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub code: i64,

    pub message: String,
}

/// Payload of a successful `call_tool` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: String,
}

impl WireResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(WireError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Interpret this reply as a `list_tools` result.
    pub fn into_tool_specs(self) -> Result<Vec<ToolSpec>, String> {
        if let Some(err) = self.error {
            return Err(err.message);
        }
        let result = self.result.ok_or_else(|| "reply carried no result".to_string())?;
        serde_json::from_value(result).map_err(|e| format!("malformed tool list: {}", e))
    }

    /// Interpret this reply as a `call_tool` result.
    pub fn into_call_result(self) -> Result<String, String> {
        if let Some(err) = self.error {
            return Err(err.message);
        }
        let result = self.result.ok_or_else(|| "reply carried no result".to_string())?;
        serde_json::from_value::<CallToolResult>(result)
            .map(|r| r.content)
            .map_err(|e| format!("malformed call result: {}", e))
    }
}
