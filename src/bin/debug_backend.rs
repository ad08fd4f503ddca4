//! Debug tool backend.
//!
//! A stdio tool server with predictable outputs, used to exercise tool
//! calling end to end. Requests are handled concurrently, so replies may
//! leave in a different order than they arrived; callers must correlate by
//! id.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde_json::{json, Value};
use tokio::{
    io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use toolgate::{
    backend::protocol::{WireMethod, WireRequest, WireResponse},
    protocols::chat::ToolSpec,
};

fn tool_specs() -> Vec<ToolSpec> {
    let specs = json!([
        {
            "type": "function",
            "function": {
                "name": "get_debug_number",
                "description": "Returns a specific debug number (42)",
                "parameters": { "type": "object", "properties": {}, "required": [] }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "echo_message",
                "description": "Echoes back the provided message",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "message": { "type": "string", "description": "Message to echo back" }
                    },
                    "required": ["message"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "get_call_counter",
                "description": "Returns an incrementing counter",
                "parameters": { "type": "object", "properties": {}, "required": [] }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "debug_math",
                "description": "Performs a simple math operation",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "a": { "type": "number" },
                        "b": { "type": "number" },
                        "operation": { "type": "string", "enum": ["add", "subtract", "multiply", "divide"] }
                    },
                    "required": ["a", "b", "operation"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "sleep",
                "description": "Sleeps for the given number of milliseconds, then returns",
                "parameters": {
                    "type": "object",
                    "properties": { "ms": { "type": "number" } },
                    "required": ["ms"]
                }
            }
        }
    ]);
    serde_json::from_value(specs).expect("static specs are valid")
}

async fn handle_call(name: &str, arguments: &Value, counter: &AtomicU64) -> Result<String, String> {
    match name {
        "get_debug_number" => Ok("DEBUG_NUMBER: 42".to_string()),
        "echo_message" => match arguments.get("message").and_then(Value::as_str) {
            Some(message) => Ok(format!("ECHO: {}", message)),
            None => Err("No message provided to echo".to_string()),
        },
        "get_call_counter" => {
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("CALL_COUNTER: {}", count))
        }
        "debug_math" => {
            let a = arguments.get("a").and_then(Value::as_f64);
            let b = arguments.get("b").and_then(Value::as_f64);
            let operation = arguments.get("operation").and_then(Value::as_str);
            let (Some(a), Some(b), Some(operation)) = (a, b, operation) else {
                return Err("Missing arguments for math operation".to_string());
            };
            let result = match operation {
                "add" => a + b,
                "subtract" => a - b,
                "multiply" => a * b,
                "divide" => {
                    if b == 0.0 {
                        return Err("Cannot divide by zero".to_string());
                    }
                    a / b
                }
                other => return Err(format!("Unknown operation '{}'", other)),
            };
            Ok(format!("MATH_RESULT: {} {} {} = {}", a, operation, b, result))
        }
        "sleep" => {
            let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            Ok(format!("SLEPT: {}ms", ms))
        }
        other => Err(format!("Unknown tool '{}'", other)),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let counter = Arc::new(AtomicU64::new(0));
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WireResponse>();

    // Single writer keeps one JSON object per line regardless of how many
    // calls are in flight.
    let writer = tokio::spawn(async move {
        let mut out = stdout();
        while let Some(reply) = reply_rx.recv().await {
            let Ok(line) = serde_json::to_string(&reply) else {
                continue;
            };
            if out.write_all(line.as_bytes()).await.is_err()
                || out.write_all(b"\n").await.is_err()
                || out.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: WireRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("debug-backend: dropping malformed frame: {}", e);
                continue;
            }
        };

        let reply_tx = reply_tx.clone();
        let counter = Arc::clone(&counter);
        match request.method {
            WireMethod::ListTools => {
                let specs = serde_json::to_value(tool_specs()).expect("static specs serialize");
                let _ = reply_tx.send(WireResponse::ok(request.id, specs));
            }
            WireMethod::CallTool(params) => {
                tokio::spawn(async move {
                    let reply =
                        match handle_call(&params.name, &params.arguments, &counter).await {
                            Ok(content) => {
                                WireResponse::ok(request.id, json!({ "content": content }))
                            }
                            Err(message) => WireResponse::err(request.id, -32000, message),
                        };
                    let _ = reply_tx.send(reply);
                });
            }
        }
    }

    drop(reply_tx);
    let _ = writer.await;
}
