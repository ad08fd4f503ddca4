//! Request/response transform hooks.
//!
//! An ordered list of named pure transforms applied to the request JSON
//! before dispatch and to buffered response JSON after. The default chain is
//! empty; nothing in the orchestrator depends on hooks.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

type HookFn = Arc<dyn Fn(&mut Value) + Send + Sync>;

#[derive(Clone)]
struct Hook {
    name: String,
    func: HookFn,
}

#[derive(Clone, Default)]
pub struct HookChain {
    before_request: Vec<Hook>,
    after_response: Vec<Hook>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        self.before_request.push(Hook {
            name: name.into(),
            func: Arc::new(func),
        });
        self
    }

    pub fn on_response<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        self.after_response.push(Hook {
            name: name.into(),
            func: Arc::new(func),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before_request.is_empty() && self.after_response.is_empty()
    }

    pub fn has_request_hooks(&self) -> bool {
        !self.before_request.is_empty()
    }

    pub fn apply_before(&self, value: &mut Value) {
        for hook in &self.before_request {
            debug!(hook = %hook.name, "Applying request hook");
            (hook.func)(value);
        }
    }

    pub fn apply_after(&self, value: &mut Value) {
        for hook in &self.after_response {
            debug!(hook = %hook.name, "Applying response hook");
            (hook.func)(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_is_empty() {
        let chain = HookChain::new();
        assert!(chain.is_empty());

        let mut value = serde_json::json!({"model": "m"});
        let before = value.clone();
        chain.apply_before(&mut value);
        chain.apply_after(&mut value);
        assert_eq!(value, before);
    }

    #[test]
    fn test_hooks_apply_in_registration_order() {
        let chain = HookChain::new()
            .on_request("first", |v| {
                v["trace"] = serde_json::json!("a");
            })
            .on_request("second", |v| {
                let prev = v["trace"].as_str().unwrap_or_default().to_string();
                v["trace"] = serde_json::json!(format!("{}b", prev));
            });

        let mut value = serde_json::json!({});
        chain.apply_before(&mut value);
        assert_eq!(value["trace"], "ab");
    }

    #[test]
    fn test_request_and_response_chains_are_independent() {
        let chain = HookChain::new()
            .on_request("req", |v| {
                v["req"] = serde_json::json!(true);
            })
            .on_response("resp", |v| {
                v["resp"] = serde_json::json!(true);
            });

        let mut request = serde_json::json!({});
        let mut response = serde_json::json!({});
        chain.apply_before(&mut request);
        chain.apply_after(&mut response);

        assert_eq!(request, serde_json::json!({"req": true}));
        assert_eq!(response, serde_json::json!({"resp": true}));
    }
}
