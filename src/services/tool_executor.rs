use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::redact::redact_object;
use crate::utils::text::json_size;
use crate::utils::tool_errors::unknown_tool_error;

use serde_json::Value;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value) -> Result<Value, ToolError>;
}

#[derive(Clone)]
pub struct ToolExecutor {
    logger: Logger,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolExecutor {
    pub fn new(logger: Logger, handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            logger: logger.child("executor"),
            handlers: Arc::new(handlers),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.handlers.contains_key(tool)
    }

    fn strip_args_for_handler(&self, args: &Value) -> Value {
        let mut cleaned = args.clone();
        if let Value::Object(map) = &mut cleaned {
            map.remove("trace_id");
        }
        cleaned
    }

    fn summarize_result(&self, result: &Value) -> Value {
        let bytes = json_size(result);
        match result {
            Value::Object(obj) => {
                let mut summary = serde_json::json!({"type": "object", "bytes": bytes});
                for key in ["count", "total", "truncated", "reported_total"] {
                    if let Some(value) = obj.get(key) {
                        summary[key] = value.clone();
                    }
                }
                if let Some(items) = obj.get("items").and_then(Value::as_array) {
                    summary["count"] = Value::from(items.len());
                }
                summary
            }
            Value::Array(arr) => serde_json::json!({"type": "array", "length": arr.len(), "bytes": bytes}),
            _ => serde_json::json!({"type": "scalar", "bytes": bytes}),
        }
    }

    /// Runs `tool` and wraps its output as `{ok, result, meta}`.
    pub async fn execute(&self, tool: &str, args: Value) -> Result<Value, ToolError> {
        let started_at = chrono::Utc::now().timestamp_millis();
        let Some(handler) = self.handlers.get(tool) else {
            return Err(unknown_tool_error(tool, &self.tool_names()));
        };
        let trace_id = args
            .get("trace_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.logger.debug(
            tool,
            Some(&serde_json::json!({
                "trace_id": trace_id,
                "args": redact_object(&args, 256),
            })),
        );

        let outcome = handler.handle(self.strip_args_for_handler(&args)).await;
        let duration_ms = chrono::Utc::now().timestamp_millis() - started_at;

        match outcome {
            Ok(result) => {
                self.logger.info(
                    "Tool call completed",
                    Some(&serde_json::json!({
                        "tool": tool,
                        "trace_id": trace_id,
                        "duration_ms": duration_ms,
                        "result": self.summarize_result(&result),
                    })),
                );
                Ok(serde_json::json!({
                    "ok": true,
                    "result": result,
                    "meta": {
                        "tool": tool,
                        "trace_id": trace_id,
                        "duration_ms": duration_ms,
                    },
                }))
            }
            Err(err) => {
                self.logger.warn(
                    "Tool call failed",
                    Some(&serde_json::json!({
                        "tool": tool,
                        "trace_id": trace_id,
                        "duration_ms": duration_ms,
                        "code": err.code,
                        "retryable": err.retryable,
                    })),
                );
                Err(err)
            }
        }
    }
}
