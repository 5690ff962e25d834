//! Built-in tools.
//!
//! | Tool      | Arguments                  | Result             |
//! |-----------|----------------------------|--------------------|
//! | `echo`    | `{text}`                   | `{echo: text}`     |
//! | `counter` | none                       | `{count: n}`       |
//! | `delay`   | `{text, ms?}`              | `{text}` after `ms` |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp::registry::{Tool, ToolError};

/// Default `delay` wait when `ms` is omitted.
pub const DEFAULT_DELAY_MS: u64 = 100;

/// Longest wait `delay` accepts.
pub const MAX_DELAY_MS: u64 = 10_000;

/// All built-in tools, in listing order.
#[must_use]
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(EchoTool),
        Arc::new(CounterTool::default()),
        Arc::new(DelayTool),
    ]
}

fn required_text(arguments: &Value) -> Result<&str, ToolError> {
    arguments
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_arguments("'text' must be a string"))
}

/// Returns its input.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo back the provided text"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo back" }
            },
            "required": ["text"]
        })
    }

    async fn run(&self, arguments: Value) -> Result<Value, ToolError> {
        let text = required_text(&arguments)?;
        Ok(json!({ "echo": text }))
    }
}

/// Counts its own invocations across every session.
///
/// Increments are atomic, so concurrent calls each observe a distinct value.
#[derive(Debug, Default)]
pub struct CounterTool {
    count: AtomicU64,
}

impl CounterTool {
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CounterTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Increment a shared counter and return its new value"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, _arguments: Value) -> Result<Value, ToolError> {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "count": count }))
    }
}

/// Waits, then returns its text. Useful for exercising concurrency.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelayTool;

#[async_trait]
impl Tool for DelayTool {
    fn name(&self) -> &str {
        "delay"
    }

    fn description(&self) -> &str {
        "Wait for the given number of milliseconds, then return the text"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "ms": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": MAX_DELAY_MS,
                    "default": DEFAULT_DELAY_MS
                }
            },
            "required": ["text"]
        })
    }

    async fn run(&self, arguments: Value) -> Result<Value, ToolError> {
        let text = required_text(&arguments)?.to_string();
        let ms = match arguments.get("ms") {
            None | Some(Value::Null) => DEFAULT_DELAY_MS,
            Some(value) => value
                .as_u64()
                .filter(|ms| *ms <= MAX_DELAY_MS)
                .ok_or_else(|| {
                    ToolError::invalid_arguments(format!(
                        "'ms' must be an integer between 0 and {MAX_DELAY_MS}"
                    ))
                })?,
        };

        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "text": text }))
    }
}
