//! Tool registry and executor.
//!
//! Tools are registered once, when the server is built, and are read-only
//! afterwards, so one registry is shared by every session. Execution is
//! re-entrant: any number of calls to the same tool may be in flight at once.
//! A tool that guards private state (see [`crate::tools::CounterTool`]) owns
//! that synchronisation itself.
//!
//! Every call runs in its own Tokio task. A tool that returns an error or
//! panics produces a JSON-RPC error object; it never takes the server down.
//! There is no built-in timeout.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::RegistryError;
use crate::mcp::protocol::{ErrorCode, ErrorObject};

/// Failure reported by (or on behalf of) a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The arguments did not match what the tool expects.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The tool panicked; the panic was contained in its task.
    #[error("tool panicked")]
    Panicked,

    /// The runtime cancelled the tool's task.
    #[error("tool task was cancelled")]
    Cancelled,
}

impl ToolError {
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Converts into the error object returned to the client.
    #[must_use]
    pub fn to_error_object(&self, tool: &str) -> ErrorObject {
        let detail = self.to_string();
        let (code, message) = match self {
            Self::InvalidArguments(_) => (
                ErrorCode::InvalidParams,
                format!("Invalid arguments for tool '{tool}': {detail}"),
            ),
            _ => (
                ErrorCode::InternalError,
                format!("Tool execution failed: {detail}"),
            ),
        };
        ErrorObject::with_message(code, message).with_data(json!({
            "tool": tool,
            "detail": detail,
        }))
    }
}

/// A callable exposed to clients through `tools/call`.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Unique name used in `tools/call`.
    fn name(&self) -> &str;

    /// Human-readable description shown in `tools/list`.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    /// Runs the tool. `arguments` is always a JSON object.
    async fn run(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// A tool backed by an async closure.
///
/// ```
/// use mcp_tool_server::mcp::registry::{FnTool, ToolError};
/// use serde_json::{json, Value};
///
/// let tool = FnTool::new("upper", "Uppercase the input", |args: Value| async move {
///     match args["text"].as_str() {
///         Some(text) => Ok(json!(text.to_uppercase())),
///         None => Err(ToolError::invalid_arguments("text must be a string")),
///     }
/// });
/// # let _ = tool;
/// ```
pub struct FnTool<F> {
    name: String,
    description: String,
    input_schema: Value,
    handler: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({ "type": "object" }),
            handler,
        }
    }

    #[must_use]
    pub fn with_input_schema(mut self, input_schema: Value) -> Self {
        self.input_schema = input_schema;
        self
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn run(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.handler)(arguments).await
    }
}

/// A tool definition for the `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a successful tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
}

impl ToolCallResult {
    /// Creates a text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
        }
    }

    /// Wraps a tool's return value: strings verbatim, anything else as
    /// compact JSON.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::text(text.as_str()),
            other => Self::text(other.to_string()),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({ "content": self.content })
    }
}

/// Registered tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool's name or description is empty, or if a
    /// tool with the same name is already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if tool.description().trim().is_empty() {
            return Err(RegistryError::EmptyDescription {
                name: name.to_string(),
            });
        }
        if self.tools.contains_key(tool.name()) {
            return Err(RegistryError::Duplicate {
                name: tool.name().to_string(),
            });
        }

        tracing::debug!(tool = tool.name(), "Registered tool");
        self.tools.insert(tool.name().to_string(), tool);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Definitions of every registered tool, for `tools/list`.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Looks up `name` and runs it.
    ///
    /// # Errors
    ///
    /// Returns a `ToolNotFound` error object for unknown tools, otherwise
    /// whatever [`run_tool`] reports.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<Value, ErrorObject> {
        let tool = self
            .get(name)
            .ok_or_else(|| ErrorObject::tool_not_found(name))?;
        run_tool(tool, arguments).await
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Runs a tool in its own task, converting failures and panics into error
/// objects.
///
/// # Errors
///
/// Returns `InvalidParams` when the tool rejects its arguments and
/// `InternalError` for any other failure, panics included.
pub async fn run_tool(tool: Arc<dyn Tool>, arguments: Value) -> Result<Value, ErrorObject> {
    let name = tool.name().to_string();
    let outcome = tokio::spawn(async move { tool.run(arguments).await }).await;

    let error = match outcome {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(error)) => {
            tracing::warn!(tool = %name, error = %error, "Tool execution failed");
            error
        }
        Err(join_error) if join_error.is_panic() => {
            tracing::error!(tool = %name, "Tool panicked during execution");
            ToolError::Panicked
        }
        Err(_) => {
            tracing::warn!(tool = %name, "Tool task was cancelled");
            ToolError::Cancelled
        }
    };

    Err(error.to_error_object(&name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Arc<dyn Tool> {
        Arc::new(
            FnTool::new("echo", "Echo the input", |args: Value| async move { Ok(args) })
                .with_input_schema(json!({"type": "object", "properties": {"text": {"type": "string"}}})),
        )
    }

    #[test]
    fn register_and_list_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();
        registry
            .register(Arc::new(FnTool::new("second", "Another", |_| async {
                Ok(Value::Null)
            })))
            .unwrap();

        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["echo", "second"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("echo"));
    }

    #[test]
    fn reject_invalid_tools() {
        let mut registry = ToolRegistry::new();
        let unnamed = Arc::new(FnTool::new(" ", "desc", |_| async { Ok(Value::Null) }));
        assert_eq!(registry.register(unnamed), Err(RegistryError::EmptyName));

        let undescribed = Arc::new(FnTool::new("x", "", |_| async { Ok(Value::Null) }));
        assert!(matches!(
            registry.register(undescribed),
            Err(RegistryError::EmptyDescription { .. })
        ));

        registry.register(echo()).unwrap();
        assert!(matches!(
            registry.register(echo()),
            Err(RegistryError::Duplicate { .. })
        ));
    }

    #[test]
    fn definition_serialises_camel_case() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();
        let value = serde_json::to_value(registry.definitions()).unwrap();
        assert!(value[0]["inputSchema"].is_object());
        assert_eq!(value[0]["description"], "Echo the input");
    }

    #[tokio::test]
    async fn execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolNotFound.code());
    }

    #[tokio::test]
    async fn execute_contains_failures_and_panics() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(FnTool::new("fails", "Always fails", |_| async {
                Err(ToolError::failed("disk on fire"))
            })))
            .unwrap();
        registry
            .register(Arc::new(FnTool::new("picky", "Rejects input", |_| async {
                Err(ToolError::invalid_arguments("text is required"))
            })))
            .unwrap();
        registry
            .register(Arc::new(FnTool::new(
                "panics",
                "Always panics",
                |args: Value| async move {
                    assert!(args.get("never").is_some(), "tool bug");
                    Ok(args)
                },
            )))
            .unwrap();

        let err = registry.execute("fails", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError.code());
        assert!(err.message.contains("disk on fire"));
        assert_eq!(err.data.unwrap()["tool"], "fails");

        let err = registry.execute("picky", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams.code());

        let err = registry.execute("panics", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError.code());
        assert!(err.message.contains("panicked"));
    }

    #[test]
    fn tool_call_result_wraps_strings_verbatim() {
        let result = ToolCallResult::from_value(&json!("plain"));
        assert_eq!(result, ToolCallResult::text("plain"));

        let result = ToolCallResult::from_value(&json!({"echo": "hi"}));
        assert_eq!(result, ToolCallResult::text(r#"{"echo":"hi"}"#));

        let value = result.to_value();
        assert_eq!(value["content"][0]["type"], "text");
    }
}
