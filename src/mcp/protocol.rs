//! JSON-RPC 2.0 message codec for the MCP protocol.
//!
//! Every frame that crosses a transport is a [`Message`]. A message is exactly
//! one of:
//!
//! - **Request**: has a `method` and an `id`, expects a response
//! - **Notification**: has a `method` and no `id`, never answered
//! - **Response**: no `method`, carries exactly one of `result` or `error`
//!
//! [`deserialize`] validates the envelope before anything reaches the
//! dispatcher; failures come back as a ready-to-send [`JsonRpcError`].
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or integers (never `null`)
//! - Batches are not supported

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// The latest MCP protocol version this implementation speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions accepted during negotiation, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[MCP_PROTOCOL_VERSION, "2024-11-05"];

/// The only accepted value of the `jsonrpc` member.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request ID.
///
/// MCP requires IDs to be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// JSON-RPC 2.0 error codes, plus the MCP tool extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object, or arrived out of order.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error (tool failures land here).
    InternalError,
    /// `tools/call` named a tool that is not registered.
    ToolNotFound,
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ToolNotFound => -32001,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ToolNotFound => "Tool not found",
        }
    }
}

/// A JSON-RPC 2.0 error object, always nested in a response's `error` member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Creates a `ParseError` (-32700) with the default message.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::from_code(ErrorCode::ParseError)
    }

    /// Creates an `InvalidRequest` (-32600) error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidRequest, message)
    }

    /// Creates a `MethodNotFound` (-32601) error naming the method.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::with_message(
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// Creates an `InvalidParams` (-32602) error.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    /// Creates an `InternalError` (-32603) error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, message)
    }

    /// Creates a `ToolNotFound` (-32001) error. The tool name is echoed in
    /// `data.tool`.
    #[must_use]
    pub fn tool_not_found(name: &str) -> Self {
        Self::with_message(ErrorCode::ToolNotFound, format!("Tool not found: {name}"))
            .with_data(serde_json::json!({ "tool": name }))
    }

    /// Returns `true` if this error carries the given code.
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.code()
    }
}

/// The finite set of methods this server understands.
///
/// Anything else is carried as [`Method::Other`] and answered with
/// `MethodNotFound` by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// `initialize`
    Initialize,
    /// `ping`
    Ping,
    /// `tools/list`
    ToolsList,
    /// `tools/call`
    ToolsCall,
    /// `notifications/initialized`
    Initialized,
    /// `notifications/cancelled`
    Cancelled,
    /// Any other well-formed method name.
    Other(String),
}

impl Method {
    /// Maps a method name onto its variant. Never fails.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "initialize" => Self::Initialize,
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "notifications/initialized" => Self::Initialized,
            "notifications/cancelled" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire name of this method.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Initialize => "initialize",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::Initialized => "notifications/initialized",
            Self::Cancelled => "notifications/cancelled",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JSON-RPC 2.0 envelope.
///
/// The `jsonrpc` member is implicit: it is validated on the way in and always
/// written as `"2.0"` on the way out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    /// Request ID. `None` on notifications and on errors for unreadable frames.
    pub id: Option<RequestId>,
    /// Method name, present on requests and notifications.
    pub method: Option<String>,
    /// Method parameters.
    pub params: Option<Value>,
    /// Successful response payload.
    pub result: Option<Value>,
    /// Error response payload.
    pub error: Option<ErrorObject>,
}

impl Message {
    /// Builds a request.
    #[must_use]
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }

    /// Builds a notification (no `id`, never answered).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }

    /// Builds a response. With neither `result` nor `error`, the result is `null`;
    /// with both, the error wins.
    #[must_use]
    pub fn response(id: Option<RequestId>, result: Option<Value>, error: Option<ErrorObject>) -> Self {
        let result = match (&error, result) {
            (Some(_), _) => None,
            (None, result) => Some(result.unwrap_or(Value::Null)),
        };
        Self {
            id,
            result,
            error,
            ..Self::default()
        }
    }

    /// Builds a success response.
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self::response(id, Some(result), None)
    }

    /// Builds an error response from a code, message and optional data.
    #[must_use]
    pub fn error_response(
        id: Option<RequestId>,
        code: ErrorCode,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let mut error = ErrorObject::with_message(code, message);
        error.data = data;
        Self::response(id, None, Some(error))
    }

    /// `method` is set (notifications included).
    #[must_use]
    pub const fn is_request(&self) -> bool {
        self.method.is_some()
    }

    /// `method` is set and `id` is not.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// `method` is unset and one of `result`/`error` is set.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        match &self.id {
            Some(id) => map.serialize_entry("id", id)?,
            // Responses always carry an id, `null` when the request's was unknown
            None if self.method.is_none() => map.serialize_entry("id", &Value::Null)?,
            None => {}
        }
        if let Some(method) = &self.method {
            map.serialize_entry("method", method)?;
        }
        if let Some(params) = &self.params {
            map.serialize_entry("params", params)?;
        }
        if let Some(result) = &self.result {
            map.serialize_entry("result", result)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

/// A decode failure, ready to be sent back as an error response.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("JSON-RPC error {}: {}", .error.code, .error.message)]
pub struct JsonRpcError {
    /// The request ID, when it could be recovered from the broken frame.
    pub id: Option<RequestId>,

    /// The error details.
    pub error: ErrorObject,

    missing_member: bool,
}

impl JsonRpcError {
    /// Creates a decode failure for the given ID.
    #[must_use]
    pub const fn new(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            id,
            error,
            missing_member: false,
        }
    }

    /// Creates a parse error (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, ErrorObject::parse_error())
    }

    /// Creates an `InvalidRequest` error for a malformed envelope.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self::new(id, ErrorObject::invalid_request(message))
    }

    /// Creates an `InvalidRequest` error for an envelope lacking a required
    /// member.
    #[must_use]
    pub fn missing_member(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self {
            missing_member: true,
            ..Self::invalid_request(id, message)
        }
    }

    /// Returns `true` if the frame was not JSON at all.
    #[must_use]
    pub fn is_parse_error(&self) -> bool {
        self.error.is(ErrorCode::ParseError)
    }

    /// Returns `true` if the frame lacked `jsonrpc`, or lacked all of
    /// `method`, `result` and `error`.
    #[must_use]
    pub const fn is_missing_member(&self) -> bool {
        self.missing_member
    }

    /// Converts into the error response to send back.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message::response(self.id, None, Some(self.error))
    }
}

/// Errors raised while encoding an outgoing message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A response may carry `result` or `error`, never both.
    #[error("message carries both result and error")]
    MixedResultAndError,

    /// JSON encoding failed.
    #[error("failed to encode message")]
    Json(#[from] serde_json::Error),
}

/// Parses and validates a raw JSON-RPC frame.
///
/// # Errors
///
/// - `ParseError` if `raw` is not valid JSON
/// - `InvalidRequest` if the envelope is malformed: wrong `jsonrpc`, bad `id`,
///   bad `method` name, a batch, or an ambiguous request/response shape
pub fn deserialize(raw: &str) -> Result<Message, JsonRpcError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| JsonRpcError::parse_error())?;
    from_value(value)
}

/// Validates an already-parsed JSON value as a JSON-RPC frame.
///
/// # Errors
///
/// See [`deserialize`].
pub fn from_value(value: Value) -> Result<Message, JsonRpcError> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => {
            return Err(JsonRpcError::invalid_request(None, "Batch requests are not supported"))
        }
        _ => {
            return Err(JsonRpcError::invalid_request(
                None,
                "Message must be a JSON object",
            ))
        }
    };

    let id = match obj.get("id") {
        None => None,
        Some(raw_id) => Some(parse_id(raw_id).ok_or_else(|| {
            JsonRpcError::invalid_request(None, "id must be a string or an integer")
        })?),
    };

    if !obj.contains_key("jsonrpc") {
        return Err(JsonRpcError::missing_member(id, "jsonrpc field is required"));
    }
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::invalid_request(
            id,
            "jsonrpc field must be \"2.0\"",
        ));
    }

    let method = match obj.remove("method") {
        None => None,
        Some(Value::String(name)) if is_valid_method_name(&name) => Some(name),
        Some(_) => {
            return Err(JsonRpcError::invalid_request(
                id,
                "method must be a well-formed method name",
            ))
        }
    };

    let params = obj.remove("params");
    if matches!(params, Some(ref p) if !(p.is_object() || p.is_array() || p.is_null())) {
        return Err(JsonRpcError::invalid_request(
            id,
            "params must be an object or an array",
        ));
    }

    let result = obj.remove("result");
    let error = match obj.remove("error") {
        None => None,
        Some(raw_error) => Some(serde_json::from_value::<ErrorObject>(raw_error).map_err(|_| {
            JsonRpcError::invalid_request(id.clone(), "error must be a JSON-RPC error object")
        })?),
    };

    if method.is_some() && (result.is_some() || error.is_some()) {
        return Err(JsonRpcError::invalid_request(
            id,
            "a request must not carry result or error",
        ));
    }
    if method.is_none() && result.is_none() && error.is_none() {
        return Err(JsonRpcError::missing_member(
            id,
            "message must carry method, result or error",
        ));
    }
    if method.is_none() && result.is_some() && error.is_some() {
        return Err(JsonRpcError::invalid_request(
            id,
            "a response must carry exactly one of result or error",
        ));
    }

    Ok(Message {
        id,
        method,
        params,
        result,
        error,
    })
}

/// Encodes a message as a single-line JSON string.
///
/// # Errors
///
/// Returns an error if the message mixes `result` and `error`, or if JSON
/// encoding fails.
pub fn serialize(message: &Message) -> Result<String, CodecError> {
    if message.result.is_some() && message.error.is_some() {
        return Err(CodecError::MixedResultAndError);
    }
    Ok(serde_json::to_string(message)?)
}

fn parse_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

/// Non-empty, free of whitespace and control characters, and outside the
/// reserved `rpc.` namespace.
fn is_valid_method_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with("rpc.")
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Validated `tools/call` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool, `{}` when omitted.
    pub arguments: Value,
}

/// Validates `tools/call` parameters.
///
/// # Errors
///
/// Returns an `InvalidParams` error object if `params` is not an object, if
/// `name` is missing or not a non-empty string, or if `arguments` is present
/// but not an object.
pub fn validate_tool_call(params: Option<&Value>) -> Result<ToolCallParams, ErrorObject> {
    let obj = params
        .and_then(Value::as_object)
        .ok_or_else(|| ErrorObject::invalid_params("tools/call params must be an object"))?;

    let name = match obj.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        _ => {
            return Err(ErrorObject::invalid_params(
                "Tool name is required and must be a non-empty string",
            ))
        }
    };

    let arguments = match obj.get("arguments") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(args @ Value::Object(_)) => args.clone(),
        Some(_) => return Err(ErrorObject::invalid_params("Tool arguments must be an object")),
    };

    Ok(ToolCallParams { name, arguments })
}
