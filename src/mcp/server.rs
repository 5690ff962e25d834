//! MCP server core and per-session dispatcher.
//!
//! [`McpServer`] is the immutable part shared by every connection: server
//! identity plus the tool registry. It is cheap to clone.
//!
//! [`Dispatcher`] is one logical session. It owns the `initialized` flag and
//! moves through the lifecycle exactly once:
//!
//! 1. **Uninitialized**: only `initialize` is accepted
//! 2. **Initialized**: `ping`, `tools/list` and `tools/call` are served
//!
//! Routing ([`Dispatcher::route`]) is synchronous. The session state lock is
//! never held across an `.await`, so the check-and-set on `initialize` is
//! atomic while tool executions ([`PendingCall::run`]) proceed concurrently.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::mcp::protocol::{
    self, validate_tool_call, ErrorObject, Message, Method, RequestId, MCP_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::registry::{run_tool, Tool, ToolCallResult, ToolDefinition, ToolRegistry};

/// Default server name for capability negotiation.
pub const SERVER_NAME: &str = "mcp-tool-server";

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// The registry is fixed at construction, so this is always `false`.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Server information for the initialisation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// Parameters for the initialize request. Every member is optional, but a
/// `clientInfo` that is present must carry both `name` and `version`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    #[serde(default)]
    protocol_version: Option<String>,
    #[serde(default)]
    capabilities: Option<Value>,
    #[serde(default)]
    client_info: Option<ClientInfo>,
}

impl InitializeParams {
    fn parse(params: Option<Value>) -> Result<Self, ErrorObject> {
        match params {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(params) => serde_json::from_value(params).map_err(|e| {
                ErrorObject::invalid_params(format!("Invalid initialize params: {e}"))
            }),
        }
    }
}

/// Picks the requested protocol version when supported, otherwise the latest.
fn negotiate_protocol(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|r| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|v| **v == r))
        .copied()
        .unwrap_or(MCP_PROTOCOL_VERSION)
}

/// Per-connection handshake state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Set once by a successful `initialize`.
    pub initialized: bool,
    /// The client's self-description from `initialize`.
    pub client_info: Option<ClientInfo>,
    /// Capabilities the client announced.
    pub capabilities: Option<Value>,
    /// The negotiated protocol version.
    pub protocol_version: Option<String>,
}

#[derive(Debug)]
struct ServerCore {
    info: ServerInfo,
    instructions: Option<String>,
    registry: ToolRegistry,
}

/// The shared, read-only part of the server.
#[derive(Debug, Clone)]
pub struct McpServer {
    core: Arc<ServerCore>,
}

impl McpServer {
    /// Starts building a server.
    #[must_use]
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::default()
    }

    /// Name and version reported in the `initialize` result.
    #[must_use]
    pub fn info(&self) -> &ServerInfo {
        &self.core.info
    }

    /// Usage instructions sent to clients on `initialize`, if configured.
    #[must_use]
    pub fn instructions(&self) -> Option<&str> {
        self.core.instructions.as_deref()
    }

    /// The registered tools.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.core.registry
    }

    /// Tool definitions in registration order, as served by `tools/list`.
    #[must_use]
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.core.registry.definitions()
    }

    /// Creates a fresh, uninitialized session over this server.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.clone())
    }
}

/// Builds an [`McpServer`].
#[derive(Default)]
pub struct McpServerBuilder {
    info: ServerInfo,
    instructions: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
}

impl McpServerBuilder {
    /// Sets the server name. Defaults to [`SERVER_NAME`].
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    /// Sets the reported version. Defaults to the crate version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.info.version = version.into();
        self
    }

    /// Sets the instructions returned from `initialize`.
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Adds a tool.
    #[must_use]
    pub fn tool(self, tool: impl Tool) -> Self {
        self.shared_tool(Arc::new(tool))
    }

    /// Adds a tool that is already behind an `Arc`.
    #[must_use]
    pub fn shared_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Adds several tools, keeping their order.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Validates the tool set and freezes the server.
    ///
    /// # Errors
    ///
    /// Fails when no tools were added or when any tool is rejected by
    /// [`ToolRegistry::register`].
    pub fn build(self) -> Result<McpServer, RegistryError> {
        if self.tools.is_empty() {
            return Err(RegistryError::NoTools);
        }

        let mut registry = ToolRegistry::new();
        for tool in self.tools {
            registry.register(tool)?;
        }

        info!(
            name = %self.info.name,
            tools = registry.len(),
            "MCP server constructed"
        );

        Ok(McpServer {
            core: Arc::new(ServerCore {
                info: self.info,
                instructions: self.instructions,
                registry,
            }),
        })
    }
}

/// The outcome of routing one message.
pub enum Routed {
    /// Answer immediately.
    Reply(Message),
    /// Nothing to send (notifications, client responses).
    Silent,
    /// A tool must run; the answer comes from [`PendingCall::run`].
    Call(PendingCall),
}

/// A validated `tools/call`, ready to execute outside the session lock.
pub struct PendingCall {
    id: Option<RequestId>,
    tool: Arc<dyn Tool>,
    arguments: Value,
}

impl PendingCall {
    /// Name of the tool about to run.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    /// ID of the originating request; `None` for a notification.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// Executes the tool. Returns `None` when the call was a notification.
    pub async fn run(self) -> Option<Message> {
        let name = self.tool.name().to_string();
        let outcome = run_tool(self.tool, self.arguments).await;

        let Some(id) = self.id else {
            if let Err(error) = outcome {
                debug!(tool = %name, error = %error.message, "Dropping tool failure for notification");
            }
            return None;
        };

        Some(match outcome {
            Ok(value) => Message::success(Some(id), ToolCallResult::from_value(&value).to_value()),
            Err(error) => Message::response(Some(id), None, Some(error)),
        })
    }
}

/// One logical MCP session: the handshake state machine plus method routing.
#[derive(Debug)]
pub struct Dispatcher {
    server: McpServer,
    state: Mutex<SessionState>,
}

impl Dispatcher {
    /// Creates an uninitialized session over `server`.
    #[must_use]
    pub fn new(server: McpServer) -> Self {
        Self {
            server,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// The server this session dispatches to.
    #[must_use]
    pub const fn server(&self) -> &McpServer {
        &self.server
    }

    /// Returns `true` once `initialize` has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    /// A snapshot of the session state.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decodes a raw frame and dispatches it.
    ///
    /// Decode failures are answered with an error response without touching
    /// the session.
    pub async fn handle_raw(&self, raw: &str) -> Option<Message> {
        match protocol::deserialize(raw) {
            Ok(message) => self.dispatch(message).await,
            Err(error) => {
                debug!(error = %error, "Rejected malformed frame");
                Some(error.into_message())
            }
        }
    }

    /// Routes a message and, for `tools/call`, waits for the tool.
    pub async fn dispatch(&self, message: Message) -> Option<Message> {
        match self.route(message) {
            Routed::Reply(reply) => Some(reply),
            Routed::Silent => None,
            Routed::Call(call) => call.run().await,
        }
    }

    /// Checks session state and routes by method without suspending.
    pub fn route(&self, message: Message) -> Routed {
        let Some(name) = message.method else {
            debug!(id = ?message.id, "Ignoring response sent by client");
            return Routed::Silent;
        };

        let method = Method::parse(&name);
        let id = message.id;

        match self.route_method(id.as_ref(), &method, message.params) {
            Ok(routed) => routed,
            Err(error) => match id {
                Some(id) => Routed::Reply(Message::response(Some(id), None, Some(error))),
                None => {
                    warn!(
                        method = %method,
                        error = %error.message,
                        "Notification failed; no response sent"
                    );
                    Routed::Silent
                }
            },
        }
    }

    fn route_method(
        &self,
        id: Option<&RequestId>,
        method: &Method,
        params: Option<Value>,
    ) -> Result<Routed, ErrorObject> {
        let reply = |result: Value| match id {
            Some(id) => Routed::Reply(Message::success(Some(id.clone()), result)),
            None => Routed::Silent,
        };

        match method {
            Method::Initialize => self.initialize(id, params).map(reply),
            _ if !self.is_initialized() => Err(ErrorObject::invalid_request("Server not initialized")),
            Method::Ping => Ok(reply(json!({}))),
            Method::ToolsList => Ok(reply(json!({ "tools": self.server.tool_definitions() }))),
            Method::ToolsCall => {
                let call = validate_tool_call(params.as_ref())?;
                let tool = self
                    .server
                    .registry()
                    .get(&call.name)
                    .ok_or_else(|| ErrorObject::tool_not_found(&call.name))?;
                debug!(tool = %call.name, id = ?id, "Dispatching tool call");
                Ok(Routed::Call(PendingCall {
                    id: id.cloned(),
                    tool,
                    arguments: call.arguments,
                }))
            }
            Method::Initialized | Method::Cancelled if id.is_none() => {
                debug!(method = %method, "Received notification");
                Ok(Routed::Silent)
            }
            Method::Initialized | Method::Cancelled => Err(ErrorObject::method_not_found(method.as_str())),
            Method::Other(name) => Err(ErrorObject::method_not_found(name)),
        }
    }

    fn initialize(&self, id: Option<&RequestId>, params: Option<Value>) -> Result<Value, ErrorObject> {
        if id.is_none() {
            return Err(ErrorObject::invalid_request(
                "initialize must be sent as a request",
            ));
        }

        let mut state = self.state();
        if state.initialized {
            return Err(ErrorObject::invalid_request("Server already initialized"));
        }

        let params = InitializeParams::parse(params)?;
        let negotiated = negotiate_protocol(params.protocol_version.as_deref());

        state.initialized = true;
        state.client_info = params.client_info;
        state.capabilities = params.capabilities;
        state.protocol_version = Some(negotiated.to_string());

        info!(
            client = state.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            protocol_version = negotiated,
            "Session initialized"
        );
        drop(state);

        let mut result = json!({
            "protocolVersion": negotiated,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": self.server.info(),
        });
        if let Some(instructions) = self.server.instructions() {
            result["instructions"] = json!(instructions);
        }
        Ok(result)
    }
}
