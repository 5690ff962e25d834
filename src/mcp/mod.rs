//! Model Context Protocol (MCP) server core.
//!
//! Exposes a registry of tools to MCP clients over JSON-RPC 2.0.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │   │  Transport  │───▶│ Dispatcher  │───▶│  Registry   │      │
//! │   │ stdio/http/ │    │ (handshake, │    │   (tools)   │      │
//! │   │    sse      │    │  routing)   │    │             │      │
//! │   └─────────────┘    └─────────────┘    └─────────────┘      │
//! │          │                  │                  │             │
//! │          ▼                  ▼                  ▼             │
//! │   ┌──────────────────────────────────────────────────┐       │
//! │   │            JSON-RPC Messages (protocol)          │       │
//! │   └──────────────────────────────────────────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`McpServer`] is built once and shared. Each logical connection gets
//! its own [`Dispatcher`]: one per process for stdio, one for the whole
//! HTTP endpoint, one per stream for SSE (managed by [`SessionManager`]).
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-03-26 and also
//! accepts 2024-11-05.

pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use protocol::{ErrorCode, ErrorObject, JsonRpcError, Message, RequestId, MCP_PROTOCOL_VERSION};
pub use registry::{FnTool, Tool, ToolError, ToolRegistry};
pub use server::{Dispatcher, McpServer, McpServerBuilder};
pub use session::SessionManager;
pub use transport::{HttpTransport, SseTransport, StdioTransport};
