//! mcp-tool-server: a Model Context Protocol server core
//!
//! This library exposes a registry of callable tools to LLM-driven clients
//! over JSON-RPC 2.0.
//!
//! # Architecture
//!
//! - **Codec**: strict JSON-RPC 2.0 decoding and encoding
//! - **Dispatcher**: per-session `initialize` handshake and method routing
//! - **Registry**: named tools executed concurrently, failures contained
//! - **Transports**: stdio (line-delimited), HTTP (single endpoint) and
//!   SSE (one session per stream, capacity-limited)
//!
//! # Example
//!
//! ```
//! use mcp_tool_server::mcp::McpServer;
//! use mcp_tool_server::tools::builtin_tools;
//!
//! # tokio_test::block_on(async {
//! let server = McpServer::builder().tools(builtin_tools()).build()?;
//! let dispatcher = server.dispatcher();
//!
//! let reply = dispatcher
//!     .handle_raw(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
//!     .await
//!     .expect("requests are answered");
//! assert!(reply.result.is_some());
//! # Ok::<(), mcp_tool_server::error::RegistryError>(())
//! # }).unwrap();
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation
//! - [`tools`]: Built-in tools

pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;
