//! Error types for mcp-tool-server.
//!
//! Protocol-level failures are not errors in this sense: they are JSON-RPC
//! error responses (see [`crate::mcp::protocol`]). The types here cover
//! configuration, server construction and session bookkeeping.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised while assembling the tool registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A server must expose at least one tool.
    #[error("server requires at least one tool")]
    NoTools,

    /// Tool registered with an empty name.
    #[error("tool name must not be empty")]
    EmptyName,

    /// Tool registered without a description.
    #[error("tool '{name}' has no description")]
    EmptyDescription {
        /// Name of the offending tool.
        name: String,
    },

    /// Two tools share a name.
    #[error("tool '{name}' is already registered")]
    Duplicate {
        /// The duplicated name.
        name: String,
    },
}

/// Errors raised by the SSE session manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The configured session cap has been reached.
    #[error("session limit reached ({max} open sessions)")]
    CapacityReached {
        /// The configured maximum.
        max: usize,
    },
}
