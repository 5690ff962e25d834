//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.
//! Every section is optional; omitted fields take the defaults below.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::transport::{stdio, HttpOptions, SseOptions};

/// Root configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server identity advertised during `initialize`.
    #[serde(default)]
    pub server: ServerConfig,

    /// Which transport the binary runs.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Line transport settings.
    #[serde(default)]
    pub stdio: StdioConfig,

    /// HTTP listener and routes.
    #[serde(default)]
    pub http: HttpConfig,

    /// SSE session limits.
    #[serde(default)]
    pub sse: SseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.trim().is_empty() {
            return Err(invalid("server.name must not be empty"));
        }
        if self.stdio.delimiter.is_empty() {
            return Err(invalid("stdio.delimiter must not be empty"));
        }
        if self.stdio.max_message_bytes == 0 {
            return Err(invalid("stdio.max_message_bytes must be greater than zero"));
        }
        if self.http.max_body_bytes == 0 {
            return Err(invalid("http.max_body_bytes must be greater than zero"));
        }
        if self.sse.max_sessions == 0 {
            return Err(invalid("sse.max_sessions must be greater than zero"));
        }
        if self.sse.keep_alive_secs == 0 {
            return Err(invalid("sse.keep_alive_secs must be greater than zero"));
        }

        self.http.socket_addr()?;

        let paths = [
            ("http.mcp_path", &self.http.mcp_path),
            ("http.sse_path", &self.http.sse_path),
            ("http.message_path", &self.http.message_path),
        ];
        for (field, path) in paths {
            if !path.starts_with('/') {
                return Err(invalid(format!(
                    "{field} must start with '/', got '{path}'"
                )));
            }
        }
        for (i, (field, path)) in paths.iter().enumerate() {
            if let Some((other, _)) = paths[i + 1..].iter().find(|(_, p)| p == path) {
                return Err(invalid(format!(
                    "{field} and {other} must differ, both are '{path}'"
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}

/// Server identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Name reported in `serverInfo`.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Optional usage hints returned from `initialize`.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            instructions: None,
        }
    }
}

fn default_server_name() -> String {
    crate::mcp::server::SERVER_NAME.to_string()
}

/// Transport selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    #[default]
    Stdio,
    /// HTTP endpoint plus SSE sessions.
    Http,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// `"stdio"` or `"http"`. Default: `"stdio"`.
    #[serde(default)]
    pub mode: TransportMode,
}

/// Line transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdioConfig {
    /// Written after every outgoing message. Default: `"\n"`.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Longest accepted inbound line in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

fn default_delimiter() -> String {
    stdio::DEFAULT_DELIMITER.to_string()
}

const fn default_max_message_bytes() -> usize {
    stdio::DEFAULT_MAX_MESSAGE_BYTES
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Listen address. Default: `127.0.0.1:3000`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_mcp_path")]
    pub mcp_path: String,

    #[serde(default = "default_sse_path")]
    pub sse_path: String,

    #[serde(default = "default_message_path")]
    pub message_path: String,

    /// Largest accepted request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl HttpConfig {
    /// Parses `bind_address`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address does not parse.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address.parse().map_err(|_| {
            invalid(format!(
                "http.bind_address '{}' is not a valid socket address",
                self.bind_address
            ))
        })
    }

    #[must_use]
    pub fn options(&self) -> HttpOptions {
        HttpOptions {
            mcp_path: self.mcp_path.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            mcp_path: default_mcp_path(),
            sse_path: default_sse_path(),
            message_path: default_message_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_mcp_path() -> String {
    HttpOptions::default().mcp_path
}

fn default_sse_path() -> String {
    SseOptions::default().sse_path
}

fn default_message_path() -> String {
    SseOptions::default().message_path
}

fn default_max_body_bytes() -> usize {
    HttpOptions::default().max_body_bytes
}

/// SSE session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SseConfig {
    /// Most concurrently open sessions. Default: 100.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Seconds between keep-alive comments. Default: 15.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Close sessions idle for this many seconds; 0 disables pruning.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl SseConfig {
    /// Combines session limits with the routes from `http`.
    #[must_use]
    pub fn options(&self, http: &HttpConfig) -> SseOptions {
        SseOptions {
            sse_path: http.sse_path.clone(),
            message_path: http.message_path.clone(),
            max_sessions: self.max_sessions,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
        }
    }

    /// The idle timeout, if pruning is enabled.
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            keep_alive_secs: default_keep_alive_secs(),
            idle_timeout_secs: 0,
        }
    }
}

fn default_max_sessions() -> usize {
    SseOptions::default().max_sessions
}

const fn default_keep_alive_secs() -> u64 {
    15
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
