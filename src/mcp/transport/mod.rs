//! Transport adapters.
//!
//! Each adapter turns its framing into [`Message`]s, feeds them to a
//! [`Dispatcher`](crate::mcp::server::Dispatcher) and writes back whatever
//! the dispatcher returns. None of them interpret the protocol.
//!
//! - [`stdio`]: newline-delimited JSON over stdin/stdout, one session.
//! - [`http`]: one JSON-RPC message per POST body.
//! - [`sse`]: a long-lived event stream per session with a companion POST
//!   endpoint for client messages.

pub mod http;
pub mod sse;
pub mod stdio;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use crate::mcp::protocol::{self, Message};

pub use http::{HttpOptions, HttpTransport};
pub use sse::{SseOptions, SseTransport};
pub use stdio::{LineTransport, StdioTransport};

/// Resolves when the process receives SIGINT or SIGTERM (Ctrl+C on Windows).
///
/// If the handlers cannot be installed the future never resolves, leaving
/// shutdown to end-of-input or the embedding application.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            return std::future::pending().await;
        }
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}

/// Builds an `application/json` response carrying one JSON-RPC message.
pub(crate) fn json_rpc_response(status: StatusCode, message: &Message) -> Response {
    match protocol::serialize(message) {
        Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
