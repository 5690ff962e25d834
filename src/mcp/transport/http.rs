//! Stateless HTTP transport.
//!
//! `POST <mcp_path>` carries one JSON-RPC message per body and answers in
//! the response body. `GET <mcp_path>` describes the server.
//!
//! # Session scope
//!
//! There is no connection to key handshake state on, so every POST shares a
//! single [`Dispatcher`]: the first `initialize` initializes the server for
//! all HTTP callers, and a second one is rejected. This endpoint serves one
//! client per process. Clients that need isolation use the SSE transport,
//! which gives each stream its own dispatcher.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::{json_rpc_response, SseTransport};
use crate::mcp::protocol::{self, JsonRpcError, MCP_PROTOCOL_VERSION};
use crate::mcp::server::{Dispatcher, McpServer};

/// Routing and limits for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    pub mcp_path: String,
    /// Largest accepted request body; larger bodies get 413.
    pub max_body_bytes: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            mcp_path: "/mcp".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Single-endpoint JSON-RPC over HTTP, optionally alongside SSE routes.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    dispatcher: Arc<Dispatcher>,
    options: Arc<HttpOptions>,
    sse: Option<SseTransport>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(server: McpServer, options: HttpOptions) -> Self {
        Self {
            dispatcher: Arc::new(server.dispatcher()),
            options: Arc::new(options),
            sse: None,
        }
    }

    /// Serves the given SSE transport's routes from the same listener.
    #[must_use]
    pub fn with_sse(mut self, sse: &SseTransport) -> Self {
        self.sse = Some(sse.clone());
        self
    }

    /// The dispatcher shared by every POST.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route(&self.options.mcp_path, post(post_message).get(server_info))
            .with_state(self.clone());

        if let Some(sse) = &self.sse {
            router = router.merge(sse.router());
        }

        router
            .layer(DefaultBodyLimit::max(self.options.max_body_bytes))
            .layer(TraceLayer::new_for_http())
    }

    /// Serves until `shutdown` resolves.
    ///
    /// Open SSE sessions are closed as soon as shutdown begins, so their
    /// streams do not hold the server open.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(
                addr = %addr,
                path = %self.options.mcp_path,
                sse = self.sse.is_some(),
                "Starting MCP HTTP server"
            );
        }

        let sse = self.sse.clone();
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                if let Some(sse) = sse {
                    sse.destroy();
                }
            })
            .await
    }
}

async fn post_message(State(transport): State<HttpTransport>, body: Bytes) -> Response {
    let decoded = std::str::from_utf8(&body)
        .map_err(|_| JsonRpcError::parse_error())
        .and_then(protocol::deserialize);

    let message = match decoded {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "Rejected malformed HTTP body");
            let status = if e.is_parse_error() || e.is_missing_member() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            return json_rpc_response(status, &e.into_message());
        }
    };

    match transport.dispatcher.dispatch(message).await {
        Some(reply) => json_rpc_response(StatusCode::OK, &reply),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn server_info(State(transport): State<HttpTransport>) -> Json<Value> {
    let server = transport.dispatcher.server();
    let info = server.info();

    let (sse_path, message_path, sessions) = match &transport.sse {
        Some(sse) => (
            Value::from(sse.options().sse_path.as_str()),
            Value::from(sse.options().message_path.as_str()),
            json!({ "open": sse.session_count(), "max": sse.options().max_sessions }),
        ),
        None => (Value::Null, Value::Null, Value::Null),
    };

    Json(json!({
        "name": info.name,
        "version": info.version,
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "status": "ok",
        "endpoints": {
            "mcp": transport.options.mcp_path,
            "sse": sse_path,
            "sseMessage": message_path,
        },
        "tools": server.tool_definitions(),
        "sessions": sessions,
    }))
}
