//! Server-Sent Events transport.
//!
//! `GET <sse_path>` opens a stream and a new session. The first event is
//! `endpoint`, whose data is the URL to POST messages to
//! (`<message_path>?sessionId=<id>`). Responses are pushed to the stream as
//! `message` events; the POST itself only acknowledges receipt with 202.
//!
//! `DELETE <sse_path>?sessionId=<id>` closes a session explicitly. Dropping
//! the stream (client disconnect) closes it too.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::json_rpc_response;
use crate::error::SessionError;
use crate::mcp::protocol::{self, JsonRpcError, Message};
use crate::mcp::server::{McpServer, Routed};
use crate::mcp::session::{SessionEvent, SessionHandle, SessionManager};

/// Event name carrying the message endpoint.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// Event name carrying JSON-RPC responses.
pub const MESSAGE_EVENT: &str = "message";

/// Routing and capacity settings for the SSE transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseOptions {
    pub sse_path: String,
    pub message_path: String,
    pub max_sessions: usize,
    /// Interval between keep-alive comments on idle streams.
    pub keep_alive: Duration,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            sse_path: "/mcp/sse".to_string(),
            message_path: "/mcp/sse/message".to_string(),
            max_sessions: 100,
            keep_alive: Duration::from_secs(15),
        }
    }
}

/// Session-multiplexed transport over Server-Sent Events.
///
/// Cloning is cheap; clones share the same session table.
#[derive(Debug, Clone)]
pub struct SseTransport {
    sessions: Arc<SessionManager>,
    options: Arc<SseOptions>,
}

impl SseTransport {
    #[must_use]
    pub fn new(server: McpServer, options: SseOptions) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(server, options.max_sessions)),
            options: Arc::new(options),
        }
    }

    #[must_use]
    pub fn options(&self) -> &SseOptions {
        &self.options
    }

    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Opens a session without an HTTP stream attached.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CapacityReached`] at the session cap.
    pub fn create_session(&self) -> Result<SessionHandle, SessionError> {
        self.sessions.create_session()
    }

    /// Closes a session, ending its stream. `false` if it was not found.
    pub fn close_session(&self, id: &str) -> bool {
        self.sessions.close_session(id)
    }

    /// Pushes an event to a session's stream.
    ///
    /// See [`SessionManager::send_to_session`].
    pub fn send_to_session(&self, id: &str, event: &str, data: impl Into<String>) -> bool {
        self.sessions.send_to_session(id, event, data)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.session_count()
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.session_ids()
    }

    /// Closes every session, ending their streams.
    pub fn destroy(&self) {
        self.sessions.destroy();
    }

    /// Periodically prunes sessions idle for longer than `max_idle`.
    ///
    /// The task stops by itself once the transport has been dropped.
    #[must_use]
    pub fn spawn_idle_sweeper(&self, max_idle: Duration) -> JoinHandle<()> {
        let sessions: Weak<SessionManager> = Arc::downgrade(&self.sessions);
        let period = (max_idle / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(sessions) = sessions.upgrade() else {
                    break;
                };
                sessions.prune_idle(max_idle);
            }
        })
    }

    /// Routes for the stream, message and close endpoints.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.options.sse_path,
                get(open_stream).delete(delete_session),
            )
            .route(&self.options.message_path, post(post_message))
            .with_state(self.clone())
    }
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

impl SessionQuery {
    fn id(self) -> Option<String> {
        self.session_id.filter(|id| !id.is_empty())
    }
}

/// The event stream for one session. Closes the session when dropped.
struct SessionStream {
    id: String,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    sessions: Arc<SessionManager>,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events
            .poll_recv(cx)
            .map(|event| event.map(|e| Ok(Event::default().event(e.event).data(e.data))))
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if self.sessions.close_session(&self.id) {
            debug!(session_id = %self.id, "SSE client disconnected");
        }
    }
}

async fn open_stream(State(transport): State<SseTransport>) -> Response {
    let handle = match transport.create_session() {
        Ok(handle) => handle,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    };

    let endpoint = format!("{}?sessionId={}", transport.options.message_path, handle.id);
    transport.send_to_session(&handle.id, ENDPOINT_EVENT, endpoint);

    let stream = SessionStream {
        id: handle.id,
        events: handle.events,
        sessions: Arc::clone(&transport.sessions),
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(transport.options.keep_alive))
        .into_response()
}

async fn post_message(
    State(transport): State<SseTransport>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let Some(id) = query.id() else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };
    let Some(dispatcher) = transport.sessions.dispatcher(&id) else {
        return (StatusCode::BAD_REQUEST, "Unknown or closed session").into_response();
    };

    let decoded = std::str::from_utf8(&body)
        .map_err(|_| JsonRpcError::parse_error())
        .and_then(protocol::deserialize);

    match decoded {
        Err(e) if e.is_parse_error() => {
            return json_rpc_response(StatusCode::BAD_REQUEST, &e.into_message());
        }
        Err(e) => deliver(&transport.sessions, &id, &e.into_message()),
        Ok(message) => match dispatcher.route(message) {
            Routed::Reply(reply) => deliver(&transport.sessions, &id, &reply),
            Routed::Silent => {}
            Routed::Call(call) => {
                let sessions = Arc::clone(&transport.sessions);
                tokio::spawn(async move {
                    if let Some(reply) = call.run().await {
                        deliver(&sessions, &id, &reply);
                    }
                });
            }
        },
    }

    (StatusCode::ACCEPTED, "Accepted").into_response()
}

async fn delete_session(
    State(transport): State<SseTransport>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(id) = query.id() else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };
    if transport.close_session(&id) {
        StatusCode::ACCEPTED.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Unknown session").into_response()
    }
}

fn deliver(sessions: &SessionManager, id: &str, message: &Message) {
    match protocol::serialize(message) {
        Ok(data) => {
            if !sessions.send_to_session(id, MESSAGE_EVENT, data) {
                warn!(session_id = %id, "Session closed before its response was delivered");
            }
        }
        Err(e) => warn!(session_id = %id, error = %e, "Failed to serialize response"),
    }
}
