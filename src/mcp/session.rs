//! Session bookkeeping for the SSE transport.
//!
//! Every open SSE stream owns one [`Dispatcher`] (its own handshake state)
//! and the sending half of an event channel. The manager enforces the
//! `max_sessions` cap by outright rejection; there is no queueing.
//!
//! A session leaves the table on explicit close, when its stream is dropped,
//! when it is pruned for inactivity, or on [`SessionManager::destroy`].
//! Removing the entry drops the sender, which ends the client's stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::mcp::server::{Dispatcher, McpServer};

/// One server-sent event, transport-neutral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// SSE `event:` field.
    pub event: String,
    /// SSE `data:` payload.
    pub data: String,
}

/// A newly opened session: its id and the stream of events to deliver.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: String,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Read-only view of a session for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub open: bool,
    pub initialized: bool,
}

struct SseSession {
    dispatcher: Arc<Dispatcher>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl SseSession {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Capacity-limited table of open SSE sessions.
pub struct SessionManager {
    server: McpServer,
    max_sessions: usize,
    sessions: Mutex<HashMap<String, SseSession>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(server: McpServer, max_sessions: usize) -> Self {
        Self {
            server,
            max_sessions,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SseSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a new session with a fresh, uninitialized dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CapacityReached`] once `max_sessions` sessions
    /// are open.
    pub fn create_session(&self) -> Result<SessionHandle, SessionError> {
        let mut sessions = self.lock();
        if sessions.len() >= self.max_sessions {
            warn!(max = self.max_sessions, "Rejecting SSE session: limit reached");
            return Err(SessionError::CapacityReached {
                max: self.max_sessions,
            });
        }

        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let (sender, events) = mpsc::unbounded_channel();
        let now = Utc::now();
        sessions.insert(
            id.clone(),
            SseSession {
                dispatcher: Arc::new(self.server.dispatcher()),
                created_at: now,
                last_activity_at: now,
                sender,
            },
        );

        info!(session_id = %id, open = sessions.len(), "SSE session opened");
        Ok(SessionHandle { id, events })
    }

    /// Returns the session's dispatcher and records activity.
    ///
    /// `None` if the session is unknown or its stream has gone away.
    #[must_use]
    pub fn dispatcher(&self, id: &str) -> Option<Arc<Dispatcher>> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(id)?;
        if !session.is_open() {
            sessions.remove(id);
            debug!(session_id = %id, "Dropped session whose stream had closed");
            return None;
        }
        session.last_activity_at = Utc::now();
        Some(Arc::clone(&session.dispatcher))
    }

    /// Pushes an event to an open session. `false` if the session is unknown
    /// or closed, or if the event cannot be framed as SSE.
    ///
    /// Event names may not contain line breaks and data may not contain a
    /// carriage return; such events are refused and the session stays open.
    pub fn send_to_session(&self, id: &str, event: &str, data: impl Into<String>) -> bool {
        let data = data.into();
        if event.contains(['\n', '\r']) || data.contains('\r') {
            warn!(session_id = %id, event = ?event, "Refused event that cannot be framed as SSE");
            return false;
        }

        let mut sessions = self.lock();
        let Some(session) = sessions.get(id) else {
            return false;
        };

        let delivered = session
            .sender
            .send(SessionEvent {
                event: event.to_string(),
                data,
            })
            .is_ok();

        if !delivered {
            sessions.remove(id);
            debug!(session_id = %id, "Dropped session whose stream had closed");
        }
        delivered
    }

    /// Closes a session. `false` if it was not found.
    pub fn close_session(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            info!(session_id = %id, "SSE session closed");
        }
        removed
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Ids of all open sessions, sorted.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn session(&self, id: &str) -> Option<SessionSnapshot> {
        self.lock().get(id).map(|session| SessionSnapshot {
            id: id.to_string(),
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            open: session.is_open(),
            initialized: session.dispatcher.is_initialized(),
        })
    }

    /// Closes sessions with no activity for longer than `max_idle`, and any
    /// whose stream has already gone away. Returns how many were removed.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let Ok(max_idle) = TimeDelta::from_std(max_idle) else {
            return 0;
        };
        let cutoff = Utc::now() - max_idle;

        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = session.is_open() && session.last_activity_at >= cutoff;
            if !keep {
                debug!(session_id = %id, "Pruning idle SSE session");
            }
            keep
        });
        let pruned = before - sessions.len();
        drop(sessions);

        if pruned > 0 {
            info!(pruned, "Pruned idle SSE sessions");
        }
        pruned
    }

    /// Closes every session.
    pub fn destroy(&self) {
        let closed = {
            let mut sessions = self.lock();
            let closed = sessions.len();
            sessions.clear();
            closed
        };
        if closed > 0 {
            info!(closed, "Closed all SSE sessions");
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_sessions", &self.max_sessions)
            .field("open", &self.session_count())
            .finish_non_exhaustive()
    }
}
