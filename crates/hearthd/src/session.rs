//! Session registry with capacity admission.
//!
//! Sessions are created by the SSE handler, owned here, and destroyed
//! exactly once by their pump task. Admission reserves a slot atomically
//! so the live-session count never exceeds capacity, even under
//! concurrent connects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::response::sse::Event;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Sender half of a session's SSE channel.
pub type SseSender = mpsc::Sender<Result<Event, axum::Error>>;

/// One upstream client connection.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub authenticated: bool,
    pub created_at: Instant,
    pub last_activity: Instant,
    /// Server→client push channel.
    pub tx: SseSender,
    /// Client→server queue feeding the session's pump.
    pub inbound: mpsc::Sender<Value>,
}

impl Session {
    pub fn new(id: String, tx: SseSender, inbound: mpsc::Sender<Value>) -> Self {
        let now = Instant::now();
        Self {
            id,
            authenticated: false,
            created_at: now,
            last_activity: now,
            tx,
            inbound,
        }
    }
}

/// Snapshot of registry state for the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub total: usize,
    pub authenticated: usize,
}

/// Concurrent session store.
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    live: AtomicUsize,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Admit a session if a slot is free.
    ///
    /// The slot is reserved before the insert, so a burst of connects at
    /// capacity sees at most `capacity` admissions.
    pub fn admit(&self, session: Session) -> bool {
        let reserved = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            return false;
        }

        debug!(session_id = %session.id, "session admitted");
        self.sessions.insert(session.id.clone(), session);
        true
    }

    /// Remove a session, freeing its slot. Safe to call more than once.
    pub fn remove(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            self.live.fetch_sub(1, Ordering::SeqCst);
            debug!(session_id = %id, "session removed");
        }
    }

    pub fn touch(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.last_activity = Instant::now();
        }
    }

    pub fn set_authenticated(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.authenticated = true;
        }
    }

    pub fn is_authenticated(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .map(|s| s.authenticated)
            .unwrap_or(false)
    }

    /// Clone of the session's inbound queue sender, if the session is live.
    pub fn inbound_sender(&self, id: &str) -> Option<mpsc::Sender<Value>> {
        self.sessions.get(id).map(|s| s.inbound.clone())
    }

    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            total: 0,
            authenticated: 0,
        };
        for session in self.sessions.iter() {
            stats.total += 1;
            if session.authenticated {
                stats.authenticated += 1;
            }
        }
        stats
    }
}
