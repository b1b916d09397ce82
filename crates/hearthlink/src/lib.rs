//! hearthlink - the persistent link to the home-automation backend.
//!
//! Architecture: reactor pattern to avoid lock contention
//! - The WebSocket is owned by a dedicated reactor task
//! - Commands flow through an mpsc channel
//! - Responses are routed via oneshot channels keyed by command id
//!
//! Id allocation and pending-map registration both happen inside the
//! reactor task, so the allocate-and-register step is a single atomic
//! unit no matter how many sessions call in concurrently.
//!
//! Usage:
//! ```ignore
//! let link = BackendLink::spawn(LinkConfig::new(url, token));
//! let states = link.send_command(json!({"type": "get_states"})).await?;
//! ```

mod reactor;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use hearthproto::GatewayError;

/// Callback invoked for each matching backend event.
///
/// A handler returning `Err` is logged; other handlers for the same event
/// type still run and the pump is unaffected.
pub type EventHandler = Box<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Link lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection and no attempt in progress.
    Disconnected = 0,
    /// Dialing the backend.
    Connecting = 1,
    /// Transport up, credential exchange in progress.
    Authenticating = 2,
    /// Handshake complete; pump running.
    Connected = 3,
    /// Connection lost; backoff/retry in progress.
    Reconnecting = 4,
    /// Retry budget exhausted; the link will not recover on its own.
    Down = 5,
}

impl LinkState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LinkState::Disconnected,
            1 => LinkState::Connecting,
            2 => LinkState::Authenticating,
            3 => LinkState::Connected,
            4 => LinkState::Reconnecting,
            5 => LinkState::Down,
            _ => LinkState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Authenticating => "authenticating",
            LinkState::Connected => "connected",
            LinkState::Reconnecting => "reconnecting",
            LinkState::Down => "down",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared state cell; written by the reactor, read by anyone.
#[derive(Debug)]
pub(crate) struct StatusCell {
    state: AtomicU8,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(LinkState::Disconnected as u8),
        }
    }

    pub(crate) fn get(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

/// Configuration for the backend link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// WebSocket endpoint, e.g. "ws://localhost:8123/api/websocket".
    pub url: String,
    /// Access token for the connect handshake.
    pub access_token: String,
    /// Per-command response deadline.
    pub command_timeout: Duration,
    /// Deadline for dialing plus credential exchange.
    pub handshake_timeout: Duration,
    /// Reconnection attempts before the link is marked down.
    pub max_reconnect_attempts: u32,
    /// Delay before attempt N is `base * 2^N` (1s base gives 1,2,4,8,16s).
    pub reconnect_base_delay: Duration,
}

impl LinkConfig {
    pub fn new(url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: access_token.into(),
            command_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }
}

/// Command sent to the reactor task.
pub(crate) enum LinkCommand {
    /// Correlated command; the response arrives on the oneshot.
    Command {
        payload: Value,
        deadline: tokio::time::Instant,
        response_tx: oneshot::Sender<Result<Value, GatewayError>>,
    },
    /// Fire-and-forget frame.
    Message { payload: Value },
    /// Register an event handler (and subscribe downstream if this is the
    /// first handler for the type).
    Subscribe {
        event_type: String,
        handler: EventHandler,
    },
}

/// Handle to the backend link. Cheap to clone via `Arc`.
pub struct BackendLink {
    config: LinkConfig,
    cmd_tx: mpsc::Sender<LinkCommand>,
    status: Arc<StatusCell>,
    cancel: CancellationToken,
}

impl BackendLink {
    /// Spawn the supervisor/reactor task and return the handle.
    ///
    /// Connecting happens in the background; the peer does not need to be
    /// up yet. Commands issued before the link is established wait and
    /// eventually time out.
    pub fn spawn(config: LinkConfig) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let status = Arc::new(StatusCell::new());
        let cancel = CancellationToken::new();

        let core = reactor::LinkCore::new(config.clone(), cmd_rx, Arc::clone(&status), cancel.clone());
        tokio::spawn(reactor::run(core));

        Arc::new(Self {
            config,
            cmd_tx,
            status,
            cancel,
        })
    }

    /// Send a command and wait for its correlated response.
    ///
    /// The pending entry is removed on response and on deadline; repeated
    /// timeouts do not grow the pending map. While the link is
    /// reconnecting the command queues and surfaces as a timeout.
    pub async fn send_command(&self, payload: Value) -> Result<Value, GatewayError> {
        if self.status.get() == LinkState::Down {
            return Err(GatewayError::connection("backend link permanently down"));
        }

        let deadline = tokio::time::Instant::now() + self.config.command_timeout;
        let grace = deadline + Duration::from_secs(2);
        let (response_tx, response_rx) = oneshot::channel();

        // The enqueue itself is bounded too: a full reactor channel during
        // a reconnect cycle must not hold callers past their deadline.
        match tokio::time::timeout_at(
            grace,
            self.cmd_tx.send(LinkCommand::Command {
                payload,
                deadline,
                response_tx,
            }),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(GatewayError::connection("backend link unavailable")),
            Err(_) => return Err(GatewayError::Timeout(self.config.command_timeout)),
        }

        // The reactor enforces the deadline; the outer wait is a backstop
        // for commands still queued when the deadline passes.
        match tokio::time::timeout_at(grace, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::connection("backend link closed")),
            Err(_) => Err(GatewayError::Timeout(self.config.command_timeout)),
        }
    }

    /// Send a frame without waiting for a response.
    ///
    /// Requires an established connection.
    pub async fn send_message(&self, payload: Value) -> Result<(), GatewayError> {
        if self.status.get() != LinkState::Connected {
            return Err(GatewayError::connection("backend link not connected"));
        }
        self.cmd_tx
            .send(LinkCommand::Message { payload })
            .await
            .map_err(|_| GatewayError::connection("backend link unavailable"))
    }

    /// Register an event handler.
    ///
    /// Handlers accumulate; registering several for one event type fans
    /// each matching event out to all of them in registration order. After
    /// a reconnect, each distinct event type is re-subscribed exactly once.
    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: EventHandler,
    ) -> Result<(), GatewayError> {
        self.cmd_tx
            .send(LinkCommand::Subscribe {
                event_type: event_type.into(),
                handler,
            })
            .await
            .map_err(|_| GatewayError::connection("backend link unavailable"))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.status.get()
    }

    /// True once the handshake has completed and the pump is running.
    pub fn is_connected(&self) -> bool {
        self.status.get() == LinkState::Connected
    }

    /// Cancel the reactor, any reconnection sleep, and all pending waits.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for BackendLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
