//! The supervisor/reactor task behind [`BackendLink`](crate::BackendLink).
//!
//! One task owns the socket, the pending-command map, and the event
//! registry. Each connection epoch runs one pump loop; when the
//! connection closes the supervisor runs exactly one reconnection cycle
//! (bounded attempts with exponential backoff) before either starting the
//! next epoch or marking the link permanently down.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use hearthproto::downstream::{auth_frame, subscribe_events, with_id};
use hearthproto::{GatewayError, InboundFrame};

use crate::{EventHandler, LinkCommand, LinkConfig, LinkState, StatusCell};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A command awaiting its correlated response.
///
/// `response_tx` is `None` for link-internal commands (subscription
/// replays) whose outcome is only logged.
struct Pending {
    response_tx: Option<oneshot::Sender<Result<Value, GatewayError>>>,
    deadline: tokio::time::Instant,
}

impl Pending {
    fn internal(deadline: tokio::time::Instant) -> Self {
        Self {
            response_tx: None,
            deadline,
        }
    }

    fn resolve(self, result: Result<Value, GatewayError>) {
        match self.response_tx {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                if let Err(e) = result {
                    debug!(error = %e, "internal command failed");
                }
            }
        }
    }
}

/// State owned by the supervisor task.
pub(crate) struct LinkCore {
    config: LinkConfig,
    cmd_rx: mpsc::Receiver<LinkCommand>,
    status: std::sync::Arc<StatusCell>,
    cancel: CancellationToken,
    /// Event registry; survives across connection epochs so handlers can
    /// be replayed after a reconnect.
    handlers: HashMap<String, Vec<EventHandler>>,
}

impl LinkCore {
    pub(crate) fn new(
        config: LinkConfig,
        cmd_rx: mpsc::Receiver<LinkCommand>,
        status: std::sync::Arc<StatusCell>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            cmd_rx,
            status,
            cancel,
            handlers: HashMap::new(),
        }
    }
}

enum EpochEnd {
    /// Connection lost; hand off to reconnection.
    Closed,
    /// Cancelled or handle dropped; no reconnection.
    Shutdown,
}

/// Supervisor entry point.
pub(crate) async fn run(mut core: LinkCore) {
    debug!("backend link supervisor started");

    let mut ws = {
        let first = establish(&core.config, &core.status).await;
        match first {
            Ok(ws) => Some(ws),
            Err(e) => {
                warn!(error = %e, "initial backend connection failed");
                None
            }
        }
    };

    loop {
        let stream = match ws.take() {
            Some(stream) => stream,
            None => match reconnect(&mut core).await {
                Some(stream) => stream,
                None => {
                    if core.cancel.is_cancelled() {
                        core.status.set(LinkState::Disconnected);
                        debug!("backend link supervisor cancelled");
                    } else {
                        core.status.set(LinkState::Down);
                        error!(
                            attempts = core.config.max_reconnect_attempts,
                            "backend link permanently down, giving up"
                        );
                    }
                    return;
                }
            },
        };

        core.status.set(LinkState::Connected);
        info!(url = %core.config.url, "backend link established");

        match pump_epoch(&mut core, stream).await {
            EpochEnd::Shutdown => {
                core.status.set(LinkState::Disconnected);
                debug!("backend link supervisor exiting");
                return;
            }
            EpochEnd::Closed => {
                // Loop back into reconnection; exactly one cycle per
                // disconnect since the pump has already exited.
            }
        }
    }
}

/// One reconnection cycle: bounded attempts with exponential backoff.
async fn reconnect(core: &mut LinkCore) -> Option<WsStream> {
    core.status.set(LinkState::Reconnecting);

    for attempt in 0..core.config.max_reconnect_attempts {
        let delay = backoff_delay(core.config.reconnect_base_delay, attempt);
        tokio::select! {
            _ = core.cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        info!(
            attempt = attempt + 1,
            max = core.config.max_reconnect_attempts,
            "attempting backend reconnection"
        );

        match establish(&core.config, &core.status).await {
            Ok(ws) => return Some(ws),
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "reconnection attempt failed");
                core.status.set(LinkState::Reconnecting);
            }
        }
    }

    None
}

/// Dial the backend and run the credential handshake.
///
/// Fails closed: anything other than auth_required → auth → auth_ok
/// leaves no half-authenticated connection behind.
async fn establish(config: &LinkConfig, status: &StatusCell) -> Result<WsStream, GatewayError> {
    status.set(LinkState::Connecting);

    let dial = tokio::time::timeout(config.handshake_timeout, connect_async(config.url.as_str()));
    let (mut ws, _response) = dial
        .await
        .map_err(|_| GatewayError::connection("timed out dialing backend"))?
        .map_err(|e| GatewayError::connection(format!("dial failed: {e}")))?;

    status.set(LinkState::Authenticating);

    match InboundFrame::classify(read_json_frame(&mut ws, config.handshake_timeout).await?) {
        InboundFrame::AuthRequired => {}
        other => {
            return Err(GatewayError::protocol(format!(
                "expected auth_required from backend, got {other:?}"
            )))
        }
    }

    let credentials = auth_frame(&config.access_token).to_string();
    ws.send(Message::Text(credentials.into()))
        .await
        .map_err(|e| GatewayError::connection(format!("failed to send credentials: {e}")))?;

    match InboundFrame::classify(read_json_frame(&mut ws, config.handshake_timeout).await?) {
        InboundFrame::AuthOk => Ok(ws),
        InboundFrame::AuthInvalid { message } => Err(GatewayError::auth(message)),
        other => Err(GatewayError::auth(format!(
            "backend rejected credentials: {other:?}"
        ))),
    }
}

/// Read the next text frame as JSON, within the handshake deadline.
async fn read_json_frame(ws: &mut WsStream, deadline: Duration) -> Result<Value, GatewayError> {
    let read = async {
        while let Some(msg) = ws.next().await {
            let msg = msg.map_err(|e| GatewayError::connection(e.to_string()))?;
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text)
                    .map_err(|e| GatewayError::protocol(format!("bad handshake frame: {e}")));
            }
        }
        Err(GatewayError::connection("backend closed during handshake"))
    };

    tokio::time::timeout(deadline, read)
        .await
        .map_err(|_| GatewayError::connection("handshake timed out"))?
}

/// One connection epoch: replay subscriptions, then pump until closed.
async fn pump_epoch(core: &mut LinkCore, ws: WsStream) -> EpochEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let mut next_id: u64 = 1;

    let mut cleanup = tokio::time::interval(Duration::from_secs(1));
    cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Split borrows so select arms and bodies touch disjoint fields.
    let LinkCore {
        config,
        cmd_rx,
        cancel,
        handlers,
        ..
    } = core;

    // Re-issue one subscription per distinct event type for this epoch.
    for event_type in handlers.keys().cloned().collect::<Vec<_>>() {
        let id = next_id;
        next_id += 1;
        let frame = with_id(id, subscribe_events(&event_type));
        if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
            warn!("connection lost while replaying event subscriptions");
            fail_pending(&mut pending, "connection closed");
            return EpochEnd::Closed;
        }
        pending.insert(
            id,
            Pending::internal(tokio::time::Instant::now() + config.command_timeout),
        );
        debug!(event_type = %event_type, "subscribed to backend events");
    }

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!(pending = pending.len(), "backend link shutting down");
                fail_pending(&mut pending, "link shutting down");
                return EpochEnd::Shutdown;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(LinkCommand::Command { payload, deadline, response_tx }) => {
                        let id = next_id;
                        next_id += 1;
                        let frame = with_id(id, payload);
                        trace!(id, "sending command");
                        if let Err(e) = ws_tx.send(Message::Text(frame.to_string().into())).await {
                            warn!(id, error = %e, "command send failed");
                            let _ = response_tx.send(Err(GatewayError::connection(
                                format!("send failed: {e}"),
                            )));
                            fail_pending(&mut pending, "connection closed");
                            return EpochEnd::Closed;
                        }
                        pending.insert(id, Pending { response_tx: Some(response_tx), deadline });
                        trace!(id, outstanding = pending.len(), "command registered");
                    }
                    Some(LinkCommand::Message { payload }) => {
                        if let Err(e) = ws_tx.send(Message::Text(payload.to_string().into())).await {
                            warn!(error = %e, "message send failed");
                            fail_pending(&mut pending, "connection closed");
                            return EpochEnd::Closed;
                        }
                    }
                    Some(LinkCommand::Subscribe { event_type, handler }) => {
                        let first = !handlers.contains_key(&event_type);
                        handlers.entry(event_type.clone()).or_default().push(handler);
                        if first {
                            let id = next_id;
                            next_id += 1;
                            let frame = with_id(id, subscribe_events(&event_type));
                            if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                                warn!("connection lost while subscribing");
                                fail_pending(&mut pending, "connection closed");
                                return EpochEnd::Closed;
                            }
                            pending.insert(
                                id,
                                Pending::internal(tokio::time::Instant::now() + config.command_timeout),
                            );
                            debug!(event_type = %event_type, "subscribed to backend events");
                        }
                    }
                    None => {
                        debug!("link handle dropped, reactor exiting");
                        fail_pending(&mut pending, "link handle dropped");
                        return EpochEnd::Shutdown;
                    }
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(value) => dispatch_frame(handlers, &mut pending, value),
                            Err(e) => warn!(error = %e, "undecodable frame from backend"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("backend connection closed");
                        fail_pending(&mut pending, "connection closed");
                        return EpochEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) if is_closed(&e) => {
                        warn!(error = %e, "backend connection lost");
                        fail_pending(&mut pending, "connection closed");
                        return EpochEnd::Closed;
                    }
                    Some(Err(e)) => {
                        // Non-fatal read error; the pump keeps going.
                        warn!(error = %e, "error reading backend frame");
                    }
                }
            }

            _ = cleanup.tick() => {
                expire_pending(&mut pending, config.command_timeout);
            }
        }
    }
}

/// Route an inbound frame: resolve a pending command, fan an event out to
/// its handlers, or drop it.
fn dispatch_frame(
    handlers: &HashMap<String, Vec<EventHandler>>,
    pending: &mut HashMap<u64, Pending>,
    frame: Value,
) {
    match InboundFrame::classify(frame) {
        InboundFrame::Response { id, body } => match pending.remove(&id) {
            Some(entry) => {
                trace!(id, "resolved command");
                entry.resolve(Ok(body));
            }
            None => debug!(id, outstanding = pending.len(), "discarding orphan response"),
        },
        InboundFrame::Event { event_type, event } => {
            let Some(registered) = handlers.get(&event_type) else {
                trace!(event_type = %event_type, "no handlers for event");
                return;
            };
            for (index, handler) in registered.iter().enumerate() {
                if let Err(e) = handler(&event) {
                    warn!(event_type = %event_type, handler = index, error = %e, "event handler failed");
                }
            }
        }
        other => trace!(frame = ?other, "ignoring backend frame"),
    }
}

/// Fail every outstanding command with a connection error.
fn fail_pending(pending: &mut HashMap<u64, Pending>, reason: &str) {
    for (id, entry) in pending.drain() {
        trace!(id, "failing pending command: {reason}");
        entry.resolve(Err(GatewayError::connection(reason)));
    }
}

/// Remove and fail commands whose deadline has passed.
fn expire_pending(pending: &mut HashMap<u64, Pending>, timeout: Duration) {
    let now = tokio::time::Instant::now();
    let expired: Vec<u64> = pending
        .iter()
        .filter(|(_, entry)| now >= entry.deadline)
        .map(|(id, _)| *id)
        .collect();

    for id in expired {
        if let Some(entry) = pending.remove(&id) {
            debug!(id, "command timed out");
            entry.resolve(Err(GatewayError::Timeout(timeout)));
        }
    }
}

/// Delay before reconnection attempt N (zero-based): `base * 2^N`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt)
}

/// True for read errors that mean the connection is gone.
fn is_closed(e: &WsError) -> bool {
    matches!(
        e,
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) | WsError::Protocol(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression_from_one_second_base() {
        let base = Duration::from_secs(1);
        let delays: Vec<u64> = (0..5).map(|n| backoff_delay(base, n).as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16]);
    }
}
