//! SSE transport: connection admission, handshake, and the per-session
//! message pump.
//!
//! Each admitted connection gets one pump task that owns the session's
//! lifecycle: handshake, credential evaluation, then a loop racing the
//! inbound queue against the keepalive timer. Every exit path removes
//! the session from the registry.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use hearthproto::ServerMessage;

use crate::auth::bearer_token;
use crate::serve::GatewayState;
use crate::session::{Session, SseSender};

/// Handle `GET /sse`.
///
/// At or over capacity the reply is 503 with an empty body and no
/// session state is created.
pub async fn sse_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<Result<Event, axum::Error>>(32);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(32);

    let session = Session::new(session_id.clone(), tx.clone(), inbound_tx);
    if !state.sessions.admit(session) {
        warn!(
            current = state.sessions.len(),
            "connection limit reached, rejecting"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    info!(session_id = %session_id, "SSE connection established");

    // Transport metadata, not a protocol envelope: tell the client where
    // to submit messages for this session.
    let endpoint = Event::default().event("endpoint").data(
        serde_json::json!({"uri": format!("/message?sessionId={session_id}")}).to_string(),
    );
    if tx.send(Ok(endpoint)).await.is_err() {
        warn!(session_id = %session_id, "client gone before endpoint event");
    }

    let bearer = bearer_token(&headers).map(str::to_string);
    tokio::spawn(run_session(state, session_id, tx, inbound_rx, bearer));

    Sse::new(into_event_stream(rx)).into_response()
}

fn into_event_stream(
    rx: mpsc::Receiver<Result<Event, axum::Error>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|result| match result {
        Ok(event) => Ok(event),
        Err(_) => Ok(Event::default().data("error")),
    })
}

/// Session pump. Owns the session from handshake to cleanup.
async fn run_session(
    state: Arc<GatewayState>,
    session_id: String,
    tx: SseSender,
    inbound_rx: mpsc::Receiver<Value>,
    bearer: Option<String>,
) {
    session_loop(&state, &session_id, &tx, inbound_rx, bearer).await;

    // Single cleanup point for every exit path.
    state.sessions.remove(&session_id);
    info!(session_id = %session_id, "connection closed");
}

async fn session_loop(
    state: &GatewayState,
    session_id: &str,
    tx: &SseSender,
    mut inbound_rx: mpsc::Receiver<Value>,
    bearer: Option<String>,
) {
    let handshake = ServerMessage::handshake(env!("CARGO_PKG_VERSION"));
    if push(tx, &handshake).await.is_err() {
        return;
    }

    match bearer {
        None => {
            let envelope = ServerMessage::auth_required(state.auth.get_auth_url(session_id));
            if push(tx, &envelope).await.is_err() {
                return;
            }
        }
        Some(token) if state.auth.validate_token(&token) => {
            state.sessions.set_authenticated(session_id);
            let envelope = ServerMessage::Tools {
                tools: state.catalog.clone(),
            };
            if push(tx, &envelope).await.is_err() {
                return;
            }
        }
        Some(_) => {
            warn!(session_id = %session_id, "invalid token at connect");
            let _ = push(tx, &ServerMessage::error("Invalid token")).await;
            return;
        }
    }

    loop {
        match tokio::time::timeout(state.keepalive, inbound_rx.recv()).await {
            Ok(Some(raw)) => {
                state.sessions.touch(session_id);
                let authenticated = state.sessions.is_authenticated(session_id);
                let reply = crate::dispatch::handle_message(
                    raw,
                    authenticated,
                    state.executor.as_ref(),
                    &state.catalog,
                )
                .await;
                if push(tx, &reply).await.is_err() {
                    return;
                }
            }
            // Inbound queue gone; only happens once the session is removed.
            Ok(None) => return,
            // Idle; ping and keep waiting. Never closes the session.
            Err(_) => {
                if push(tx, &ServerMessage::Ping).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Serialize an envelope onto the SSE channel. Err means the client is
/// gone and the pump should exit.
async fn push(tx: &SseSender, message: &ServerMessage) -> Result<(), ()> {
    let data = match serde_json::to_string(message) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "failed to serialize envelope");
            return Err(());
        }
    };
    tx.send(Ok(Event::default().data(data))).await.map_err(|_| ())
}
