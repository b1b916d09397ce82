//! Companion POST endpoint for client→server messages.
//!
//! SSE is one-way, so clients submit messages to
//! `POST /message?sessionId=…`. Accepted messages are queued onto the
//! session's pump, preserving per-session ordering; the reply arrives on
//! the SSE stream, and the POST returns 202.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::bearer_token;
use crate::serve::GatewayState;

#[derive(Debug, Deserialize)]
pub struct MessageParams {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Handle `POST /message?sessionId=…`.
pub async fn message_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<MessageParams>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(inbound) = state.sessions.inbound_sender(&params.session_id) else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };
    state.sessions.touch(&params.session_id);

    // A valid bearer arriving after the out-of-band exchange promotes the
    // session; it never demotes one.
    if !state.sessions.is_authenticated(&params.session_id) {
        if let Some(token) = bearer_token(&headers) {
            if state.auth.validate_token(token) {
                state.sessions.set_authenticated(&params.session_id);
                debug!(session_id = %params.session_id, "session authenticated via message channel");
            }
        }
    }

    if inbound.send(body).await.is_err() {
        warn!(session_id = %params.session_id, "session closed while queueing message");
        return (StatusCode::GONE, "Session closed").into_response();
    }

    StatusCode::ACCEPTED.into_response()
}
