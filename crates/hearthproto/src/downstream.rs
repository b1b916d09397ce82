//! Downstream (backend-facing) frame types.
//!
//! The backend speaks newline-free JSON text frames over a WebSocket.
//! Command frames carry an integer `id` assigned by the link; responses
//! echo that id. Unsolicited frames are tagged `type: "event"` and carry
//! the event body under `event`.

use serde_json::{json, Value};

/// Classification of an inbound frame from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A frame echoing a command id; body is the whole frame.
    Response { id: u64, body: Value },
    /// An unsolicited event with its declared event type.
    Event { event_type: String, event: Value },
    /// Handshake: server demands credentials.
    AuthRequired,
    /// Handshake: credentials accepted.
    AuthOk,
    /// Handshake: credentials rejected (or any other auth outcome).
    AuthInvalid { message: String },
    /// Anything else; dropped by the pump.
    Other(Value),
}

impl InboundFrame {
    /// Classify a decoded JSON frame.
    ///
    /// Frames with an `id` take precedence over everything except the
    /// handshake types, which never carry ids.
    pub fn classify(frame: Value) -> Self {
        match frame.get("type").and_then(Value::as_str) {
            Some("auth_required") => return InboundFrame::AuthRequired,
            Some("auth_ok") => return InboundFrame::AuthOk,
            Some("auth_invalid") => {
                let message = frame
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("authentication rejected")
                    .to_string();
                return InboundFrame::AuthInvalid { message };
            }
            _ => {}
        }

        if let Some(id) = frame.get("id").and_then(Value::as_u64) {
            if frame.get("type").and_then(Value::as_str) != Some("event") {
                return InboundFrame::Response { id, body: frame };
            }
        }

        if frame.get("type").and_then(Value::as_str) == Some("event") {
            let event = frame.get("event").cloned().unwrap_or(Value::Null);
            let event_type = event
                .get("event_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return InboundFrame::Event { event_type, event };
        }

        InboundFrame::Other(frame)
    }
}

/// Credential reply for the connect handshake.
pub fn auth_frame(access_token: &str) -> Value {
    json!({
        "type": "auth",
        "access_token": access_token,
    })
}

/// Stamp a command payload with its correlation id.
///
/// The payload must be a JSON object; the link guarantees this for
/// everything it transmits.
pub fn with_id(id: u64, mut payload: Value) -> Value {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("id".to_string(), json!(id));
    }
    payload
}

/// Command subscribing to a single event type.
pub fn subscribe_events(event_type: &str) -> Value {
    json!({
        "type": "subscribe_events",
        "event_type": event_type,
    })
}
