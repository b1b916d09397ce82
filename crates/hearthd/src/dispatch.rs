//! Stateless MCP message dispatcher.
//!
//! Routes the closed set of client message types. Every failure path
//! returns an envelope; nothing here panics or surfaces a transport
//! error. Auth gating happens before the executor is touched.

use serde_json::Value;
use tracing::warn;

use hearthproto::{ClientMessage, ServerMessage, ToolSpec};

use crate::tools::ToolExecutor;

/// Dispatch one inbound message to its handler and produce the reply
/// envelope.
pub async fn handle_message(
    raw: Value,
    authenticated: bool,
    executor: &dyn ToolExecutor,
    catalog: &[ToolSpec],
) -> ServerMessage {
    let Some(msg_type) = raw.get("type").and_then(Value::as_str).map(str::to_string) else {
        return ServerMessage::error("Missing message type");
    };

    let message: ClientMessage = match serde_json::from_value(raw) {
        Ok(message) => message,
        Err(e) => {
            return match msg_type.as_str() {
                "tool_call" | "list_tools" | "ping" => {
                    warn!(message_type = %msg_type, error = %e, "malformed message");
                    ServerMessage::error(format!("Malformed {msg_type} message"))
                }
                other => ServerMessage::error(format!("Unknown message type: {other}")),
            };
        }
    };

    match message {
        ClientMessage::Ping => ServerMessage::Pong,
        ClientMessage::ListTools => {
            if !authenticated {
                return ServerMessage::error("Not authenticated");
            }
            ServerMessage::Tools {
                tools: catalog.to_vec(),
            }
        }
        ClientMessage::ToolCall { tool, params } => {
            if !authenticated {
                return ServerMessage::error("Not authenticated");
            }
            if tool.is_empty() {
                return ServerMessage::error("Missing tool name");
            }
            match executor.execute(&tool, params).await {
                Ok(result) => ServerMessage::tool_ok(tool, result),
                Err(e) => ServerMessage::tool_err(tool, e.to_string()),
            }
        }
    }
}
