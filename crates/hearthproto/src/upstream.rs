//! Upstream (client-facing) MCP envelopes.
//!
//! Server-to-client envelopes are pushed over the SSE stream; client
//! messages arrive on the companion POST channel. Both sides are closed
//! tagged enums - there is no stringly-typed dispatch table anywhere in
//! the gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::ToolSpec;

/// Messages accepted from upstream clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Invoke a named tool with parameters. Both fields default so the
    /// dispatcher can reject a missing tool name itself rather than
    /// surfacing a deserialization error.
    ToolCall {
        #[serde(default)]
        tool: String,
        #[serde(default)]
        params: Value,
    },
    /// Request the tool catalog.
    ListTools,
    /// Liveness probe; allowed before authentication.
    Ping,
}

/// Capability flags declared in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            tools: true,
            resources: false,
            prompts: false,
        }
    }
}

/// Messages pushed to upstream clients over SSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Handshake {
        version: String,
        protocol: String,
        capabilities: Capabilities,
    },
    AuthRequired {
        auth_url: String,
    },
    Tools {
        tools: Vec<ToolSpec>,
    },
    /// Outcome of a tool call. Exactly one of `result`/`error` is present.
    ToolResult {
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Keepalive probe to an idle session.
    Ping,
    Pong,
    Error {
        error: String,
    },
}

impl ServerMessage {
    /// Handshake envelope with the gateway version and default capabilities.
    pub fn handshake(version: &str) -> Self {
        Self::Handshake {
            version: version.to_string(),
            protocol: crate::MCP_PROTOCOL.to_string(),
            capabilities: Capabilities::default(),
        }
    }

    pub fn auth_required(auth_url: impl Into<String>) -> Self {
        Self::AuthRequired {
            auth_url: auth_url.into(),
        }
    }

    pub fn tool_ok(tool: impl Into<String>, result: Value) -> Self {
        Self::ToolResult {
            tool: tool.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn tool_err(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ToolResult {
            tool: tool.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_client_message_tagging() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "tool_call", "tool": "x", "params": {}}))
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::ToolCall {
                tool: "x".into(),
                params: json!({}),
            }
        );

        let msg: ClientMessage = serde_json::from_value(json!({"type": "ping"})).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn test_client_message_params_default() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "tool_call", "tool": "missing"})).unwrap();
        let ClientMessage::ToolCall { params, .. } = msg else {
            panic!("expected tool_call");
        };
        assert_eq!(params, Value::Null);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = serde_json::from_value::<ClientMessage>(json!({"type": "subscribe"}));
        assert!(err.is_err());
    }

    #[test]
    fn test_handshake_shape() {
        let json = serde_json::to_value(ServerMessage::handshake("0.1.0")).unwrap();
        assert_eq!(json["type"], "handshake");
        assert_eq!(json["protocol"], "mcp/1.0");
        assert_eq!(json["capabilities"]["tools"], true);
        assert_eq!(json["capabilities"]["resources"], false);
        assert_eq!(json["capabilities"]["prompts"], false);
    }

    #[test]
    fn test_tool_result_omits_absent_side() {
        let ok = serde_json::to_value(ServerMessage::tool_ok("x", json!(42))).unwrap();
        assert_eq!(ok["type"], "tool_result");
        assert_eq!(ok["result"], 42);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(ServerMessage::tool_err("x", "boom")).unwrap();
        assert_eq!(err["error"], "boom");
        assert!(err.get("result").is_none());
    }

    #[test]
    fn test_pong_shape() {
        let json = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(json, json!({"type": "pong"}));
    }
}
