//! Tool execution boundary.
//!
//! The dispatcher talks to a [`ToolExecutor`]; the shipped implementation
//! forwards a small catalog of operations to the backend over the
//! persistent WebSocket link. Tool failures come back as
//! `GatewayError::Execution` with an opaque reason string.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use hearthlink::BackendLink;
use hearthproto::{object_schema, GatewayError, ToolSpec};

/// Boundary between the dispatcher and domain logic.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, params: Value) -> Result<Value, GatewayError>;
}

/// The catalog pushed to authenticated clients.
pub fn catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "get_states".to_string(),
            description: "Get the current state of all entities".to_string(),
            input_schema: object_schema(json!({}), &[]),
        },
        ToolSpec {
            name: "get_config".to_string(),
            description: "Get the backend configuration".to_string(),
            input_schema: object_schema(json!({}), &[]),
        },
        ToolSpec {
            name: "call_service".to_string(),
            description: "Call a service in a domain, optionally with service data".to_string(),
            input_schema: object_schema(
                json!({
                    "domain": {"type": "string", "description": "Service domain, e.g. 'light'"},
                    "service": {"type": "string", "description": "Service name, e.g. 'turn_on'"},
                    "service_data": {"type": "object", "description": "Service call payload"},
                }),
                &["domain", "service"],
            ),
        },
        ToolSpec {
            name: "fire_event".to_string(),
            description: "Fire a custom event on the backend event bus".to_string(),
            input_schema: object_schema(
                json!({
                    "event_type": {"type": "string", "description": "Event type to fire"},
                    "event_data": {"type": "object", "description": "Event payload"},
                }),
                &["event_type"],
            ),
        },
    ]
}

/// Executor forwarding tool calls to the backend link.
pub struct BackendExecutor {
    link: Option<Arc<BackendLink>>,
}

impl BackendExecutor {
    pub fn new(link: Option<Arc<BackendLink>>) -> Self {
        Self { link }
    }

    async fn command(&self, payload: Value) -> Result<Value, GatewayError> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| GatewayError::connection("backend link not configured"))?;
        let response = link.send_command(payload).await?;
        unwrap_result(response)
    }

    fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, GatewayError> {
        params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::execution(format!("Missing required parameter: {key}")))
    }
}

#[async_trait]
impl ToolExecutor for BackendExecutor {
    async fn execute(&self, name: &str, params: Value) -> Result<Value, GatewayError> {
        debug!(tool = %name, "executing tool");
        match name {
            "get_states" => self.command(json!({"type": "get_states"})).await,
            "get_config" => self.command(json!({"type": "get_config"})).await,
            "call_service" => {
                let domain = Self::required_str(&params, "domain")?;
                let service = Self::required_str(&params, "service")?;
                let mut payload = json!({
                    "type": "call_service",
                    "domain": domain,
                    "service": service,
                });
                if let Some(data) = params.get("service_data") {
                    payload["service_data"] = data.clone();
                }
                self.command(payload).await
            }
            "fire_event" => {
                let event_type = Self::required_str(&params, "event_type")?;
                let mut payload = json!({
                    "type": "fire_event",
                    "event_type": event_type,
                });
                if let Some(data) = params.get("event_data") {
                    payload["event_data"] = data.clone();
                }
                self.command(payload).await
            }
            other => Err(GatewayError::execution(format!("Unknown tool: {other}"))),
        }
    }
}

/// Unwrap a backend response frame into its `result`, surfacing
/// `success: false` as an execution error.
fn unwrap_result(response: Value) -> Result<Value, GatewayError> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        let message = response
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("backend command failed");
        return Err(GatewayError::execution(message));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}
