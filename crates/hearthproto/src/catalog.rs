//! Tool catalog entries.
//!
//! Input schemas are hand-built JSON in the MCP `inputSchema` shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A tool as advertised in the `tools` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Build an `inputSchema` object from property definitions.
pub fn object_schema(properties: Value, required: &[&str]) -> Value {
    let properties = match properties {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
