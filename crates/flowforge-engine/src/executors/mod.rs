pub mod completion;
pub mod document;
pub mod graph_query;
pub mod http_call;
pub mod logical;
pub mod placeholder;
pub mod search;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use flowforge_core::error::{FlowError, Result};
use flowforge_core::types::{TaggedOutput, WorkflowNode};

/// Deserialize a node's config map into a typed settings struct.
pub(crate) fn node_settings<T: DeserializeOwned>(node: &WorkflowNode) -> Result<T> {
    parse_settings(&node.config).map_err(|message| FlowError::InvalidConfig {
        node_id: node.id.clone(),
        message,
    })
}

pub(crate) fn parse_settings<T: DeserializeOwned>(
    config: &Map<String, Value>,
) -> std::result::Result<T, String> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| e.to_string())
}

/// Best-effort text view of an upstream output.
///
/// Strings pass through; objects yield their first text-bearing field
/// (`processed_text`, `content`, `original_text`, `text`); graph-query
/// envelopes render as a context block. Other values become JSON text.
pub(crate) fn input_text(input: &Value) -> Option<String> {
    if let Some(TaggedOutput::GraphQueryResult(payload)) = TaggedOutput::from_value(input) {
        let pretty = serde_json::to_string_pretty(&payload).unwrap_or_default();
        return Some(format!("Knowledge graph results:\n{pretty}"));
    }

    match input {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            for key in ["processed_text", "content", "original_text", "text"] {
                if let Some(Value::String(s)) = obj.get(key) {
                    if !s.trim().is_empty() {
                        return Some(s.clone());
                    }
                }
            }
            Some(input.to_string())
        }
        other => Some(other.to_string()),
    }
}
