use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::types::{NodeExecutionResult, NodeKind};

const PREVIEW_CHARS: usize = 100;

/// Progress events emitted while a run advances through the graph.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Start {
        execution_id: String,
        node_count: usize,
    },
    GraphBuilt {
        start_nodes: Vec<String>,
        dependencies: BTreeMap<String, Vec<String>>,
    },
    NodeStart {
        node_id: String,
        node_label: String,
        node_type: NodeKind,
        dependencies: Vec<String>,
    },
    NodeComplete {
        node_id: String,
        success: bool,
        output_preview: String,
        result: NodeExecutionResult,
    },
    /// The ready set emptied before every node ran.
    Warning {
        message: String,
        remaining: Vec<String>,
    },
    WorkflowComplete {
        #[serde(flatten)]
        summary: Map<String, Value>,
    },
    Error {
        message: String,
    },
}

impl ExecutionEvent {
    /// Event name used on the wire (SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::GraphBuilt { .. } => "graph_built",
            Self::NodeStart { .. } => "node_start",
            Self::NodeComplete { .. } => "node_complete",
            Self::Warning { .. } => "warning",
            Self::WorkflowComplete { .. } => "workflow_complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn node_complete(result: &NodeExecutionResult) -> Self {
        let output_preview = if result.succeeded() {
            preview(&result.output_data)
        } else {
            result.error_message.clone().unwrap_or_default()
        };
        Self::NodeComplete {
            node_id: result.node_id.clone(),
            success: result.succeeded(),
            output_preview,
            result: result.clone(),
        }
    }
}

/// First characters of an output, for progress displays.
pub fn preview(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => match obj.get("content") {
            Some(Value::String(s)) => s.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    };
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Receives progress events from a running workflow.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

impl RunObserver for () {
    fn on_event(&self, _event: &ExecutionEvent) {}
}

impl RunObserver for mpsc::UnboundedSender<ExecutionEvent> {
    fn on_event(&self, event: &ExecutionEvent) {
        // Ignore error if the receiver is gone
        let _ = self.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = ExecutionEvent::Warning {
            message: "stalled".into(),
            remaining: vec!["c".into()],
        };
        assert_eq!(event.name(), "warning");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["remaining"], json!(["c"]));
    }

    #[test]
    fn test_workflow_complete_flattens_summary() {
        let mut summary = Map::new();
        summary.insert("success".into(), json!(true));
        let json = serde_json::to_value(ExecutionEvent::WorkflowComplete { summary }).unwrap();
        assert_eq!(json["type"], "workflow_complete");
        assert_eq!(json["success"], true);
    }

    #[test]
    fn test_preview_prefers_content_and_truncates() {
        let long = "x".repeat(250);
        assert_eq!(preview(&json!({"content": long})).len(), 100);
        assert_eq!(preview(&json!("short")), "short");
        assert_eq!(preview(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_node_complete_uses_error_for_failures() {
        let failed = NodeExecutionResult::failed("n", "boom", 3);
        match ExecutionEvent::node_complete(&failed) {
            ExecutionEvent::NodeComplete {
                success,
                output_preview,
                ..
            } => {
                assert!(!success);
                assert_eq!(output_preview, "boom");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_channel_observer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_event(&ExecutionEvent::Error {
            message: "bad".into(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name(), "error");
    }
}
