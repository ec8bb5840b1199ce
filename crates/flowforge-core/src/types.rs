use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Node kinds ──────────────────────────────────────────────────

/// Declared type of a workflow node.
///
/// Serialized as the plain type string used by workflow documents.
/// Unknown strings are preserved in [`NodeKind::Other`] and resolve to a
/// placeholder executor at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Document,
    Claude4,
    GroqLlama,
    Gemini,
    Chatbot,
    GraphRag,
    Api,
    Search,
    LogicalConnector,
    Embeddings,
    Image,
    Vapi,
    Other(String),
}

/// What a node kind is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DocumentChunking,
    ModelCompletion,
    HttpCall,
    Search,
    GraphQuery,
    LogicalGate,
    Placeholder,
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Document => "document",
            Self::Claude4 => "claude4",
            Self::GroqLlama => "groqllama",
            Self::Gemini => "gemini",
            Self::Chatbot => "chatbot",
            Self::GraphRag => "graphrag",
            Self::Api => "api",
            Self::Search => "search",
            Self::LogicalConnector => "logical_connector",
            Self::Embeddings => "embeddings",
            Self::Image => "image",
            Self::Vapi => "vapi",
            Self::Other(name) => name,
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Document => Capability::DocumentChunking,
            Self::Claude4 | Self::GroqLlama | Self::Gemini | Self::Chatbot => {
                Capability::ModelCompletion
            }
            Self::GraphRag => Capability::GraphQuery,
            Self::Api => Capability::HttpCall,
            Self::Search => Capability::Search,
            Self::LogicalConnector => Capability::LogicalGate,
            Self::Embeddings | Self::Image | Self::Vapi | Self::Other(_) => Capability::Placeholder,
        }
    }

    pub fn is_completion(&self) -> bool {
        self.capability() == Capability::ModelCompletion
    }

    /// Every kind with a known type string, in display order.
    pub fn builtin() -> Vec<NodeKind> {
        vec![
            Self::Document,
            Self::Claude4,
            Self::GroqLlama,
            Self::Gemini,
            Self::Chatbot,
            Self::GraphRag,
            Self::Embeddings,
            Self::Image,
            Self::Search,
            Self::Api,
            Self::Vapi,
            Self::LogicalConnector,
        ]
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "document" => Self::Document,
            "claude4" => Self::Claude4,
            "groqllama" => Self::GroqLlama,
            "gemini" => Self::Gemini,
            "chatbot" => Self::Chatbot,
            "graphrag" => Self::GraphRag,
            "api" => Self::Api,
            "search" => Self::Search,
            "logical_connector" => Self::LogicalConnector,
            "embeddings" => Self::Embeddings,
            "image" => Self::Image,
            "vapi" => Self::Vapi,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match NodeKind::from(s.as_str()) {
            Self::Other(_) => Self::Other(s),
            known => known,
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Graph model ─────────────────────────────────────────────────

/// Canvas position. Display-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

const SECRET_KEYS: [&str; 7] = [
    "api_key",
    "apikey",
    "token",
    "access_token",
    "secret",
    "password",
    "authorization",
];

pub const REDACTED: &str = "***";

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase().replace('-', "_");
    SECRET_KEYS.contains(&key.as_str())
        || key.ends_with("_api_key")
        || key.ends_with("_secret")
        || key.ends_with("_password")
}

/// Copy of a config map with credential values masked, nested objects
/// included. Use this for anything that leaves the process: logs, events,
/// HTTP responses.
pub fn redact_secrets(config: &Map<String, Value>) -> Map<String, Value> {
    config
        .iter()
        .map(|(key, value)| {
            let value = match value {
                _ if is_secret_key(key) => Value::String(REDACTED.to_string()),
                Value::Object(inner) => Value::Object(redact_secrets(inner)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// A node in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    /// Free-form display metadata (e.g. `label`, `description`).
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Executor configuration.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, kind: impl Into<NodeKind>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            position: Position::default(),
            data: Map::new(),
            config: Map::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.insert("label".into(), Value::String(label.into()));
        self
    }

    /// Replace the config. Non-object values are ignored.
    pub fn with_config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// Display label, falling back to the node id.
    pub fn label(&self) -> &str {
        self.data
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or(self.id.as_str())
    }

    pub fn description(&self) -> Option<&str> {
        self.data.get("description").and_then(Value::as_str)
    }

    /// Config safe to log or return to callers.
    pub fn redacted_config(&self) -> Map<String, Value> {
        redact_secrets(&self.config)
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, alias = "targetHandle", skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}-{target}"),
            source,
            target,
            source_handle: None,
            target_handle: None,
        }
    }
}

/// A complete workflow graph as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "new_workflow_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn new_workflow_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_workflow_id(),
            name: name.into(),
            description: None,
            nodes: vec![],
            edges: vec![],
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(WorkflowEdge::new(source, target));
        self
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Distinct node kinds, in first-seen order.
    pub fn node_kinds(&self) -> Vec<NodeKind> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .filter(|n| seen.insert(n.kind.clone()))
            .map(|n| n.kind.clone())
            .collect()
    }

    /// Structural problems: empty node set, empty or duplicate ids,
    /// edges pointing at unknown nodes. Cycles are checked separately.
    pub fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.nodes.is_empty() {
            errors.push("Workflow has no nodes".to_string());
            return errors;
        }

        if self.nodes.iter().any(|n| n.id.is_empty()) {
            errors.push("Node IDs must not be empty".to_string());
        }

        let ids: BTreeSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        if ids.len() != self.nodes.len() {
            errors.push("Duplicate node IDs found".to_string());
        }

        for edge in &self.edges {
            if !ids.contains(edge.source.as_str()) {
                errors.push(format!(
                    "Edge references non-existent source node: {}",
                    edge.source
                ));
            }
            if !ids.contains(edge.target.as_str()) {
                errors.push(format!(
                    "Edge references non-existent target node: {}",
                    edge.target
                ));
            }
        }

        errors
    }
}

// ── Execution records ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Outcome of one node in one run. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub logs: Vec<ExecutionLog>,
}

impl NodeExecutionResult {
    pub fn completed(node_id: impl Into<String>, output: Value, elapsed_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            status: ExecutionStatus::Completed,
            output_data: output,
            error_message: None,
            execution_time_ms: elapsed_ms,
            logs: vec![],
        }
    }

    pub fn failed(node_id: impl Into<String>, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            status: ExecutionStatus::Failed,
            output_data: Value::Null,
            error_message: Some(error.into()),
            execution_time_ms: elapsed_ms,
            logs: vec![],
        }
    }

    pub fn with_logs(mut self, logs: Vec<ExecutionLog>) -> Self {
        self.logs = logs;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Aggregate outcome of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_execution_time_ms: u64,
    pub node_results: Vec<NodeExecutionResult>,
    #[serde(default)]
    pub final_output: Option<Value>,
    pub logs: Vec<ExecutionLog>,
    pub errors: Vec<String>,
}

/// Request body for a one-shot run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionRequest {
    pub workflow: WorkflowDefinition,
    #[serde(default)]
    pub input_data: Value,
    #[serde(default)]
    pub debug: bool,
    /// Run-scoped data bag (e.g. fallback API keys). Accepts the
    /// `frontend_api_keys` name used by older clients.
    #[serde(default, alias = "frontend_api_keys")]
    pub run_data: Map<String, Value>,
}

impl WorkflowExecutionRequest {
    pub fn new(workflow: WorkflowDefinition) -> Self {
        Self {
            workflow,
            input_data: Value::Null,
            debug: false,
            run_data: Map::new(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input_data = input;
        self
    }
}

/// Progress snapshot of an active or recently finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionStatus {
    pub execution_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub current_node: Option<String>,
    pub progress_percentage: f64,
    pub node_results: Vec<NodeExecutionResult>,
}

// ── Tagged outputs ──────────────────────────────────────────────

/// Envelope for outputs that downstream nodes treat specially.
///
/// Serialized as `{"kind": "graph-query-result", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum TaggedOutput {
    GraphQueryResult(Value),
}

impl TaggedOutput {
    /// Recognize an envelope in an arbitrary node output.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 2 || !obj.contains_key("kind") || !obj.contains_key("payload") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ── Model completion ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single non-streaming chat completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Provider name (`anthropic`, `openai`, `groq`, `gemini`, ...).
    pub provider: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Explicit key; when absent the client falls back to its configured key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}
