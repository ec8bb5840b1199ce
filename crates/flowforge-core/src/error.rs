use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph errors
    #[error("Workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Workflow contains cycles")]
    CyclicGraph,

    // Node errors
    #[error("Node execution failed: {node_id}: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("Invalid configuration for node {node_id}: {message}")]
    InvalidConfig { node_id: String, message: String },

    // Model-completion errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("No API key available for provider: {0}")]
    MissingApiKey(String),

    // Outbound HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Registry errors
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Shorthand for a node-scoped execution failure.
    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeExecution {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Whether the error describes a structurally invalid workflow.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::CyclicGraph)
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
