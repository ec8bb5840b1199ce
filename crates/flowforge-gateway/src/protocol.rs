use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flowforge_core::types::{NodeExecutionResult, NodeKind};

/// Body of a per-node action call (`completion`, `query`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeActionRequest {
    #[serde(default)]
    pub input_data: Value,
    /// Merged over the node's snapshotted config for this call only.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeActionResponse {
    pub success: bool,
    pub node_id: String,
    pub node_type: NodeKind,
    pub output_data: Value,
    pub execution_time_ms: u64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Body of a deployed `execute` or `execute-stream` call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployedRunRequest {
    #[serde(default)]
    pub input_data: Value,
    #[serde(default)]
    pub debug: bool,
    #[serde(default, alias = "frontend_api_keys")]
    pub run_data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployedRunResponse {
    pub success: bool,
    pub deployment_id: String,
    pub execution_id: String,
    pub execution_time_ms: u64,
    pub execution_order: Vec<String>,
    pub final_output: Value,
    pub node_outputs: Map<String, Value>,
    pub node_results: Vec<NodeExecutionResult>,
    pub errors: Vec<String>,
}

/// One route registered for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub method: String,
    pub path: String,
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReceived {
    pub name: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub node_types: Vec<NodeKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployResponse {
    pub success: bool,
    pub message: String,
    pub deployment_id: String,
    pub workflow_received: WorkflowReceived,
    pub endpoints: Vec<EndpointDescriptor>,
    pub live_endpoints_count: usize,
    pub deployment_url: String,
    pub timestamp: DateTime<Utc>,
}

/// Listing entry for a live deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub deployment_id: String,
    pub workflow_name: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub endpoint_count: usize,
    pub deployment_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentDetail {
    #[serde(flatten)]
    pub summary: DeploymentSummary,
    pub endpoints: Vec<EndpointDescriptor>,
}
