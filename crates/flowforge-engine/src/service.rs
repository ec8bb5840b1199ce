use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use flowforge_core::config::EngineConfig;
use flowforge_core::context::ExecutionContext;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::event::{ExecutionEvent, RunObserver};
use flowforge_core::types::*;

use crate::orchestrator::WorkflowRunner;
use crate::registry::ExecutorRegistry;
use crate::resolver::DependencyMap;

/// Dry-run report: what would happen if the workflow were executed.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub execution_order: Vec<OrderedNode>,
    pub node_count: usize,
    pub edge_count: usize,
    pub implementation_status: BTreeMap<String, NodeImplementation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderedNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeImplementation {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub fully_implemented: bool,
    pub status: &'static str,
}

/// Live view of one run, updated from the runner's events.
struct RunTracker {
    cancel: CancellationToken,
    node_count: usize,
    state: Mutex<TrackedRun>,
}

#[derive(Default)]
struct TrackedRun {
    status: ExecutionStatus,
    current_node: Option<String>,
    node_results: Vec<NodeExecutionResult>,
}

impl RunTracker {
    fn new(node_count: usize) -> Self {
        Self {
            cancel: CancellationToken::new(),
            node_count,
            state: Mutex::new(TrackedRun::default()),
        }
    }

    fn set_status(&self, status: ExecutionStatus) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.status = status;
        if status.is_finished() {
            state.current_node = None;
        }
    }

    fn status(&self) -> ExecutionStatus {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    fn snapshot(&self, execution_id: &str) -> WorkflowExecutionStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let progress_percentage = if self.node_count == 0 {
            0.0
        } else {
            state.node_results.len() as f64 / self.node_count as f64 * 100.0
        };
        WorkflowExecutionStatus {
            execution_id: execution_id.to_string(),
            status: state.status,
            current_node: state.current_node.clone(),
            progress_percentage,
            node_results: state.node_results.clone(),
        }
    }
}

impl RunObserver for RunTracker {
    fn on_event(&self, event: &ExecutionEvent) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            ExecutionEvent::NodeStart { node_id, .. } => {
                state.current_node = Some(node_id.clone());
            }
            ExecutionEvent::NodeComplete { result, .. } => {
                state.node_results.push(result.clone());
            }
            _ => {}
        }
    }
}

/// Runs whole workflows to a single aggregate result and tracks them.
pub struct WorkflowExecutionService {
    registry: Arc<ExecutorRegistry>,
    config: EngineConfig,
    runs: RwLock<HashMap<String, Arc<RunTracker>>>,
    finished: Mutex<VecDeque<String>>,
}

impl WorkflowExecutionService {
    pub fn new(registry: Arc<ExecutorRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            runs: RwLock::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Structural checks, cycle check, execution order and per-node
    /// configuration warnings. Never executes anything.
    pub fn validate(&self, workflow: &WorkflowDefinition) -> ValidationReport {
        let mut errors = workflow.structural_errors();
        let mut warnings = Vec::new();
        let mut execution_order = Vec::new();

        if errors.is_empty() {
            match DependencyMap::from_workflow(workflow).topological_order() {
                Ok(order) => {
                    execution_order = order
                        .iter()
                        .filter_map(|id| workflow.node(id))
                        .map(|n| OrderedNode {
                            id: n.id.clone(),
                            kind: n.kind.clone(),
                            label: n.label().to_string(),
                        })
                        .collect();
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        let mut implementation_status = BTreeMap::new();
        for node in &workflow.nodes {
            let executor = self.registry.get(&node.kind);
            if let Err(message) = executor.validate(&node.config) {
                warnings.push(format!(
                    "Node {} ({}) has invalid configuration: {}",
                    node.id,
                    node.label(),
                    message
                ));
            }
            let fully_implemented = !executor.is_placeholder();
            if !fully_implemented {
                warnings.push(format!(
                    "Node {} uses a placeholder executor for type '{}'",
                    node.id, node.kind
                ));
            }
            implementation_status.insert(
                node.id.clone(),
                NodeImplementation {
                    kind: node.kind.clone(),
                    fully_implemented,
                    status: if fully_implemented { "ready" } else { "placeholder" },
                },
            );
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            execution_order,
            node_count: workflow.nodes.len(),
            edge_count: workflow.edges.len(),
            implementation_status,
        }
    }

    /// Run a workflow to completion. Always returns a result; a structurally
    /// invalid or cyclic workflow fails without executing any node.
    pub async fn execute(&self, request: WorkflowExecutionRequest) -> WorkflowExecutionResult {
        let execution_id = Uuid::new_v4().to_string();
        let tracker = self.track(&execution_id, request.workflow.nodes.len());
        self.run_tracked(execution_id, request, tracker).await
    }

    /// Start a workflow in the background and return its execution id.
    pub fn execute_async(self: &Arc<Self>, request: WorkflowExecutionRequest) -> String {
        let execution_id = Uuid::new_v4().to_string();
        let tracker = self.track(&execution_id, request.workflow.nodes.len());
        let service = Arc::clone(self);
        let id = execution_id.clone();
        tokio::spawn(async move {
            service.run_tracked(id, request, tracker).await;
        });
        execution_id
    }

    pub fn status(&self, execution_id: &str) -> Result<WorkflowExecutionStatus> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(execution_id)
            .map(|t| t.snapshot(execution_id))
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Ids of runs not yet finished, sorted.
    pub fn active_executions(&self) -> Vec<String> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        let mut active: Vec<String> = runs
            .iter()
            .filter(|(_, t)| !t.status().is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }

    /// Request cancellation. Returns `false` if the run already finished.
    pub fn cancel(&self, execution_id: &str) -> Result<bool> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        let tracker = runs
            .get(execution_id)
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))?;
        if tracker.status().is_finished() {
            return Ok(false);
        }
        info!(execution_id, "Cancellation requested");
        tracker.cancel.cancel();
        Ok(true)
    }

    /// A two-node document → chatbot workflow for first-time users.
    pub fn example_workflow() -> WorkflowDefinition {
        let mut workflow = WorkflowDefinition::new("Document Summary")
            .with_node(
                WorkflowNode::new("doc-1", NodeKind::Document)
                    .with_label("Document Input")
                    .with_position(100.0, 100.0)
                    .with_config(json!({
                        "text": "Rust is a systems programming language focused on safety, speed, and concurrency.",
                        "chunk_size": 1000
                    })),
            )
            .with_node(
                WorkflowNode::new("ai-1", NodeKind::Chatbot)
                    .with_label("Summarizer")
                    .with_position(400.0, 100.0)
                    .with_config(json!({
                        "system_prompt": "You are a concise technical writer.",
                        "user_prompt": "Summarize the following text in one sentence:",
                        "temperature": 0.3,
                        "max_tokens": 200
                    })),
            )
            .with_edge("doc-1", "ai-1");
        workflow.description = Some("Chunk a document and summarize it with a model".into());
        workflow
    }

    fn track(&self, execution_id: &str, node_count: usize) -> Arc<RunTracker> {
        let tracker = Arc::new(RunTracker::new(node_count));
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(execution_id.to_string(), tracker.clone());
        tracker
    }

    /// Keep finished runs queryable, evicting the oldest past the limit.
    fn retire(&self, execution_id: String) {
        let mut finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        finished.push_back(execution_id);
        let mut evicted = Vec::new();
        while finished.len() > self.config.max_tracked_runs {
            if let Some(id) = finished.pop_front() {
                evicted.push(id);
            }
        }
        drop(finished);
        if !evicted.is_empty() {
            let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
            for id in evicted {
                runs.remove(&id);
            }
        }
    }

    async fn run_tracked(
        &self,
        execution_id: String,
        request: WorkflowExecutionRequest,
        tracker: Arc<RunTracker>,
    ) -> WorkflowExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let WorkflowExecutionRequest {
            workflow,
            input_data,
            debug,
            run_data,
        } = request;

        let mut ctx = ExecutionContext::new(&execution_id)
            .with_debug(debug || self.config.debug)
            .with_log_tail(self.config.log_tail)
            .with_run_data(run_data);
        ctx.log(
            LogLevel::Info,
            format!("Starting workflow execution: {}", workflow.name),
            None,
            None,
        );
        info!(
            execution_id = %execution_id,
            workflow = %workflow.name,
            nodes = workflow.nodes.len(),
            "Starting workflow"
        );

        let report = self.validate(&workflow);
        for warning in &report.warnings {
            ctx.log(LogLevel::Warning, warning.clone(), None, None);
        }
        if !report.valid {
            for e in &report.errors {
                ctx.log(LogLevel::Error, e.clone(), None, None);
            }
            warn!(execution_id = %execution_id, errors = ?report.errors, "Workflow rejected");
            tracker.set_status(ExecutionStatus::Failed);
            self.retire(execution_id.clone());
            return WorkflowExecutionResult {
                execution_id,
                workflow_id: workflow.id,
                status: ExecutionStatus::Failed,
                started_at,
                completed_at: Some(Utc::now()),
                total_execution_time_ms: start.elapsed().as_millis() as u64,
                node_results: vec![],
                final_output: None,
                logs: ctx.into_logs(),
                errors: report.errors,
            };
        }

        let order: Vec<&str> = report.execution_order.iter().map(|n| n.id.as_str()).collect();
        ctx.log(
            LogLevel::Info,
            format!("Execution order: {}", order.join(" -> ")),
            None,
            None,
        );
        tracker.set_status(ExecutionStatus::Running);

        let deps = DependencyMap::from_workflow(&workflow);
        let outcome = WorkflowRunner::new(self.registry.clone())
            .with_observer(tracker.clone())
            .with_cancellation(tracker.cancel.clone())
            .run(&workflow.nodes, &deps, &mut ctx, input_data)
            .await;

        let status = if outcome.succeeded() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        let errors = outcome.errors();
        let total_execution_time_ms = start.elapsed().as_millis() as u64;

        match status {
            ExecutionStatus::Completed => info!(
                execution_id = %execution_id,
                elapsed_ms = total_execution_time_ms,
                "Workflow completed"
            ),
            _ => error!(
                execution_id = %execution_id,
                elapsed_ms = total_execution_time_ms,
                errors = ?errors,
                "Workflow failed"
            ),
        }
        ctx.log(
            LogLevel::Info,
            format!("Workflow finished with status {:?}", status),
            None,
            None,
        );

        tracker.set_status(status);
        self.retire(execution_id.clone());

        WorkflowExecutionResult {
            execution_id,
            workflow_id: workflow.id,
            status,
            started_at,
            completed_at: Some(Utc::now()),
            total_execution_time_ms,
            node_results: outcome.node_results,
            final_output: outcome.final_output,
            logs: ctx.into_logs(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_test_utils::{node, ScriptedCompletion};

    use crate::registry::ExecutorServices;

    fn service() -> Arc<WorkflowExecutionService> {
        let registry = ExecutorRegistry::with_builtins(ExecutorServices::new(Arc::new(
            ScriptedCompletion::new(),
        )));
        Arc::new(WorkflowExecutionService::new(
            Arc::new(registry),
            EngineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_execute_example_workflow() {
        let service = service();
        let request = WorkflowExecutionRequest::new(WorkflowExecutionService::example_workflow());
        let result = service.execute(request).await;

        assert_eq!(result.status, ExecutionStatus::Completed, "{:?}", result.errors);
        assert_eq!(result.node_results.len(), 2);
        let content = result.final_output.unwrap()["content"].as_str().unwrap().to_string();
        assert!(content.starts_with("echo: Summarize the following text"));
        assert!(result.logs.iter().any(|l| l.message.starts_with("Execution order: doc-1 -> ai-1")));

        let status = service.status(&result.execution_id).unwrap();
        assert_eq!(status.status, ExecutionStatus::Completed);
        assert_eq!(status.progress_percentage, 100.0);
        assert!(service.active_executions().is_empty());
    }

    #[tokio::test]
    async fn test_result_does_not_expose_api_key() {
        let workflow = WorkflowDefinition::new("keyed")
            .with_node(node("ai-1", "chatbot").with_config(json!({"api_key": "sk-SECRET-123"})));
        let mut request = WorkflowExecutionRequest::new(workflow).with_input(json!("hello"));
        request.debug = true;
        let result = service().execute(request).await;

        assert_eq!(result.status, ExecutionStatus::Completed, "{:?}", result.errors);
        let body = serde_json::to_string(&result).unwrap();
        assert!(!body.contains("sk-SECRET-123"));
        assert!(result.logs.iter().any(|l| l.message == "Node configuration"));
    }

    #[tokio::test]
    async fn test_cycle_blocks_execution() {
        let workflow = WorkflowDefinition::new("loop")
            .with_node(node("A", "document"))
            .with_node(node("B", "document"))
            .with_edge("A", "B")
            .with_edge("B", "A");
        let report = service().validate(&workflow);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Workflow contains cycles"]);

        let result = service().execute(WorkflowExecutionRequest::new(workflow)).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.node_results.is_empty());
        assert!(result.final_output.is_none());
    }

    #[tokio::test]
    async fn test_structural_errors_reported() {
        let workflow = WorkflowDefinition::new("bad")
            .with_node(node("a", "document"))
            .with_edge("a", "ghost");
        let result = service().execute(WorkflowExecutionRequest::new(workflow)).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(
            result.errors,
            vec!["Edge references non-existent target node: ghost"]
        );
    }

    #[test]
    fn test_validate_report() {
        let workflow = WorkflowDefinition::new("mixed")
            .with_node(node("doc", "document").with_config(json!({"chunk_size": 0})))
            .with_node(node("img", "image"))
            .with_edge("doc", "img");
        let report = service().validate(&workflow);
        assert!(report.valid);
        assert_eq!(report.node_count, 2);
        assert_eq!(report.edge_count, 1);
        let ids: Vec<&str> = report.execution_order.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["doc", "img"]);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(report.implementation_status["doc"].status, "ready");
        assert_eq!(report.implementation_status["img"].status, "placeholder");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["execution_order"][0]["type"], "document");
    }

    #[tokio::test]
    async fn test_unknown_execution() {
        let service = service();
        assert!(matches!(
            service.status("nope"),
            Err(FlowError::ExecutionNotFound(_))
        ));
        assert!(service.cancel("nope").is_err());
    }

    #[tokio::test]
    async fn test_execute_async_then_cancel() {
        let service = service();
        let workflow = WorkflowDefinition::new("slow")
            .with_node(node("a", "vapi"))
            .with_node(node("b", "vapi"))
            .with_edge("a", "b");
        let id = service.execute_async(WorkflowExecutionRequest::new(workflow));
        assert!(service.cancel(&id).unwrap());

        for _ in 0..100 {
            if service.status(&id).unwrap().status.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let status = service.status(&id).unwrap();
        assert_eq!(status.status, ExecutionStatus::Failed);
        assert!(status.node_results.is_empty());
        assert!(!service.cancel(&id).unwrap());
    }

    #[tokio::test]
    async fn test_finished_runs_are_bounded() {
        let registry = ExecutorRegistry::with_builtins(ExecutorServices::new(Arc::new(
            ScriptedCompletion::new(),
        )));
        let config = EngineConfig {
            max_tracked_runs: 2,
            ..EngineConfig::default()
        };
        let service = WorkflowExecutionService::new(Arc::new(registry), config);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let wf = WorkflowDefinition::new("tiny").with_node(node("x", "vapi"));
            ids.push(service.execute(WorkflowExecutionRequest::new(wf)).await.execution_id);
        }
        assert!(service.status(&ids[0]).is_err());
        assert!(service.status(&ids[2]).is_ok());
    }
}
