use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowforge_core::context::ExecutionContext;
use flowforge_core::event::{ExecutionEvent, RunObserver};
use flowforge_core::types::{LogLevel, NodeExecutionResult, WorkflowNode};

use crate::registry::ExecutorRegistry;
use crate::resolver::DependencyMap;

/// What one pass of the chaining loop produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// One result per executed node, in execution order.
    pub node_results: Vec<NodeExecutionResult>,
    pub execution_order: Vec<String>,
    /// Nodes that never ran, sorted by id.
    pub unexecuted: Vec<String>,
    pub cancelled: bool,
    pub final_output: Option<Value>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    /// Every node ran and none failed.
    pub fn succeeded(&self) -> bool {
        !self.cancelled
            && self.unexecuted.is_empty()
            && self.node_results.iter().all(NodeExecutionResult::succeeded)
    }

    pub fn errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self
            .node_results
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| {
                format!(
                    "Node {} failed: {}",
                    r.node_id,
                    r.error_message.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        if self.cancelled {
            errors.push("Execution cancelled".to_string());
        } else if !self.unexecuted.is_empty() {
            errors.push(format!(
                "Nodes never became ready: {}",
                self.unexecuted.join(", ")
            ));
        }
        errors
    }

    /// Output of each executed node keyed by id.
    pub fn node_outputs(&self) -> Map<String, Value> {
        self.node_results
            .iter()
            .map(|r| (r.node_id.clone(), r.output_data.clone()))
            .collect()
    }

    /// Payload of the closing `workflow_complete` event.
    pub fn summary(&self) -> Map<String, Value> {
        let mut summary = Map::new();
        summary.insert("success".into(), json!(self.succeeded()));
        summary.insert("execution_time_ms".into(), json!(self.elapsed_ms));
        summary.insert("nodes_executed".into(), json!(self.node_results.len()));
        summary.insert("execution_order".into(), json!(self.execution_order));
        summary.insert(
            "final_output".into(),
            self.final_output.as_ref().map(present_output).unwrap_or(Value::Null),
        );
        summary.insert("node_outputs".into(), Value::Object(self.node_outputs()));
        if !self.succeeded() {
            summary.insert("errors".into(), json!(self.errors()));
        }
        summary
    }
}

/// Drives nodes through the ready-set loop, threading outputs downstream.
///
/// Used by both one-shot execution and deployed endpoints. Nodes run one at
/// a time; the smallest eligible id goes first, so the order matches
/// [`DependencyMap::topological_order`] on acyclic graphs.
pub struct WorkflowRunner {
    registry: Arc<ExecutorRegistry>,
    observer: Arc<dyn RunObserver>,
    cancel: CancellationToken,
}

impl WorkflowRunner {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            registry,
            observer: Arc::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Checked before each node starts; the node in flight always finishes.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every reachable node. Node failures never abort the loop.
    pub async fn run(
        &self,
        nodes: &[WorkflowNode],
        deps: &DependencyMap,
        ctx: &mut ExecutionContext,
        input: Value,
    ) -> RunOutcome {
        let start = Instant::now();
        let by_id: HashMap<&str, &WorkflowNode> =
            nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        self.observer.on_event(&ExecutionEvent::Start {
            execution_id: ctx.execution_id().to_string(),
            node_count: nodes.len(),
        });
        self.observer.on_event(&ExecutionEvent::GraphBuilt {
            start_nodes: deps.start_nodes(),
            dependencies: deps.dependencies(),
        });

        let mut outcome = RunOutcome::default();
        let mut ready = deps.ready_set();

        while let Some(id) = ready.pop() {
            if self.cancel.is_cancelled() {
                ctx.log(LogLevel::Warning, "Execution cancelled", None, None);
                warn!(execution_id = %ctx.execution_id(), "Run cancelled before node {}", id);
                outcome.cancelled = true;
                break;
            }
            let Some(node) = by_id.get(id.as_str()).copied() else {
                ready.complete(&id);
                continue;
            };

            let predecessors = deps.predecessors(&id);
            self.observer.on_event(&ExecutionEvent::NodeStart {
                node_id: id.clone(),
                node_label: node.label().to_string(),
                node_type: node.kind.clone(),
                dependencies: predecessors.clone(),
            });

            let node_input = gather_input(&predecessors, ctx, &input);
            debug!(node_id = %id, kind = %node.kind, "Executing node");
            let executor = self.registry.get(&node.kind);
            let result = executor.execute(node, ctx, node_input).await;

            if result.succeeded() {
                info!(
                    execution_id = %ctx.execution_id(),
                    node_id = %id,
                    elapsed_ms = result.execution_time_ms,
                    "Node completed"
                );
            } else {
                warn!(
                    execution_id = %ctx.execution_id(),
                    node_id = %id,
                    error = result.error_message.as_deref().unwrap_or_default(),
                    "Node failed, continuing"
                );
            }

            ctx.record_output(&id, result.output_data.clone());
            self.observer.on_event(&ExecutionEvent::node_complete(&result));
            ready.complete(&id);
            outcome.execution_order.push(id);
            outcome.node_results.push(result);
        }

        let executed: HashSet<&str> = outcome.execution_order.iter().map(String::as_str).collect();
        let mut unexecuted: Vec<String> = nodes
            .iter()
            .filter(|n| !executed.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        unexecuted.sort();
        unexecuted.dedup();
        outcome.unexecuted = unexecuted;

        if !outcome.cancelled && !outcome.unexecuted.is_empty() {
            let message = format!(
                "No further nodes can execute; {} node(s) never became ready",
                outcome.unexecuted.len()
            );
            warn!(execution_id = %ctx.execution_id(), remaining = ?outcome.unexecuted, "{}", message);
            ctx.log(
                LogLevel::Warning,
                message.clone(),
                None,
                Some(json!({"remaining": outcome.unexecuted})),
            );
            self.observer.on_event(&ExecutionEvent::Warning {
                message,
                remaining: outcome.unexecuted.clone(),
            });
        }

        outcome.final_output = select_final_output(&outcome.node_results, deps);
        outcome.elapsed_ms = start.elapsed().as_millis() as u64;

        self.observer.on_event(&ExecutionEvent::WorkflowComplete {
            summary: outcome.summary(),
        });
        outcome
    }
}

/// Input for a node: the run input for start nodes, the unwrapped output of
/// a single predecessor, or a map keyed by predecessor id.
pub fn gather_input(predecessors: &[String], ctx: &ExecutionContext, initial: &Value) -> Value {
    match predecessors {
        [] => initial.clone(),
        [only] => ctx.get_output(only).cloned().unwrap_or(Value::Null),
        many => Value::Object(
            many.iter()
                .map(|p| (p.clone(), ctx.get_output(p).cloned().unwrap_or(Value::Null)))
                .collect(),
        ),
    }
}

/// Output of the last successful sink, else of the last successful node.
pub fn select_final_output(
    results: &[NodeExecutionResult],
    deps: &DependencyMap,
) -> Option<Value> {
    results
        .iter()
        .rev()
        .find(|r| r.succeeded() && deps.is_sink(&r.node_id))
        .or_else(|| results.iter().rev().find(|r| r.succeeded()))
        .map(|r| r.output_data.clone())
}

/// A model response surfaces as its `content`; anything else as-is.
pub fn present_output(output: &Value) -> Value {
    match output.get("content") {
        Some(content) if output.is_object() => content.clone(),
        _ => output.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::types::{NodeKind, WorkflowEdge};
    use flowforge_test_utils::{node, FailingExecutor, ScriptedCompletion};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::registry::ExecutorServices;

    fn registry() -> Arc<ExecutorRegistry> {
        let mut registry =
            ExecutorRegistry::with_builtins(ExecutorServices::new(Arc::new(ScriptedCompletion::new())));
        registry.register(NodeKind::from("failing"), Arc::new(FailingExecutor::new("boom")));
        Arc::new(registry)
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl RunObserver for Recorder {
        fn on_event(&self, event: &ExecutionEvent) {
            self.0.lock().unwrap().push(event.name().to_string());
        }
    }

    #[tokio::test]
    async fn test_chains_document_into_completion() {
        let nodes = vec![
            node("doc-1", "document").with_config(json!({"text": "hello world"})),
            node("ai-1", "chatbot"),
        ];
        let deps = DependencyMap::new(&nodes, &[WorkflowEdge::new("doc-1", "ai-1")]);
        let mut ctx = ExecutionContext::new("run");
        let outcome = WorkflowRunner::new(registry())
            .run(&nodes, &deps, &mut ctx, Value::Null)
            .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.execution_order, vec!["doc-1", "ai-1"]);
        let final_output = outcome.final_output.unwrap();
        assert_eq!(present_output(&final_output), json!("echo: hello world"));
    }

    #[tokio::test]
    async fn test_failure_continues_and_final_output_falls_back() {
        // a -> b (fails), a -> c
        let nodes = vec![
            node("a", "document").with_config(json!({"text": "seed"})),
            node("b", "failing"),
            node("c", "logical_connector"),
        ];
        let edges = vec![WorkflowEdge::new("a", "b"), WorkflowEdge::new("a", "c")];
        let deps = DependencyMap::new(&nodes, &edges);
        let mut ctx = ExecutionContext::new("run");
        let outcome = WorkflowRunner::new(registry())
            .run(&nodes, &deps, &mut ctx, Value::Null)
            .await;

        assert!(!outcome.succeeded());
        assert_eq!(outcome.node_results.len(), 3);
        assert_eq!(outcome.errors(), vec!["Node b failed: boom".to_string()]);
        assert_eq!(outcome.final_output.unwrap()["operation"], "and");
        assert_eq!(ctx.get_output("b"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_stall_reports_remaining_nodes() {
        // x is fine; y <-> z can never become ready.
        let nodes = vec![node("x", "vapi"), node("y", "vapi"), node("z", "vapi")];
        let edges = vec![WorkflowEdge::new("y", "z"), WorkflowEdge::new("z", "y")];
        let deps = DependencyMap::new(&nodes, &edges);
        let recorder = Arc::new(Recorder::default());
        let mut ctx = ExecutionContext::new("run");
        let outcome = WorkflowRunner::new(registry())
            .with_observer(recorder.clone())
            .run(&nodes, &deps, &mut ctx, Value::Null)
            .await;

        assert_eq!(outcome.execution_order, vec!["x"]);
        assert_eq!(outcome.unexecuted, vec!["y", "z"]);
        assert!(!outcome.succeeded());
        assert!(outcome.errors()[0].contains("y, z"));
        let names = recorder.0.lock().unwrap().clone();
        assert_eq!(
            names,
            vec!["start", "graph_built", "node_start", "node_complete", "warning", "workflow_complete"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let nodes = vec![node("a", "vapi"), node("b", "vapi")];
        let deps = DependencyMap::new(&nodes, &[WorkflowEdge::new("a", "b")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = ExecutionContext::new("run");
        let outcome = WorkflowRunner::new(registry())
            .with_cancellation(cancel)
            .run(&nodes, &deps, &mut ctx, Value::Null)
            .await;
        assert!(outcome.cancelled);
        assert!(outcome.node_results.is_empty());
        assert_eq!(outcome.errors(), vec!["Execution cancelled".to_string()]);
    }

    #[tokio::test]
    async fn test_events_stream_through_channel() {
        let nodes = vec![node("only", "image")];
        let deps = DependencyMap::new(&nodes, &[]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctx = ExecutionContext::new("run");
        WorkflowRunner::new(registry())
            .with_observer(Arc::new(tx))
            .run(&nodes, &deps, &mut ctx, json!("a cat"))
            .await;

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["start", "graph_built", "node_start", "node_complete", "workflow_complete"]
        );
    }

    #[test]
    fn test_gather_input_shapes() {
        let mut ctx = ExecutionContext::new("run");
        ctx.record_output("b", json!("from b"));
        ctx.record_output("c", json!({"n": 3}));
        let initial = json!("initial");

        assert_eq!(gather_input(&[], &ctx, &initial), initial);
        assert_eq!(gather_input(&["b".into()], &ctx, &initial), json!("from b"));
        assert_eq!(
            gather_input(&["b".into(), "c".into()], &ctx, &initial),
            json!({"b": "from b", "c": {"n": 3}})
        );
    }

    #[test]
    fn test_present_output() {
        assert_eq!(present_output(&json!({"content": "hi", "model": "m"})), json!("hi"));
        assert_eq!(present_output(&json!({"text": "t"})), json!({"text": "t"}));
        assert_eq!(present_output(&json!("plain")), json!("plain"));
    }

    #[test]
    fn test_select_final_output_prefers_sink() {
        let nodes = vec![node("a", "vapi"), node("b", "vapi")];
        let deps = DependencyMap::new(&nodes, &[WorkflowEdge::new("a", "b")]);
        let results = vec![
            NodeExecutionResult::completed("b", json!("sink"), 1),
            NodeExecutionResult::completed("a", json!("source"), 1),
        ];
        assert_eq!(select_final_output(&results, &deps), Some(json!("sink")));

        let results = vec![
            NodeExecutionResult::completed("a", json!("source"), 1),
            NodeExecutionResult::failed("b", "x", 1),
        ];
        assert_eq!(select_final_output(&results, &deps), Some(json!("source")));
        assert_eq!(select_final_output(&[], &deps), None);
    }
}
