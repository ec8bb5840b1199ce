use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::error::{FlowError, Result};
use crate::types::*;

/// Node executor: one implementation per node capability.
///
/// Instances are cached per node kind and shared by concurrent runs, so an
/// executor must not keep per-invocation state in `self`. Everything a call
/// needs lives in `node`, `ctx`, and `input`.
pub trait NodeExecutor: Send + Sync + 'static {
    /// Kind-specific logic. Errors are turned into failed results by
    /// [`NodeExecutor::execute`]; implementations may use `?` freely.
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>>;

    /// Cheap local configuration check. Must not perform I/O.
    fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String> {
        let _ = config;
        Ok(())
    }

    /// Input names this kind expects. Most kinds fall back to config.
    fn required_inputs(&self) -> Vec<String> {
        vec![]
    }

    /// Documentation-only description of the output shape.
    fn output_schema(&self) -> Value {
        serde_json::json!({ "type": "any" })
    }

    /// Whether this executor only produces synthetic output.
    fn is_placeholder(&self) -> bool {
        false
    }

    /// Run the node with timing and logging. Never fails: errors and panics
    /// inside [`NodeExecutor::run`] become a `failed` result.
    fn execute<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, NodeExecutionResult> {
        Box::pin(async move {
            let start = Instant::now();
            ctx.node_log(
                LogLevel::Info,
                &node.id,
                format!("Starting execution of {} node", node.kind),
            );
            ctx.log(
                LogLevel::Debug,
                "Node configuration",
                Some(&node.id),
                Some(Value::Object(node.redacted_config())),
            );

            let outcome = match self.validate(&node.config) {
                Err(message) => Err(FlowError::InvalidConfig {
                    node_id: node.id.clone(),
                    message,
                }),
                Ok(()) => match AssertUnwindSafe(self.run(node, ctx, input))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => Err(FlowError::node(&node.id, panic_message(panic))),
                },
            };

            let elapsed_ms = start.elapsed().as_millis() as u64;
            let result = match outcome {
                Ok(output) => {
                    ctx.node_log(
                        LogLevel::Info,
                        &node.id,
                        format!("Node completed in {elapsed_ms}ms"),
                    );
                    NodeExecutionResult::completed(&node.id, output, elapsed_ms)
                }
                Err(e) => {
                    let message = match e {
                        FlowError::NodeExecution { message, .. } => message,
                        other => other.to_string(),
                    };
                    ctx.node_log(
                        LogLevel::Error,
                        &node.id,
                        format!("Node execution failed: {message}"),
                    );
                    NodeExecutionResult::failed(&node.id, message, elapsed_ms)
                }
            };

            result.with_logs(ctx.node_log_tail(&node.id))
        })
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("executor panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("executor panicked: {s}")
    } else {
        "executor panicked".to_string()
    }
}

/// Chat completion client. One call, one response.
pub trait CompletionClient: Send + Sync + 'static {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<CompletionResponse>>;
}

/// Graph database backend used by graph-query nodes.
pub trait GraphStore: Send + Sync + 'static {
    /// Backend name reported in node output metadata.
    fn name(&self) -> &str;

    /// Whether a real database sits behind this store.
    fn is_persistent(&self) -> bool {
        false
    }

    /// Persist entities and relationships; returns how many items were stored.
    fn store(
        &self,
        entities: Vec<Value>,
        relationships: Vec<Value>,
    ) -> BoxFuture<'_, Result<usize>>;

    /// Look up stored entities matching a free-text query.
    fn query(&self, text: String, limit: usize) -> BoxFuture<'_, Result<Vec<Value>>>;

    /// Summary counts for the `analyze` operation.
    fn stats(&self) -> BoxFuture<'_, Result<Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl NodeExecutor for Echo {
        fn run<'a>(
            &'a self,
            node: &'a WorkflowNode,
            ctx: &'a mut ExecutionContext,
            input: Value,
        ) -> BoxFuture<'a, Result<Value>> {
            Box::pin(async move {
                ctx.node_log(LogLevel::Debug, &node.id, "echoing");
                Ok(input)
            })
        }
    }

    struct Broken;

    impl NodeExecutor for Broken {
        fn run<'a>(
            &'a self,
            node: &'a WorkflowNode,
            _ctx: &'a mut ExecutionContext,
            _input: Value,
        ) -> BoxFuture<'a, Result<Value>> {
            Box::pin(async move { Err(FlowError::node(&node.id, "upstream refused")) })
        }

        fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String> {
            match config.get("limit").and_then(Value::as_u64) {
                Some(n) if n > 10 => Err("limit must be at most 10".into()),
                _ => Ok(()),
            }
        }
    }

    struct Panicky;

    impl NodeExecutor for Panicky {
        fn run<'a>(
            &'a self,
            _node: &'a WorkflowNode,
            _ctx: &'a mut ExecutionContext,
            _input: Value,
        ) -> BoxFuture<'a, Result<Value>> {
            Box::pin(async move {
                let items: Vec<Value> = vec![];
                Ok(items[3].clone())
            })
        }
    }

    #[tokio::test]
    async fn test_execute_success_records_logs() {
        let node = WorkflowNode::new("n1", NodeKind::Document);
        let mut ctx = ExecutionContext::new("run");
        let result = Echo.execute(&node, &mut ctx, json!("hi")).await;
        assert!(result.succeeded());
        assert_eq!(result.output_data, json!("hi"));
        assert!(result.logs.iter().any(|l| l.message == "echoing"));
        assert!(result.logs.len() <= 10);
    }

    #[tokio::test]
    async fn test_execute_never_logs_credentials() {
        let node = WorkflowNode::new("ai-1", NodeKind::Chatbot)
            .with_config(json!({"api_key": "sk-SECRET-123", "temperature": 0.2}));
        let mut ctx = ExecutionContext::new("run").with_debug(true);
        let result = Echo.execute(&node, &mut ctx, json!("hi")).await;

        let node_logs = serde_json::to_string(&result.logs).unwrap();
        let run_logs = serde_json::to_string(ctx.logs()).unwrap();
        assert!(!node_logs.contains("sk-SECRET-123"));
        assert!(!run_logs.contains("sk-SECRET-123"));
        let entry = ctx
            .logs()
            .iter()
            .find(|l| l.message == "Node configuration")
            .unwrap();
        assert_eq!(entry.details.as_ref().unwrap()["temperature"], 0.2);
    }

    #[tokio::test]
    async fn test_execute_converts_error() {
        let node = WorkflowNode::new("n1", NodeKind::Api);
        let mut ctx = ExecutionContext::new("run");
        let result = Broken.execute(&node, &mut ctx, Value::Null).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("upstream refused"));
        assert!(ctx
            .logs()
            .iter()
            .any(|l| l.level == LogLevel::Error && l.node_id.as_deref() == Some("n1")));
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_config() {
        let node = WorkflowNode::new("n1", NodeKind::Api).with_config(json!({"limit": 50}));
        let mut ctx = ExecutionContext::new("run");
        let result = Broken.execute(&node, &mut ctx, Value::Null).await;
        assert!(!result.succeeded());
        assert!(result
            .error_message
            .unwrap()
            .contains("limit must be at most 10"));
    }

    #[tokio::test]
    async fn test_execute_catches_panic() {
        let node = WorkflowNode::new("n1", NodeKind::Search);
        let mut ctx = ExecutionContext::new("run");
        let result = Panicky.execute(&node, &mut ctx, Value::Null).await;
        assert!(!result.succeeded());
        assert!(result
            .error_message
            .unwrap()
            .starts_with("executor panicked: index out of bounds"));
    }

    #[test]
    fn test_default_contract_hints() {
        assert!(Echo.required_inputs().is_empty());
        assert_eq!(Echo.output_schema(), json!({"type": "any"}));
        assert!(!Echo.is_placeholder());
    }
}
