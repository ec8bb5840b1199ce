use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowforge_core::config::EngineConfig;
use flowforge_core::context::ExecutionContext;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::event::{ExecutionEvent, RunObserver};
use flowforge_core::types::{Capability, NodeKind, WorkflowDefinition, WorkflowNode};
use flowforge_engine::{present_output, DependencyMap, ExecutorRegistry, WorkflowRunner};

use crate::defaults::DefaultConfigStore;
use crate::protocol::*;

/// Path prefix shared by every deployed route.
pub const DEPLOYED_PREFIX: &str = "/api/deployed";

/// Handler stored in the runtime route table. Receives the raw request body.
pub type RouteHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Response> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: Method,
    path: String,
}

fn handler<F, Fut>(f: F) -> RouteHandler
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |body| Box::pin(f(body)))
}

/// Action route exposed for a node kind, if any.
fn action_route(kind: &NodeKind) -> Option<(&'static str, &'static str)> {
    match kind.capability() {
        Capability::ModelCompletion => Some(("completion", "Run a model completion with this node")),
        Capability::GraphQuery => Some(("query", "Query the knowledge graph with this node")),
        _ => None,
    }
}

// ── Deployment snapshot ─────────────────────────────────────────

/// Frozen copy of a workflow plus what its routes need to run it.
struct DeploymentRuntime {
    deployment_id: String,
    workflow_name: String,
    nodes: Vec<WorkflowNode>,
    edge_count: usize,
    deps: DependencyMap,
    registry: Arc<ExecutorRegistry>,
    engine: EngineConfig,
    created_at: DateTime<Utc>,
}

impl DeploymentRuntime {
    fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    fn context(&self, debug: bool) -> ExecutionContext {
        ExecutionContext::new(format!("{}-{}", self.deployment_id, Uuid::new_v4()))
            .with_debug(debug || self.engine.debug)
            .with_log_tail(self.engine.log_tail)
    }

    // GET .../health
    fn health(&self) -> Response {
        Json(json!({
            "status": "healthy",
            "deployment_id": self.deployment_id,
            "workflow_name": self.workflow_name,
            "node_count": self.nodes.len(),
            "edge_count": self.edge_count,
            "created_at": self.created_at,
        }))
        .into_response()
    }

    // GET .../nodes/{node_id}/status
    fn node_status(&self, node_id: &str) -> Response {
        let Some(node) = self.node(node_id) else {
            return not_found(format!("Node not found: {node_id}"));
        };
        let fully_implemented = self.registry.is_fully_implemented(&node.kind);
        Json(json!({
            "deployment_id": self.deployment_id,
            "node_id": node.id,
            "node_type": node.kind,
            "label": node.label(),
            "description": node.description(),
            "config": node.redacted_config(),
            "fully_implemented": fully_implemented,
            "status": if fully_implemented { "ready" } else { "placeholder" },
        }))
        .into_response()
    }

    // POST .../nodes/{node_id}/completion | query
    async fn node_action(&self, node_id: &str, body: Bytes) -> Response {
        let request: NodeActionRequest = match parse_body(&body) {
            Ok(r) => r,
            Err(response) => return response,
        };
        let Some(snapshot) = self.node(node_id) else {
            return not_found(format!("Node not found: {node_id}"));
        };

        let mut node = snapshot.clone();
        node.config.extend(request.parameters);

        let mut ctx = self.context(request.debug);
        let executor = self.registry.get(&node.kind);
        let result = executor.execute(&node, &mut ctx, request.input_data).await;

        let message = if result.succeeded() {
            format!("{} node executed successfully", node.kind)
        } else {
            result
                .error_message
                .clone()
                .unwrap_or_else(|| "Node execution failed".to_string())
        };
        debug!(
            deployment_id = %self.deployment_id,
            node_id = %node.id,
            success = result.succeeded(),
            "Node action finished"
        );

        Json(NodeActionResponse {
            success: result.succeeded(),
            node_id: node.id.clone(),
            node_type: node.kind.clone(),
            output_data: result.output_data,
            execution_time_ms: result.execution_time_ms,
            message,
            timestamp: Utc::now(),
        })
        .into_response()
    }

    // POST .../execute
    async fn execute(&self, body: Bytes) -> Response {
        let request: DeployedRunRequest = match parse_body(&body) {
            Ok(r) => r,
            Err(response) => return response,
        };
        let start = Instant::now();
        let mut ctx = self.context(request.debug).with_run_data(request.run_data);
        let execution_id = ctx.execution_id().to_string();

        let outcome = WorkflowRunner::new(self.registry.clone())
            .run(&self.nodes, &self.deps, &mut ctx, request.input_data)
            .await;

        info!(
            deployment_id = %self.deployment_id,
            execution_id = %execution_id,
            success = outcome.succeeded(),
            "Deployed workflow executed"
        );

        Json(DeployedRunResponse {
            success: outcome.succeeded(),
            deployment_id: self.deployment_id.clone(),
            execution_id,
            execution_time_ms: start.elapsed().as_millis() as u64,
            execution_order: outcome.execution_order.clone(),
            final_output: outcome
                .final_output
                .as_ref()
                .map(present_output)
                .unwrap_or(Value::Null),
            node_outputs: outcome.node_outputs(),
            errors: outcome.errors(),
            node_results: outcome.node_results,
        })
        .into_response()
    }

    // POST .../execute-stream
    fn execute_stream(self: Arc<Self>, body: Bytes) -> Response {
        let request: DeployedRunRequest = match parse_body(&body) {
            Ok(r) => r,
            Err(response) => return response,
        };
        let (tx, rx) = mpsc::unbounded_channel::<std::result::Result<Event, Infallible>>();
        let cancel = CancellationToken::new();
        let observer = Arc::new(StreamObserver {
            tx,
            cancel: cancel.clone(),
        });

        tokio::spawn(async move {
            let mut ctx = self.context(request.debug).with_run_data(request.run_data);
            let outcome = WorkflowRunner::new(self.registry.clone())
                .with_observer(observer)
                .with_cancellation(cancel)
                .run(&self.nodes, &self.deps, &mut ctx, request.input_data)
                .await;
            debug!(
                deployment_id = %self.deployment_id,
                cancelled = outcome.cancelled,
                "Stream run finished"
            );
        });

        Sse::new(UnboundedReceiverStream::new(rx))
            .keep_alive(KeepAlive::default())
            .into_response()
    }
}

fn sse_event(event: &ExecutionEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}

/// Forwards runner events to an SSE response. A closed channel means the
/// client went away, which cancels the run before its next node.
struct StreamObserver {
    tx: mpsc::UnboundedSender<std::result::Result<Event, Infallible>>,
    cancel: CancellationToken,
}

impl RunObserver for StreamObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        if self.tx.send(Ok(sse_event(event))).is_err() && !self.cancel.is_cancelled() {
            info!("Stream client disconnected, cancelling run");
            self.cancel.cancel();
        }
    }
}

/// Empty body means defaults; anything else must be valid JSON.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> std::result::Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid request body: {e}"), "details": []})),
        )
            .into_response()
    })
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": message, "details": []})),
    )
        .into_response()
}

// ── Publisher ───────────────────────────────────────────────────

struct Deployment {
    runtime: Arc<DeploymentRuntime>,
    endpoints: Vec<EndpointDescriptor>,
    keys: Vec<RouteKey>,
    deployment_url: String,
}

impl Deployment {
    fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            deployment_id: self.runtime.deployment_id.clone(),
            workflow_name: self.runtime.workflow_name.clone(),
            node_count: self.runtime.nodes.len(),
            edge_count: self.runtime.edge_count,
            endpoint_count: self.endpoints.len(),
            deployment_url: self.deployment_url.clone(),
            created_at: self.runtime.created_at,
        }
    }
}

#[derive(Default)]
struct PublisherState {
    deployments: HashMap<String, Deployment>,
    routes: HashMap<RouteKey, RouteHandler>,
}

/// Registers deployments and serves their routes without a restart.
///
/// Handlers close over the deployment snapshot, never over the caller's
/// workflow or the default store. One lock guards both the deployment
/// records and the route table, so a deployment and its routes appear and
/// disappear together.
pub struct EndpointPublisher {
    registry: Arc<ExecutorRegistry>,
    engine: EngineConfig,
    base_url: String,
    defaults: DefaultConfigStore,
    state: RwLock<PublisherState>,
}

struct PendingRoute {
    key: RouteKey,
    endpoint: EndpointDescriptor,
    handler: RouteHandler,
}

impl EndpointPublisher {
    pub fn new(registry: Arc<ExecutorRegistry>, engine: EngineConfig, base_url: String) -> Self {
        Self {
            registry,
            engine,
            base_url: base_url.trim_end_matches('/').to_string(),
            defaults: DefaultConfigStore::new(),
            state: RwLock::new(PublisherState::default()),
        }
    }

    pub fn defaults(&self) -> &DefaultConfigStore {
        &self.defaults
    }

    /// Validate, snapshot, and publish a workflow.
    pub fn deploy(&self, workflow: &WorkflowDefinition) -> Result<DeployResponse> {
        let errors = workflow.structural_errors();
        if !errors.is_empty() {
            return Err(FlowError::Validation(errors));
        }
        if DependencyMap::from_workflow(workflow).has_cycle() {
            return Err(FlowError::CyclicGraph);
        }

        let deployment_id = format!("deploy-{}", Uuid::new_v4());
        let mut nodes = workflow.nodes.clone();
        for node in &mut nodes {
            self.defaults.apply(node);
        }
        let runtime = Arc::new(DeploymentRuntime {
            deployment_id: deployment_id.clone(),
            workflow_name: workflow.name.clone(),
            deps: DependencyMap::new(&nodes, &workflow.edges),
            nodes,
            edge_count: workflow.edges.len(),
            registry: self.registry.clone(),
            engine: self.engine.clone(),
            created_at: Utc::now(),
        });

        let pending = self.build_routes(&runtime);
        let endpoints: Vec<EndpointDescriptor> =
            pending.iter().map(|r| r.endpoint.clone()).collect();
        let deployment_url = format!("{}{}/{}", self.base_url, DEPLOYED_PREFIX, deployment_id);

        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let mut keys = Vec::with_capacity(pending.len());
            for route in pending {
                keys.push(route.key.clone());
                state.routes.insert(route.key, route.handler);
            }
            state.deployments.insert(
                deployment_id.clone(),
                Deployment {
                    runtime: runtime.clone(),
                    endpoints: endpoints.clone(),
                    keys,
                    deployment_url: deployment_url.clone(),
                },
            );
        }

        info!(
            deployment_id = %deployment_id,
            workflow = %workflow.name,
            routes = endpoints.len(),
            "Workflow deployed"
        );

        Ok(DeployResponse {
            success: true,
            message: format!(
                "Workflow '{}' deployed with {} live endpoints",
                workflow.name,
                endpoints.len()
            ),
            deployment_id,
            workflow_received: WorkflowReceived {
                name: workflow.name.clone(),
                node_count: workflow.nodes.len(),
                edge_count: workflow.edges.len(),
                node_types: workflow.node_kinds(),
            },
            live_endpoints_count: endpoints.len(),
            endpoints,
            deployment_url,
            timestamp: Utc::now(),
        })
    }

    fn build_routes(&self, runtime: &Arc<DeploymentRuntime>) -> Vec<PendingRoute> {
        let prefix = format!("{}/{}", DEPLOYED_PREFIX, runtime.deployment_id);
        let mut routes = Vec::new();

        for node in &runtime.nodes {
            let id = node.id.clone();

            let rt = runtime.clone();
            let node_id = id.clone();
            routes.push(self.route(
                Method::GET,
                &prefix,
                &["nodes", &id, "status"],
                format!("Status and configuration of node '{}'", node.label()),
                handler(move |_| {
                    let rt = rt.clone();
                    let node_id = node_id.clone();
                    async move { rt.node_status(&node_id) }
                }),
            ));

            if let Some((action, description)) = action_route(&node.kind) {
                let rt = runtime.clone();
                let node_id = id.clone();
                routes.push(self.route(
                    Method::POST,
                    &prefix,
                    &["nodes", &id, action],
                    format!("{description} ('{}')", node.label()),
                    handler(move |body| {
                        let rt = rt.clone();
                        let node_id = node_id.clone();
                        async move { rt.node_action(&node_id, body).await }
                    }),
                ));
            }
        }

        let rt = runtime.clone();
        routes.push(self.route(
            Method::GET,
            &prefix,
            &["health"],
            "Deployment health".to_string(),
            handler(move |_| {
                let rt = rt.clone();
                async move { rt.health() }
            }),
        ));

        let rt = runtime.clone();
        routes.push(self.route(
            Method::POST,
            &prefix,
            &["execute"],
            "Execute the whole workflow".to_string(),
            handler(move |body| {
                let rt = rt.clone();
                async move { rt.execute(body).await }
            }),
        ));

        let rt = runtime.clone();
        routes.push(self.route(
            Method::POST,
            &prefix,
            &["execute-stream"],
            "Execute the workflow, streaming progress events".to_string(),
            handler(move |body| {
                let rt = rt.clone();
                async move { rt.execute_stream(body) }
            }),
        ));

        routes
    }

    fn route(
        &self,
        method: Method,
        prefix: &str,
        segments: &[&str],
        description: String,
        handler: RouteHandler,
    ) -> PendingRoute {
        let path = format!("{prefix}/{}", segments.join("/"));
        let encoded: Vec<String> = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        let public_path = format!("{prefix}/{}", encoded.join("/"));
        PendingRoute {
            endpoint: EndpointDescriptor {
                method: method.to_string(),
                url: format!("{}{}", self.base_url, public_path),
                path: public_path,
                description,
            },
            key: RouteKey { method, path },
            handler,
        }
    }

    pub fn list(&self) -> Vec<DeploymentSummary> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<DeploymentSummary> =
            state.deployments.values().map(Deployment::summary).collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.deployment_id.cmp(&b.deployment_id))
        });
        list
    }

    pub fn get(&self, deployment_id: &str) -> Result<DeploymentDetail> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let deployment = state
            .deployments
            .get(deployment_id)
            .ok_or_else(|| FlowError::DeploymentNotFound(deployment_id.to_string()))?;
        Ok(DeploymentDetail {
            summary: deployment.summary(),
            endpoints: deployment.endpoints.clone(),
        })
    }

    /// Unregister a deployment and all of its routes.
    pub fn remove(&self, deployment_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let deployment = state
            .deployments
            .remove(deployment_id)
            .ok_or_else(|| FlowError::DeploymentNotFound(deployment_id.to_string()))?;
        for key in &deployment.keys {
            state.routes.remove(key);
        }
        drop(state);

        info!(
            deployment_id,
            routes = deployment.keys.len(),
            "Deployment removed"
        );
        Ok(())
    }

    /// Number of live routes across all deployments.
    pub fn route_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .routes
            .len()
    }

    /// Look up the handler for a decoded request path.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteHandler> {
        let key = RouteKey {
            method: method.clone(),
            path: path.to_string(),
        };
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .routes
            .get(&key)
            .cloned()
    }

    /// Invoke the route registered for `method` and `path`, if any. The
    /// table lock is released before the handler runs.
    pub async fn dispatch(&self, method: &Method, path: &str, body: Bytes) -> Option<Response> {
        let Some(handler) = self.resolve(method, path) else {
            warn!(%method, path, "No deployed route");
            return None;
        };
        Some(handler(body).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_engine::ExecutorServices;
    use flowforge_test_utils::{document_to_chatbot, node, ScriptedCompletion};

    fn publisher() -> EndpointPublisher {
        let services = ExecutorServices::new(Arc::new(ScriptedCompletion::replying("summary")));
        EndpointPublisher::new(
            Arc::new(ExecutorRegistry::with_builtins(services)),
            EngineConfig::default(),
            "http://localhost:8000/".to_string(),
        )
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_route_set_for_document_and_chatbot() {
        let publisher = publisher();
        let deployed = publisher.deploy(&document_to_chatbot()).unwrap();
        assert_eq!(deployed.live_endpoints_count, 6);
        assert_eq!(publisher.route_count(), 6);
        assert!(deployed.deployment_id.starts_with("deploy-"));

        let paths: Vec<&str> = deployed.endpoints.iter().map(|e| e.path.as_str()).collect();
        let prefix = format!("/api/deployed/{}", deployed.deployment_id);
        assert!(paths.contains(&format!("{prefix}/nodes/ai-1/completion").as_str()));
        assert!(!paths.contains(&format!("{prefix}/nodes/doc-1/completion").as_str()));
        assert!(paths.contains(&format!("{prefix}/execute-stream").as_str()));
        assert_eq!(
            deployed.deployment_url,
            format!("http://localhost:8000{prefix}")
        );
    }

    #[test]
    fn test_deploy_rejects_invalid_graphs() {
        let publisher = publisher();
        let empty = WorkflowDefinition::new("empty");
        assert!(matches!(
            publisher.deploy(&empty),
            Err(FlowError::Validation(_))
        ));

        let cyclic = WorkflowDefinition::new("loop")
            .with_node(node("a", "document"))
            .with_node(node("b", "document"))
            .with_edge("a", "b")
            .with_edge("b", "a");
        assert!(matches!(publisher.deploy(&cyclic), Err(FlowError::CyclicGraph)));
        assert_eq!(publisher.route_count(), 0);
    }

    #[test]
    fn test_node_ids_are_encoded_in_urls() {
        let publisher = publisher();
        let wf = WorkflowDefinition::new("spaces").with_node(node("my node", "graphrag"));
        let deployed = publisher.deploy(&wf).unwrap();
        let query = deployed
            .endpoints
            .iter()
            .find(|e| e.path.ends_with("/query"))
            .unwrap();
        assert!(query.path.contains("/nodes/my%20node/query"));

        let raw = format!("/api/deployed/{}/nodes/my node/query", deployed.deployment_id);
        assert!(publisher.resolve(&Method::POST, &raw).is_some());
        assert!(publisher.resolve(&Method::GET, &raw).is_none());
    }

    #[tokio::test]
    async fn test_remove_unregisters_routes() {
        let publisher = publisher();
        let first = publisher.deploy(&document_to_chatbot()).unwrap();
        let second = publisher.deploy(&document_to_chatbot()).unwrap();
        assert_eq!(publisher.route_count(), 12);

        publisher.remove(&first.deployment_id).unwrap();
        assert_eq!(publisher.route_count(), 6);
        assert_eq!(publisher.list().len(), 1);
        assert!(matches!(
            publisher.remove(&first.deployment_id),
            Err(FlowError::DeploymentNotFound(_))
        ));

        let health = format!("/api/deployed/{}/health", first.deployment_id);
        assert!(publisher
            .dispatch(&Method::GET, &health, Bytes::new())
            .await
            .is_none());
        let health = format!("/api/deployed/{}/health", second.deployment_id);
        let response = publisher
            .dispatch(&Method::GET, &health, Bytes::new())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_node_action_merges_parameters() {
        let publisher = publisher();
        let deployed = publisher.deploy(&document_to_chatbot()).unwrap();
        let path = format!("/api/deployed/{}/nodes/ai-1/completion", deployed.deployment_id);
        let body = Bytes::from(
            json!({"input_data": "some text", "parameters": {"model": "gpt-test"}}).to_string(),
        );
        let response = publisher.dispatch(&Method::POST, &path, body).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["node_type"], "chatbot");
        assert_eq!(json["output_data"]["content"], "summary");
        assert_eq!(json["output_data"]["model"], "gpt-test");

        // The snapshot itself is unchanged
        let status = format!("/api/deployed/{}/nodes/ai-1/status", deployed.deployment_id);
        let response = publisher
            .dispatch(&Method::GET, &status, Bytes::new())
            .await
            .unwrap();
        assert!(body_json(response).await["config"].get("model").is_none());
    }

    #[tokio::test]
    async fn test_bad_body_is_rejected() {
        let publisher = publisher();
        let deployed = publisher.deploy(&document_to_chatbot()).unwrap();
        let path = format!("/api/deployed/{}/execute", deployed.deployment_id);
        let response = publisher
            .dispatch(&Method::POST, &path, Bytes::from_static(b"{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_stream_body_is_rejected_before_streaming() {
        let publisher = publisher();
        let deployed = publisher.deploy(&document_to_chatbot()).unwrap();
        let path = format!("/api/deployed/{}/execute-stream", deployed.deployment_id);
        let response = publisher
            .dispatch(&Method::POST, &path, Bytes::from_static(b"{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request body"));
    }

    type EventRx = mpsc::UnboundedReceiver<std::result::Result<Event, Infallible>>;

    /// Hangs up the client side right after the first node starts.
    struct HangUpAfterFirstNode {
        inner: StreamObserver,
        rx: std::sync::Mutex<Option<EventRx>>,
        seen: std::sync::Mutex<Vec<&'static str>>,
    }

    impl RunObserver for HangUpAfterFirstNode {
        fn on_event(&self, event: &ExecutionEvent) {
            self.seen.lock().unwrap().push(event.name());
            self.inner.on_event(event);
            if matches!(event, ExecutionEvent::NodeStart { .. }) {
                self.rx.lock().unwrap().take();
            }
        }
    }

    #[tokio::test]
    async fn test_stream_disconnect_cancels_remaining_nodes() {
        let workflow = document_to_chatbot();
        let registry = Arc::new(ExecutorRegistry::with_builtins(ExecutorServices::new(
            Arc::new(ScriptedCompletion::new()),
        )));
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let observer = Arc::new(HangUpAfterFirstNode {
            inner: StreamObserver {
                tx,
                cancel: cancel.clone(),
            },
            rx: std::sync::Mutex::new(Some(rx)),
            seen: std::sync::Mutex::new(Vec::new()),
        });

        let deps = DependencyMap::from_workflow(&workflow);
        let mut ctx = ExecutionContext::new("stream");
        let outcome = WorkflowRunner::new(registry)
            .with_observer(observer.clone())
            .with_cancellation(cancel.clone())
            .run(&workflow.nodes, &deps, &mut ctx, Value::Null)
            .await;

        assert!(cancel.is_cancelled());
        assert!(outcome.cancelled);
        assert_eq!(outcome.execution_order, vec!["doc-1".to_string()]);
        assert_eq!(outcome.unexecuted, vec!["ai-1".to_string()]);
        let seen = observer.seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|n| **n == "node_start").count(), 1);
    }
}
