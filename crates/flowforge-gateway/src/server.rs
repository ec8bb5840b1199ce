use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use flowforge_core::config::GatewayConfig;
use flowforge_engine::WorkflowExecutionService;

use crate::publisher::EndpointPublisher;
use crate::routes;
use crate::state::AppState;

impl AppState {
    /// State with a fresh publisher sharing the service's executor registry.
    pub fn new(config: GatewayConfig, service: Arc<WorkflowExecutionService>) -> Self {
        let publisher = Arc::new(EndpointPublisher::new(
            service.registry().clone(),
            service.config().clone(),
            config.base_url(),
        ));
        Self {
            config,
            service,
            publisher,
        }
    }
}

/// All static routes plus the catch-all for deployed endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        // Workflow execution
        .route("/api/workflow/execute", post(routes::execute_workflow))
        .route(
            "/api/workflow/execute-async",
            post(routes::execute_workflow_async),
        )
        .route("/api/workflow/status/{id}", get(routes::execution_status))
        .route("/api/workflow/cancel/{id}", post(routes::cancel_execution))
        .route(
            "/api/workflow/active-executions",
            get(routes::active_executions),
        )
        .route("/api/workflow/validate", post(routes::validate_workflow))
        .route("/api/workflow/supported-nodes", get(routes::supported_nodes))
        .route("/api/workflow/example-workflow", get(routes::example_workflow))
        // Deployment management
        .route("/api/deployment/send-workflow", post(routes::send_workflow))
        .route("/api/deployment/deployments", get(routes::list_deployments))
        .route(
            "/api/deployment/deployments/{id}",
            get(routes::get_deployment).delete(routes::delete_deployment),
        )
        .route(
            "/api/deployment/defaults/{kind}",
            get(routes::get_defaults)
                .put(routes::update_defaults)
                .delete(routes::reset_defaults),
        )
        // Deployed endpoints, resolved at request time
        .route("/api/deployed/{*rest}", any(routes::deployed))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway for workflow execution and deployed endpoints.
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, service: Arc<WorkflowExecutionService>) -> Self {
        Self {
            state: Arc::new(AppState::new(config, service)),
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = build_router(self.state.clone());
        let bind = self.state.config.bind.clone();

        let listener = TcpListener::bind(&bind).await?;
        info!(bind = %bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
