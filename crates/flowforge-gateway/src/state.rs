use std::sync::Arc;

use flowforge_core::config::GatewayConfig;
use flowforge_engine::WorkflowExecutionService;

use crate::publisher::EndpointPublisher;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub service: Arc<WorkflowExecutionService>,
    pub publisher: Arc<EndpointPublisher>,
}
