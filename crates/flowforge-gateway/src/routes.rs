use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Map, Value};
use tracing::info;

use flowforge_core::types::*;
use flowforge_engine::{ValidationReport, WorkflowExecutionService};

use crate::error::ApiResult;
use crate::protocol::{DeployResponse, DeploymentDetail};
use crate::publisher::DEPLOYED_PREFIX;
use crate::state::AppState;

// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Workflow execution ──────────────────────────────────────────

// POST /api/workflow/execute
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WorkflowExecutionRequest>,
) -> Json<WorkflowExecutionResult> {
    Json(state.service.execute(request).await)
}

// POST /api/workflow/execute-async
pub async fn execute_workflow_async(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WorkflowExecutionRequest>,
) -> Json<Value> {
    let execution_id = state.service.execute_async(request);
    Json(json!({
        "execution_id": execution_id,
        "status": "started",
        "message": "Workflow execution started",
    }))
}

// GET /api/workflow/status/{id}
pub async fn execution_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowExecutionStatus>> {
    Ok(Json(state.service.status(&id)?))
}

// POST /api/workflow/cancel/{id}
pub async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let cancelled = state.service.cancel(&id)?;
    let message = if cancelled {
        "Cancellation requested"
    } else {
        "Execution already finished"
    };
    Ok(Json(json!({
        "execution_id": id,
        "cancelled": cancelled,
        "message": message,
    })))
}

// GET /api/workflow/active-executions
pub async fn active_executions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let active = state.service.active_executions();
    Json(json!({
        "count": active.len(),
        "active_executions": active,
    }))
}

// POST /api/workflow/validate
pub async fn validate_workflow(
    State(state): State<Arc<AppState>>,
    Json(workflow): Json<WorkflowDefinition>,
) -> Json<ValidationReport> {
    Json(state.service.validate(&workflow))
}

// GET /api/workflow/supported-nodes
pub async fn supported_nodes(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = state.service.registry();
    let nodes: Vec<Value> = registry
        .supported_kinds()
        .into_iter()
        .map(|kind| {
            let executor = registry.get(&kind);
            json!({
                "type": kind,
                "capability": kind.capability(),
                "fully_implemented": !executor.is_placeholder(),
                "required_inputs": executor.required_inputs(),
                "output_schema": executor.output_schema(),
            })
        })
        .collect();
    Json(json!({
        "count": nodes.len(),
        "node_types": nodes,
    }))
}

// GET /api/workflow/example-workflow
pub async fn example_workflow() -> Json<WorkflowDefinition> {
    Json(WorkflowExecutionService::example_workflow())
}

// ── Deployments ─────────────────────────────────────────────────

// POST /api/deployment/send-workflow
pub async fn send_workflow(
    State(state): State<Arc<AppState>>,
    Json(workflow): Json<WorkflowDefinition>,
) -> ApiResult<Json<DeployResponse>> {
    Ok(Json(state.publisher.deploy(&workflow)?))
}

// GET /api/deployment/deployments
pub async fn list_deployments(State(state): State<Arc<AppState>>) -> Json<Value> {
    let deployments = state.publisher.list();
    Json(json!({
        "count": deployments.len(),
        "deployments": deployments,
    }))
}

// GET /api/deployment/deployments/{id}
pub async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentDetail>> {
    Ok(Json(state.publisher.get(&id)?))
}

// DELETE /api/deployment/deployments/{id}
pub async fn delete_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.publisher.remove(&id)?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Deployment {id} removed"),
    })))
}

fn defaults_body(kind: &NodeKind, config: Map<String, Value>) -> Json<Value> {
    Json(json!({
        "node_type": kind,
        "config": redact_secrets(&config),
    }))
}

// GET /api/deployment/defaults/{kind}
pub async fn get_defaults(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Json<Value> {
    let kind = NodeKind::from(kind);
    defaults_body(&kind, state.publisher.defaults().get(&kind))
}

// PUT /api/deployment/defaults/{kind}
pub async fn update_defaults(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Json(patch): Json<Map<String, Value>>,
) -> Json<Value> {
    let kind = NodeKind::from(kind);
    defaults_body(&kind, state.publisher.defaults().update(&kind, patch))
}

// DELETE /api/deployment/defaults/{kind}
pub async fn reset_defaults(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Json<Value> {
    let kind = NodeKind::from(kind);
    info!(kind = %kind, "Default node config reset");
    defaults_body(&kind, state.publisher.defaults().reset(&kind))
}

// ANY /api/deployed/{*rest}
pub async fn deployed(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(rest): Path<String>,
    body: Bytes,
) -> Response {
    let path = format!("{DEPLOYED_PREFIX}/{rest}");
    match state.publisher.dispatch(&method, &path, body).await {
        Some(response) => response,
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("No deployed route for {method} {path}"),
                "details": [],
            })),
        )
            .into_response(),
    }
}
