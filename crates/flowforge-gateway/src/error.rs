use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use flowforge_core::error::FlowError;

/// A [`FlowError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub FlowError);

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FlowError::Validation(_) | FlowError::CyclicGraph => StatusCode::BAD_REQUEST,
            FlowError::DeploymentNotFound(_)
            | FlowError::ExecutionNotFound(_)
            | FlowError::ConfigNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = match &self.0 {
            FlowError::Validation(errors) => errors.clone(),
            _ => vec![],
        };
        let body = json!({
            "error": self.0.to_string(),
            "details": details,
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
