//! Pipeline errors as HTTP responses
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tgen_core::PipelineError;

/// Seconds a client should wait before retrying a contended run.
const RETRY_AFTER_SECS: &str = "1";

pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::StateConflict { .. } | PipelineError::IllegalTransition { .. } => {
                StatusCode::CONFLICT
            }
            PipelineError::InvalidSelection(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::LockContention(_) => StatusCode::LOCKED,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = Json(json!({ "error": self.0.kind(), "message": self.0.to_string() }));
        if matches!(self.0, PipelineError::LockContention(_)) {
            return (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], body).into_response();
        }
        (status, body).into_response()
    }
}
