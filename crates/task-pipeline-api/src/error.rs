use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use task_pipeline_core::PipelineError;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    QueueUnavailable,
    StoreUnavailable,
    Internal(String),
}

impl ApiError {
    /// Map a failure from the result store. Unreachable there means the
    /// store is down, not the queue.
    pub fn from_store(err: PipelineError) -> Self {
        if err.is_unavailable() {
            ApiError::StoreUnavailable
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

/// Broker-side failures from task submission
impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        if err.is_unavailable() {
            ApiError::QueueUnavailable
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::QueueUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Queue not available".to_string(),
            ),
            ApiError::StoreUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Result store not available".to_string(),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
