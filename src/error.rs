use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Malformed query string: {0}")]
    MalformedQuery(String),
}

/// JSON error body returned to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Both variants are caller faults; nothing here reaches a handler.
        let status = match &self {
            AppError::Validation(_) | AppError::MalformedQuery(_) => StatusCode::BAD_REQUEST,
        };
        tracing::debug!(error = %self, "Rejecting request");

        let body = ErrorBody {
            status_code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error"),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
