use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::error::AdjustError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("Upstream error: {0}")]
    BadGateway(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {msg}"),
            ),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<AdjustError> for AppError {
    fn from(err: AdjustError) -> Self {
        match err {
            AdjustError::Validation(msg) => AppError::InvalidInput(msg),
            AdjustError::NotFound(msg) => AppError::NotFound(msg),
            AdjustError::Conflict(msg) => AppError::Conflict(msg),
            AdjustError::Database(e) => {
                error!(error = %e, "Database error while handling request.");
                AppError::DatabaseError(e.to_string())
            }
            e @ (AdjustError::Integrity(_)
            | AdjustError::Rules(_)
            | AdjustError::Manifest(_)
            | AdjustError::Command(_)) => {
                error!(error = %e, "Internal error while handling request.");
                AppError::InternalServerError(e.to_string())
            }
            e @ (AdjustError::Monitoring(_) | AdjustError::Dispatch(_)) => {
                error!(error = %e, "Upstream call failed while handling request.");
                AppError::BadGateway(e.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("Malformed JSON payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_errors_map_to_status_codes() {
        let cases = [
            (AdjustError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AdjustError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (AdjustError::Conflict("dup".into()), StatusCode::CONFLICT),
            (AdjustError::Integrity("two details".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
