//! Error handling module
//!
//! Provides the unified error type shared by the crawler, the snapshot store,
//! the diff engine and the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Snapshot {0} not found")]
    SnapshotNotFound(i64),

    #[error("Snapshot {id} is malformed: {reason}")]
    MalformedSnapshot { id: i64, reason: String },

    #[error("Schema data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("Snapshot store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Export error: {0}")]
    Export(#[from] csv::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn malformed(id: i64, reason: impl ToString) -> Self {
        AppError::MalformedSnapshot {
            id,
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::SnapshotNotFound(_) => "SNAPSHOT_NOT_FOUND",
            AppError::MalformedSnapshot { .. } => "MALFORMED_SNAPSHOT",
            AppError::DataSourceUnavailable(_) => "DATA_SOURCE_UNAVAILABLE",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Export(_) => "EXPORT_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }
}

// Every failure talking to the crawled database means the data source is
// unavailable.
impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        AppError::DataSourceUnavailable(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        AppError::DataSourceUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message, details) = match &self {
            AppError::SnapshotNotFound(_) => (StatusCode::NOT_FOUND, self.to_string(), None),
            AppError::MalformedSnapshot { reason, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                self.to_string(),
                Some(reason.clone()),
            ),
            AppError::DataSourceUnavailable(msg) => {
                error!("Data source unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The schema data source is unavailable".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Store(e) => {
                error!("Snapshot store error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A snapshot store error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to serialize response".to_string(),
                Some(e.to_string()),
            ),
            AppError::Export(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to export snapshot".to_string(),
                Some(e.to_string()),
            ),
            AppError::Validation(msg) | AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), None)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;
