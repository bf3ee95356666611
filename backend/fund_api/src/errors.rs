//! Application-wide error types.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum FundError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected user input (HTTP 400).
    #[error("{0}")]
    Validation(String),

    /// Well-formed input that cannot be applied (HTTP 422).
    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    NotFound(String),

    /// The allocation transaction was rolled back; the caller may retry.
    #[error("Allocation failed, retry later: {0}")]
    AllocationFailed(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

pub type Result<T> = std::result::Result<T, FundError>;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl From<JsonRejection> for FundError {
    fn from(rejection: JsonRejection) -> Self {
        FundError::Unprocessable(rejection.body_text())
    }
}

impl FundError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AllocationFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Migrate(_) | Self::Config(_) | Self::CorruptRecord(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for FundError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        (
            status,
            Json(ErrorResponse {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}
