use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::ingest::Rejection;

/// Errors surfaced by the HTTP layer
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Symbol is required")]
    MissingSymbol,

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("No data for symbol: {0}")]
    NotFound(String),

    #[error("Update rejected: {0}")]
    Rejected(#[from] Rejection),
}

/// Error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Always "error"
    pub status: String,
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingSymbol | ApiError::InvalidSymbol(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::debug!("Request failed ({}): {}", status, self);

        let body = Json(ErrorResponse {
            status: "error".to_string(),
            error: status.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
