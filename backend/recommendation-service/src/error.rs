use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid preference range: {0}")]
    InvalidPreferenceRange(String),

    #[error("Invalid interaction type: {0}")]
    InvalidInteractionType(String),

    #[error("Invalid input list: {0}")]
    InvalidInputList(String),

    /// Collaborative model not loaded. Recoverable - candidate generation
    /// falls back to content + graph; only surfaced when the caller asked
    /// for the collaborative strategy explicitly.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// A resource embedding failed validation. Skipped per item, never
    /// fatal for a whole computation.
    #[error("Malformed embedding: {0}")]
    MalformedEmbedding(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidPreferenceRange(_)
            | AppError::InvalidInteractionType(_)
            | AppError::InvalidInputList(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::MalformedEmbedding(_)
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        HttpResponse::build(code).json(ErrorResponse {
            error: self.to_string(),
            code: code.as_u16(),
        })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
