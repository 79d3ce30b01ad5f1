use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::gateway::ApiErrorBody;

/// Failures outside the decrypt pipeline (audit lookups, status).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn name(&self) -> &'static str {
        match self {
            AppError::Db(_) => "FetchDecryptionRecordsError",
            AppError::BadRequest(_) => "BadRequest",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(?self);
        // Database internals stay in the logs.
        let description = match &self {
            AppError::Db(_) => "error fetching decryption records".to_string(),
            AppError::BadRequest(message) => message.clone(),
        };
        (status, Json(ApiErrorBody::new(self.name(), description))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
