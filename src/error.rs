//! Service error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::database::error::DatabaseError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("provider is not supported")]
    ProviderUnsupported,

    #[error("callback rejected")]
    CallbackRejected,

    #[error("payment not found")]
    PaymentNotFound,

    #[error("payment already exists")]
    PaymentAlreadyExists,

    /// A provider call failed; the provider's message surfaces verbatim.
    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_)
            | AppError::InvalidStatus(_)
            | AppError::ProviderUnsupported
            | AppError::CallbackRejected => StatusCode::BAD_REQUEST,
            AppError::PaymentNotFound => StatusCode::NOT_FOUND,
            AppError::PaymentAlreadyExists => StatusCode::CONFLICT,
            AppError::Provider(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the logs, not in the response body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
