use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::storage::StorageError;
use crate::transfer::TransferError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Transfer(e) => match e {
                TransferError::Planning(_) => (StatusCode::BAD_REQUEST, "PLANNING_ERROR"),
                TransferError::Manifest { .. } => (StatusCode::NOT_FOUND, "MANIFEST_ERROR"),
                TransferError::IncompleteTransfer { .. } => {
                    (StatusCode::BAD_GATEWAY, "INCOMPLETE_TRANSFER")
                }
                TransferError::ChunkTransfer { .. } => (StatusCode::BAD_GATEWAY, "CHUNK_TRANSFER_ERROR"),
                TransferError::PostUploadReconciliation { .. } => {
                    (StatusCode::BAD_GATEWAY, "RECONCILIATION_REQUIRED")
                }
                TransferError::StrategyUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "STRATEGY_UNAVAILABLE")
                }
                TransferError::Cancelled => (StatusCode::CONFLICT, "CANCELLED"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "TRANSFER_ERROR"),
            },
            ApiError::Registry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "REGISTRY_ERROR"),
            ApiError::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Storage(StorageError::Remote(envelope)) if envelope.is_missing_resource() => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            ApiError::Storage(_) => (StatusCode::BAD_GATEWAY, "STORAGE_ERROR"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let error_message = match &self {
            ApiError::Storage(e) => e.readable_message(),
            ApiError::InvalidRequest(e) | ApiError::NotFound(e) | ApiError::InternalError(e) => {
                e.clone()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "code": error_code,
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
