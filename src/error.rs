//! Maps internal failures onto the HTTP surface.

use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid image upload: {0}")]
    InvalidUpload(String),
    #[error("recognition request {0} not found")]
    NotFound(uuid::Uuid),
    #[error("reprocess not permitted from current status")]
    ReprocessNotPermitted,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::InvalidUpload(message) => {
                HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
            }
            ApiError::ReprocessNotPermitted => HttpResponse::BadRequest()
                .json(serde_json::json!({ "error": self.to_string() })),
            ApiError::NotFound(_) => {
                HttpResponse::NotFound().json(serde_json::json!({ "error": self.to_string() }))
            }
            ApiError::Database(_) | ApiError::Storage(_) => HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "internal server error" })),
        }
    }
}
