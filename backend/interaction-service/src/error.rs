/// Error types for interaction-service
use thiserror::Error;

use crate::cache::CacheError;
use crate::repository::StoreError;

/// Outcome-level errors returned by the orchestrator.
///
/// Queue failures never appear here: publishing is detached from the request.
#[derive(Error, Debug)]
pub enum InteractionError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for InteractionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => InteractionError::NotFound(what),
            other => InteractionError::Store(other),
        }
    }
}

/// Convert InteractionError to tonic::Status for gRPC responses
impl From<InteractionError> for tonic::Status {
    fn from(err: InteractionError) -> Self {
        match err {
            InteractionError::Validation(msg) => tonic::Status::invalid_argument(msg),
            InteractionError::NotFound(msg) => tonic::Status::not_found(msg),
            InteractionError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            InteractionError::Store(StoreError::Conflict(msg)) => tonic::Status::aborted(msg),
            InteractionError::Store(e) if e.is_unavailable() => {
                tonic::Status::unavailable(format!("Store unavailable: {}", e))
            }
            InteractionError::Store(e) => tonic::Status::internal(format!("Store error: {}", e)),
            InteractionError::Cache(e) => tonic::Status::unavailable(format!("Cache error: {}", e)),
            InteractionError::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

/// Result type alias for orchestrator operations
pub type InteractionResult<T> = Result<T, InteractionError>;
