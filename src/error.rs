use thiserror::Error;

use crate::sqlite_store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("authentication required")]
    Authentication,
    #[error("invalid request: {reason}")]
    Validation { reason: String },
    #[error("not found: {what}")]
    NotFound { what: String },
    #[error("fast search quota exhausted: used={used} limit={limit}")]
    QuotaExceeded { used: i64, limit: i64 },
    #[error("duplicate request: {request_id}")]
    DuplicateRequest { request_id: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
