use axum::http::StatusCode;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by link creation, lookup and resolution
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("short code not found")]
    NotFound,
    #[error("this link has expired")]
    Expired,
    #[error("this link has been deactivated")]
    Inactive,
    #[error("short code already exists")]
    DuplicateCode,
    #[error("alias is already taken")]
    AliasTaken,
    #[error("no free short code found after {0} attempts, try again later")]
    ExhaustedKeyspace(u32),
    #[error("invalid destination URL: {0}")]
    InvalidUrl(String),
    #[error("invalid alias: {0}")]
    InvalidAlias(String),
    #[error("code length must be between {min} and {max}, got {got}")]
    InvalidLength { got: usize, min: usize, max: usize },
    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),
    #[error("invalid pagination cursor")]
    InvalidCursor,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<StorageError> for LinkError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => LinkError::DuplicateCode,
            StorageError::Other(e) => LinkError::Storage(e),
        }
    }
}

impl LinkError {
    /// HTTP status the error is surfaced with
    pub fn status_code(&self) -> StatusCode {
        match self {
            LinkError::NotFound => StatusCode::NOT_FOUND,
            LinkError::Expired => StatusCode::GONE,
            LinkError::Inactive => StatusCode::LOCKED,
            LinkError::DuplicateCode | LinkError::AliasTaken => StatusCode::CONFLICT,
            LinkError::ExhaustedKeyspace(_) => StatusCode::SERVICE_UNAVAILABLE,
            LinkError::InvalidUrl(_)
            | LinkError::InvalidAlias(_)
            | LinkError::InvalidLength { .. }
            | LinkError::InvalidExpiry(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LinkError::InvalidCursor => StatusCode::BAD_REQUEST,
            LinkError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
