//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the two-tier cache.
///
/// Only `CacheMiss` and `ExpiredKey` are expected by callers of the engine;
/// the remaining variants describe internal recovery paths and admin failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key was never cached
    #[error("Cache miss: {0}")]
    CacheMiss(String),

    /// Key is still a signature member but its value is gone
    #[error("Key expired: {0}")]
    ExpiredKey(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Primary store unreachable or returned an error
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// File checksum mismatch or unreadable record
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// I/O failure while writing or deleting file tier data
    #[error("Write failure: {0}")]
    WriteFailure(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::CacheMiss(_) | CacheError::ExpiredKey(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Corruption(_)
            | CacheError::WriteFailure(_)
            | CacheError::Serialization(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let status = |e: CacheError| e.into_response().status();
        assert_eq!(status(CacheError::CacheMiss("k".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(CacheError::ExpiredKey("k".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(CacheError::InvalidRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(CacheError::StoreUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(CacheError::WriteFailure("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(CacheError::from(err), CacheError::Serialization(_)));
    }
}
