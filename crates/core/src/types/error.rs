use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome taxonomy shared by every tier.
///
/// `Clone` is required: a single origin failure is handed to every waiter
/// attached to the same in-flight load.
#[derive(Debug, Error, Display, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[display("Cache miss")]
    Miss,

    #[display("Not found: {}", _0)]
    NotFound(String),

    #[display("Codec error: {}", _0)]
    Codec(String),

    #[display("Backend error: {}", _0)]
    Backend(String),

    #[display("Origin error: {}", _0)]
    Origin(String),

    #[display("Unknown cache prefix: {}", _0)]
    UnknownPrefix(String),

    #[display("Duplicate cache prefix: {}", _0)]
    DuplicatePrefix(String),

    #[display("Invalid cache key: {}", _0)]
    InvalidKey(String),

    #[display("Timed out waiting for in-flight load")]
    Timeout,

    #[display("Cancelled while waiting for in-flight load")]
    Cancelled,

    #[display("Loader panicked: {}", _0)]
    LoaderPanicked(String),

    #[display("Configuration error: {}", _0)]
    Configuration(String),
}

impl CacheError {
    /// Wraps a storage-layer failure so it can be shared with all waiters.
    pub fn origin(e: impl std::fmt::Display) -> Self {
        CacheError::Origin(e.to_string())
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, CacheError::Backend(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Codec(e.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CacheError::Backend("operation timed out".to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
