use thiserror::Error;

/// Main error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Storage backend failure other than a plain miss
    #[error("storage fault: {0}")]
    Storage(String),

    /// A write that must not be silently dropped failed
    #[error("failed to store key \"{key}\" (value: {preview}): {reason}")]
    WriteFailed {
        key: String,
        preview: String,
        reason: String,
    },

    #[error("invalid tag name: {0:?}")]
    InvalidTag(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
