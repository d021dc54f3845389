//! Unified error handling for sync.

/// Sync error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Engine error: {0}")]
    Engine(#[from] converge_engine::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Op store is closed")]
    Closed,

    #[error("Store error: {0}")]
    Store(String),
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
