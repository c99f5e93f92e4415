use std::path::PathBuf;
use thiserror::Error;

/// Main error type for cache operations surfaced to callers
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Durable store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the durable tier.
///
/// The manager never lets these escape `get`/`set`; they are logged and the
/// call degrades to fast-tier-only behaviour.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database is locked")]
    Locked,

    #[error("Database still locked after {attempts} attempts")]
    LockTimeout { attempts: u32 },

    #[error("Operation aborted by shutdown")]
    Aborted,

    #[error("Database corrupt or unusable: {path:?}")]
    Corrupt { path: PathBuf },

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same statement may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                StoreError::Locked
            }
            _ => StoreError::Sqlite(e),
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Result type alias for durable store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
