//! Store error types

use thiserror::Error;

/// Errors a store operation can raise
///
/// Optimistic-lock misses are NOT errors: mutating operations return
/// `Ok(false)` on a version mismatch or illegal transition so callers can
/// refetch and decide.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if this error signals a caller-resolvable conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::DuplicateIdempotencyKey(_))
    }
}
