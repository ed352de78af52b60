//! Core error taxonomy.
//!
//! Every operation in the write-buffered cache, sync engine, and domain
//! services surfaces one of these categories. Transient errors are the only
//! ones recovered locally (via retry); everything else propagates to the
//! caller with its category intact.

use thiserror::Error;

/// Result type used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;

/// The error taxonomy from the component design: NotFound, Conflict,
/// Validation, Transient, Permanent, and BackpressureFallback.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested document or key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency version mismatch. Carries the version actually
    /// observed in the store so the caller (or the retry helper) can decide
    /// whether to replay.
    #[error("conflict: expected version {expected}, observed {observed}")]
    Conflict {
        /// Version the caller expected to still be current.
        expected: i64,
        /// Version actually found in the store.
        observed: i64,
    },

    /// Malformed input: CPF format, phone format, an ethnicity outside the
    /// enumerated set, an empty fingerprint. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// KV or store unavailability, pool exhaustion, deadline exceeded.
    /// Recovered locally with bounded exponential backoff; surfaced only
    /// once the component's own retry budget is exhausted.
    #[error("transient error: {0}")]
    Transient(String),

    /// Schema mismatch or a malformed write-buffer payload. Dead-lettered
    /// and logged, never retried, never silently discarded.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Enqueue would have blocked; the caller already performed the
    /// synchronous fallback. Not actually an error to the caller — this
    /// variant exists so the fallback path can still be logged uniformly
    /// wherever `CoreError` values are collected.
    #[error("backpressure fallback triggered: {0}")]
    BackpressureFallback(String),
}

impl CoreError {
    /// True for errors a bounded-retry wrapper should attempt again.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }

    /// True for a version conflict specifically, distinct from other
    /// surfaced errors, so retry helpers can distinguish "replay me" from
    /// "give up".
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict { .. })
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal() {
            CoreError::Transient(err.to_string())
        } else {
            CoreError::Permanent(err.to_string())
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CoreError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => CoreError::Transient(err.to_string()),
            _ => CoreError::Permanent(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Permanent(format!("malformed payload: {err}"))
    }
}

impl From<tokio::time::error::Elapsed> for CoreError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        CoreError::Transient(format!("deadline exceeded: {err}"))
    }
}
