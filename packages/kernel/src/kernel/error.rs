//! Typed error taxonomy for the kernel.
//!
//! State conflicts are distinct variants so callers can branch without
//! matching on message strings; the HTTP layer maps them onto status codes.

/// Result alias used across the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// An insert hit the idempotency unique constraint and no existing row
    /// could be resolved for the caller (mission-id collision).
    #[error("duplicate idempotency key")]
    DuplicateIdempotency,

    /// The referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A transition was attempted from the wrong state, e.g.
    /// "Mission is not running".
    #[error("{0}")]
    InvalidState(String),

    /// A lease-guarded operation supplied a lease id that no longer owns the
    /// mission.
    #[error("Lease mismatch")]
    LeaseMismatch,

    /// Request shape or value violations caught before touching the store.
    #[error("{0}")]
    Validation(String),

    /// Transient store failure; the caller may retry.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A persisted JSON document failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl KernelError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
