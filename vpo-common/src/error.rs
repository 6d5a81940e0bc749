//! Common error types for VPO

use thiserror::Error;

/// Common result type for VPO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write lock could not be acquired within the bounded retry budget.
    /// Callers may retry the whole operation.
    #[error("Write contention: {0}")]
    Contention(String),

    /// Foreign-key or check-constraint violation. The catalog is suspect;
    /// never recovered locally.
    #[error("Catalog integrity error: {0}")]
    Integrity(String),

    #[error("Invalid plan transition: {from} -> {to}")]
    InvalidPlanTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors where retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Contention(_))
    }
}
