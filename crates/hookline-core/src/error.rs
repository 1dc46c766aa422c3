//! Error types reported by collaborators of the delivery core.
//!
//! The subscription registry lives in the surrounding data layer. Whatever
//! backs it reports failures through [`CoreError`] so the dispatcher can
//! treat them uniformly as a precondition failure.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for collaborator operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Backing store could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Returns whether the operation may succeed if repeated later.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
