//! Error types and result handling for store and validation operations.
//!
//! Delivery failures have their own taxonomy in the delivery crate; this
//! module covers what the collaborating stores and the submission boundary
//! can report.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for store and submission operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Backing store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The pipeline has been shut down and accepts no more work.
    #[error("pipeline is shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        assert_eq!(CoreError::Storage("disk full".into()).to_string(), "Storage error: disk full");
        assert_eq!(CoreError::InvalidInput("empty id".into()).to_string(), "Invalid input: empty id");
        assert_eq!(CoreError::ShutDown.to_string(), "pipeline is shut down");
    }
}
