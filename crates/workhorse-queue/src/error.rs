//! Queue errors.

use std::time::Duration;

use thiserror::Error;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Operation attempted after the queue was closed.
    #[error("Queue is closed")]
    Closed,

    /// Malformed job options or arguments.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The processor returned an error or panicked.
    #[error("Processing failed: {0}")]
    Processing(String),

    /// The processor did not finish within the job timeout.
    #[error("Job timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Ownership of an active job could not be confirmed.
    #[error("Lock error: {0}")]
    Lock(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Job is not in a state that allows the operation.
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = QueueError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Job timed out after 1500ms");
    }

    #[test]
    fn test_validation_display() {
        let err = QueueError::Validation("attempts must be at least 1".to_string());
        assert!(err.to_string().contains("attempts must be at least 1"));
    }

    #[test]
    fn test_serde_error_from() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = QueueError::from(parse);
        assert!(matches!(err, QueueError::Serialization(_)));
    }
}
