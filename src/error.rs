//! Error types for queue operations.

use thiserror::Error;

/// Error produced by a payload's release routine.
pub type ReleaseError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while operating an [`ExpiryQueue`](crate::ExpiryQueue).
#[derive(Debug, Error)]
pub enum QueueError {
    /// The item's expiry was not strictly in the future.
    #[error("item is already expired")]
    ItemAlreadyExpired,

    /// The queue was disposed before this call.
    #[error("queue has been disposed")]
    QueueDisposed,

    /// A payload failed to release while being reclaimed.
    #[error("payload release failed: {0}")]
    Release(#[source] ReleaseError),

    /// One or more payloads failed to release during a flush.
    ///
    /// The flush itself still completed; every other entry was removed.
    #[error("{} payload release(s) failed during flush", failures.len())]
    Flush {
        /// Every release failure observed, in removal order
        failures: Vec<ReleaseError>,
    },

    /// The queue configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The queue was constructed outside a Tokio runtime.
    #[error("no Tokio runtime available to run the expiry sweeper")]
    NoRuntime,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_error_reports_failure_count() {
        let err = QueueError::Flush {
            failures: vec!["first".into(), "second".into()],
        };
        assert_eq!(err.to_string(), "2 payload release(s) failed during flush");
    }

    #[test]
    fn test_release_error_keeps_source() {
        let err = QueueError::Release("socket already closed".into());
        assert_eq!(
            err.to_string(),
            "payload release failed: socket already closed"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
