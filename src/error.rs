//! Scheduler error taxonomy.
//!
//! Admission denial (capacity exhausted, wait queue full, circuit open) is
//! not an error: operations report it as `Ok(false)` or `Ok(None)`. Release
//! failures are logged and swallowed by the release paths and never reach
//! this type.

use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Caller input was rejected before any store round trip.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The coordination store could not be reached or answered unexpectedly.
    /// The caller decides whether to fail open or closed.
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl SchedulerError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True when the error came from the coordination store rather than input.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::invalid("no candidates provided");
        assert_eq!(err.to_string(), "invalid argument: no candidates provided");
        assert!(!err.is_store_unavailable());

        let err = SchedulerError::from(StoreError::Timeout(Duration::from_secs(3)));
        assert!(err.is_store_unavailable());
        assert!(err.to_string().contains("3s"));
    }
}
