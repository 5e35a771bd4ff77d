//! Error types for civic-core

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::feed::Feed;
use crate::models::ComplaintId;

/// Result type alias using civic-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Synchronizer operation that performs a backend read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    LoadTimeline,
    Select,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::LoadTimeline => "load_timeline",
            Self::Select => "select",
        })
    }
}

/// Errors that can occur in civic-core operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backend unreachable or permission denied while reading
    #[error("Could not {operation}: {reason}")]
    FetchFailed { operation: Operation, reason: String },

    /// Change-event stream disconnected at the transport level
    #[error("Live updates for {feed} dropped; resubscribing")]
    SubscriptionDropped { feed: Feed },

    /// Subscription setup failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// Complaint not present in the loaded collection
    #[error("Complaint not found: {0}")]
    UnknownComplaint(ComplaintId),

    /// Synchronizer has been torn down
    #[error("Complaint view has been closed")]
    Closed,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub(crate) fn fetch_failed(operation: Operation, error: &BackendError) -> Self {
        Self::FetchFailed {
            operation,
            reason: error.to_string(),
        }
    }

    /// Whether retrying (or waiting for the automatic retry) can clear the error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Closed | Self::InvalidInput(_))
    }
}

impl From<BackendError> for Error {
    fn from(error: BackendError) -> Self {
        Self::Backend(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failed_names_operation() {
        let error = Error::fetch_failed(
            Operation::LoadTimeline,
            &BackendError::Api("permission denied (403)".to_string()),
        );
        let rendered = error.to_string();
        assert!(rendered.contains("load_timeline"));
        assert!(rendered.contains("permission denied"));
    }

    #[test]
    fn closed_is_not_recoverable() {
        assert!(!Error::Closed.is_recoverable());
        assert!(Error::SubscriptionDropped {
            feed: Feed::Complaints
        }
        .is_recoverable());
    }
}
