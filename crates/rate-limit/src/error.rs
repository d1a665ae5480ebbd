//! Error types for rate limiting.

use crate::storage::StorageError;

/// Errors that can occur while evaluating a bucket.
///
/// Every failure leaves the bucket untouched: either the evaluation was applied in full
/// and a decision is returned, or nothing changed and one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The caller passed a non-positive quota, permit count, or an empty key.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage round-trip could not be completed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RateLimitError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether the failure came from the transport rather than from the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
