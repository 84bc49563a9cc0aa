//! Error types for the aggregation engine.

use crate::device::DeviceError;
use thiserror::Error;

/// Errors raised while building or driving an aggregation session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// One or more required streams were not acknowledged by the device.
    #[error("failed to subscribe to required streams: {}", .missing.join(", "))]
    Subscription { missing: Vec<String> },

    /// A band-power column does not map to any canonical band.
    #[error("unknown band column '{column}'")]
    UnknownBand { column: String },

    /// A canonical band has no contributing sensor columns.
    #[error("band '{band}' has no contributing sensor columns")]
    EmptyBand { band: String },

    /// A value sequence does not line up with the expected columns.
    #[error("shape mismatch on '{stream}': expected {expected} values, got {actual}")]
    ShapeMismatch {
        stream: String,
        expected: usize,
        actual: usize,
    },

    /// Two streams would write to the same channel of a row.
    #[error("channel '{name}' is produced by more than one stream")]
    DuplicateChannel { name: String },

    /// Rolling window sizes must be at least one sample.
    #[error("rolling window size must be greater than zero")]
    InvalidWindow,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("sink error: {0}")]
    Sink(#[from] std::io::Error),
}

impl SyncError {
    pub(crate) fn shape(stream: &str, expected: usize, actual: usize) -> Self {
        SyncError::ShapeMismatch {
            stream: stream.to_string(),
            expected,
            actual,
        }
    }
}

/// Result alias used throughout the engine.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_error_lists_streams() {
        let err = SyncError::Subscription {
            missing: vec!["pow".to_string(), "met".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "failed to subscribe to required streams: pow, met"
        );
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = SyncError::shape("mot", 3, 2);
        assert!(err.to_string().contains("expected 3 values, got 2"));
    }
}
