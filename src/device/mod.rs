//! Device session collaborators.
//!
//! A device opens a session, acknowledges stream subscriptions with a
//! column header per stream, and delivers samples over a channel. The
//! aggregator is the single consumer of that channel, so samples are
//! processed strictly in arrival order.

pub mod cortex;
pub mod replay;
pub mod simulated;
pub mod types;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

// Re-export commonly used types
pub use replay::{ReplayConfig, ReplayDevice};
pub use simulated::{SimulatedConfig, SimulatedDevice};
pub use types::{
    SessionStatus, StreamEvent, StreamHeader, StreamKind, SubscriptionAck, SubscriptionFailure,
};

/// Errors reported by a device session.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no session is open")]
    NoSession,

    #[error("a session is already open")]
    SessionAlreadyOpen,

    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed device message: {0}")]
    Malformed(String),

    #[error("invalid device settings: {0}")]
    InvalidConfig(String),
}

/// The operations the aggregator needs from a headset session.
pub trait DeviceSession {
    /// Open a new session with the headset.
    fn create_session(&mut self) -> Result<(), DeviceError>;

    /// Request the given streams and return the device's acknowledgement.
    fn subscribe(&mut self, streams: &[StreamKind]) -> Result<SubscriptionAck, DeviceError>;

    /// Stop delivery of the given streams.
    fn unsubscribe(&mut self, streams: &[StreamKind]) -> Result<(), DeviceError>;

    fn update_session(&mut self, status: SessionStatus) -> Result<(), DeviceError>;

    /// Incoming samples for all subscribed streams.
    fn events(&self) -> &Receiver<StreamEvent>;
}

/// Hand an event to the consumer without blocking shutdown.
///
/// Returns `false` once the device is stopping or the consumer is gone.
pub(crate) fn forward_event(
    sender: &Sender<StreamEvent>,
    running: &AtomicBool,
    mut event: StreamEvent,
) -> bool {
    loop {
        match sender.send_timeout(event, Duration::from_millis(50)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if !running.load(Ordering::SeqCst) {
                    return false;
                }
                event = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}
