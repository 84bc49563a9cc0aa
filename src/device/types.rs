//! Stream and session types shared between devices and the aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three telemetry streams a session subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Band power per sensor and frequency band
    Pow,
    /// Motion (accelerometer, gyroscope, magnetometer)
    Mot,
    /// Derived performance metrics
    Met,
}

impl StreamKind {
    /// All streams, in subscription order.
    pub const ALL: [StreamKind; 3] = [StreamKind::Pow, StreamKind::Mot, StreamKind::Met];

    /// Key used by the device API.
    pub fn key(self) -> &'static str {
        match self {
            StreamKind::Pow => "pow",
            StreamKind::Mot => "mot",
            StreamKind::Met => "met",
        }
    }

    /// Name of the channel group this stream feeds in a merged row.
    ///
    /// Band power is reduced before merging, so it shows up as `bands`.
    pub fn group(self) -> &'static str {
        match self {
            StreamKind::Pow => "bands",
            StreamKind::Mot => "mot",
            StreamKind::Met => "met",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "pow" => Some(StreamKind::Pow),
            "mot" => Some(StreamKind::Mot),
            "met" => Some(StreamKind::Met),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Column header for one successfully subscribed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamHeader {
    #[serde(rename = "streamName")]
    pub stream: String,
    pub cols: Vec<String>,
}

impl StreamHeader {
    pub fn new(stream: StreamKind, cols: Vec<String>) -> Self {
        Self {
            stream: stream.key().to_string(),
            cols,
        }
    }
}

/// A stream the device refused to subscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFailure {
    #[serde(rename = "streamName")]
    pub stream: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Device reply to a subscribe request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionAck {
    #[serde(default)]
    pub success: Vec<StreamHeader>,
    #[serde(default)]
    pub failure: Vec<SubscriptionFailure>,
}

impl SubscriptionAck {
    /// Header for a stream, if it subscribed successfully.
    pub fn header(&self, stream: StreamKind) -> Option<&StreamHeader> {
        self.success.iter().find(|h| h.stream == stream.key())
    }

    /// Requested streams with no successful header.
    pub fn missing(&self, requested: &[StreamKind]) -> Vec<StreamKind> {
        requested
            .iter()
            .copied()
            .filter(|s| self.header(*s).is_none())
            .collect()
    }
}

/// Session status values understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Active,
    Close,
}

/// One sample of one stream, aligned with that stream's header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub stream: StreamKind,
    /// Device timestamp in seconds, when the device reports one
    pub time: Option<f64>,
    pub values: Vec<f64>,
    /// Local wall-clock time the event was received
    pub received_at: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(stream: StreamKind, values: Vec<f64>) -> Self {
        Self {
            stream,
            time: None,
            values,
            received_at: Utc::now(),
        }
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }
}
