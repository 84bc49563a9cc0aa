//! Biosensor Aggregator - merges EEG headset streams into fixed-layout rows.
//!
//! A headset session delivers three independent streams at their own rates:
//! band power (`pow`), motion (`mot`) and performance metrics (`met`). This
//! library smooths each stream with a rolling average, reduces band power to
//! a canonical set of bands, and merges the latest values of all three into
//! one row whenever a stream reports again before the others have caught up.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Biosensor Aggregator                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Device    │──▶│   Reduce /  │──▶│   Rolling   │       │
//! │  │  (session)  │   │  Normalize  │   │   Average   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                              │              │
//! │                                              ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │    Sink     │◀────────────────────│   Stream    │       │
//! │  │ (csv/jsonl) │                     │Synchronizer │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use biosensor_aggregator::{Aggregator, AggregatorConfig, MemorySink};
//! use biosensor_aggregator::device::{SimulatedConfig, SimulatedDevice};
//! use std::sync::atomic::AtomicBool;
//!
//! let device = SimulatedDevice::new(SimulatedConfig::default());
//! let mut aggregator = Aggregator::start(device, &AggregatorConfig::default(), MemorySink::new())
//!     .expect("Failed to start session");
//!
//! let running = AtomicBool::new(true);
//! aggregator.run(&running).expect("Session failed");
//! ```

pub mod aggregator;
pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod sink;
pub mod stats;

// Re-export key types at crate root for convenience
pub use aggregator::{Aggregator, AggregatorConfig};
pub use config::{Config, ConfigError};
pub use crate::core::{BandReducer, ColumnNormalizer, RollingAverage, Row, RowLayout, StreamSynchronizer};
pub use device::{DeviceError, DeviceSession, StreamEvent, StreamKind};
pub use error::{SyncError, SyncResult};
pub use sink::{
    file_sink, CallbackSink, CsvSink, EchoSink, JsonlSink, MemorySink, OutputFormat, RowSink,
    TeeSink,
};
pub use stats::{SessionStats, SharedSessionStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Description of the output row, shown by the CLI.
pub const ROW_LAYOUT_DESCRIPTION: &str = r#"
Each output row holds, in order:
  1. Motion channels     (device prefix removed, e.g. IMD_GYROX -> gyroX)
  2. Performance metrics (as reported, e.g. eng, str, foc)
  3. Canonical bands     (<sensor>/<band>, 14 sensors x 5 bands)

A row is emitted when a stream reports a second time before the others
have all reported; streams that have not reported keep their last value.
"#;
