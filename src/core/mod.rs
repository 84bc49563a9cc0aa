//! Signal processing for aggregation sessions.
//!
//! This module contains:
//! - Band reduction from raw pow columns to canonical bands
//! - Motion column normalization
//! - Rolling averages per stream
//! - Stream synchronization into output rows

pub mod bands;
pub mod normalize;
pub mod rolling;
pub mod sync;

// Re-export commonly used types
pub use bands::{canonical_band_names, BandReducer, CANONICAL_BANDS, REGIONS, SUB_BANDS};
pub use normalize::{normalize_motion_column, ColumnNormalizer, DEFAULT_MOTION_PREFIX};
pub use rolling::RollingAverage;
pub use sync::{Row, RowLayout, StreamSynchronizer};
