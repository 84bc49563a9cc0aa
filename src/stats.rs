//! Session statistics.
//!
//! Counts what an aggregation session received, emitted and dropped, and
//! persists cumulative totals between runs.

use crate::device::StreamKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current session.
#[derive(Debug)]
pub struct SessionStats {
    /// Band power events received
    pow_events: AtomicU64,
    /// Motion events received
    mot_events: AtomicU64,
    /// Metric events received
    met_events: AtomicU64,
    /// Rows handed to the sink
    rows_emitted: AtomicU64,
    /// Events discarded because they could not be processed
    events_dropped: AtomicU64,
    /// Rows emitted by the stall timeout rather than a repeated stream
    stall_flushes: AtomicU64,
    /// Completed rows the sink failed to write
    sink_errors: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
    /// Totals loaded from previous sessions
    previous: PersistedStats,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            pow_events: AtomicU64::new(0),
            mot_events: AtomicU64::new(0),
            met_events: AtomicU64::new(0),
            rows_emitted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            stall_flushes: AtomicU64::new(0),
            sink_errors: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
            previous: PersistedStats::default(),
        }
    }

    /// Create stats that add to the totals stored at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous session stats: {}", e);
        }

        stats
    }

    pub fn record_event(&self, stream: StreamKind) {
        let counter = match stream {
            StreamKind::Pow => &self.pow_events,
            StreamKind::Mot => &self.mot_events,
            StreamKind::Met => &self.met_events,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_row(&self) {
        self.rows_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stall_flush(&self) {
        self.stall_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Rows the sink accepted.
    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted.load(Ordering::Relaxed)
    }

    /// Current session counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pow_events: self.pow_events.load(Ordering::Relaxed),
            mot_events: self.mot_events.load(Ordering::Relaxed),
            met_events: self.met_events.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            stall_flushes: self.stall_flushes.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary of the current session.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Band power events: {}\n\
             - Motion events: {}\n\
             - Metric events: {}\n\
             - Rows emitted: {} ({} by stall timeout)\n\
             - Events dropped: {}\n\
             - Rows lost to sink errors: {}\n\
             - Session duration: {} seconds",
            stats.pow_events,
            stats.mot_events,
            stats.met_events,
            stats.rows_emitted,
            stats.stall_flushes,
            stats.events_dropped,
            stats.sink_errors,
            stats.session_duration_secs
        )
    }

    /// Add this session to the persisted totals.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                sessions: self.previous.sessions + 1,
                pow_events: self.previous.pow_events + stats.pow_events,
                mot_events: self.previous.mot_events + stats.mot_events,
                met_events: self.previous.met_events + stats.met_events,
                rows_emitted: self.previous.rows_emitted + stats.rows_emitted,
                events_dropped: self.previous.events_dropped + stats.events_dropped,
                last_updated: Some(Utc::now()),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                self.previous = serde_json::from_str(&content).map_err(std::io::Error::other)?;
            }
        }
        Ok(())
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub pow_events: u64,
    pub mot_events: u64,
    pub met_events: u64,
    pub rows_emitted: u64,
    pub events_dropped: u64,
    pub stall_flushes: u64,
    pub sink_errors: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Cumulative totals across sessions, as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedStats {
    #[serde(default)]
    pub sessions: u64,
    #[serde(default)]
    pub pow_events: u64,
    #[serde(default)]
    pub mot_events: u64,
    #[serde(default)]
    pub met_events: u64,
    #[serde(default)]
    pub rows_emitted: u64,
    #[serde(default)]
    pub events_dropped: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Thread-safe shared session stats.
pub type SharedSessionStats = Arc<SessionStats>;
