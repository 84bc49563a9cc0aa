//! Configuration for the biosensor aggregator.

use crate::core::bands::canonical_band_names;
use crate::core::normalize::DEFAULT_MOTION_PREFIX;
use crate::sink::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for an aggregation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rolling window for motion and band power
    pub window_size: usize,

    /// Rolling window for performance metrics
    ///
    /// The headset already averages metrics over several seconds, so this
    /// defaults to 1 (no extra smoothing).
    pub met_window_size: usize,

    /// Emit the pending row if no row has been emitted for this long
    /// (0 disables)
    #[serde(with = "duration_serde")]
    pub stall_timeout: Duration,

    /// Where emitted rows are written
    pub output_path: PathBuf,

    pub output_format: OutputFormat,

    /// Device prefix stripped from motion column names
    pub motion_prefix: String,

    /// Canonical band channels, in output order
    pub bands: Vec<String>,

    /// Path for storing session statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("biosensor-aggregator");

        Self {
            window_size: 10,
            met_window_size: 1,
            stall_timeout: Duration::from_secs(2),
            output_path: std::env::temp_dir().join("eeg_output.csv"),
            output_format: OutputFormat::Csv,
            motion_prefix: DEFAULT_MOTION_PREFIX.to_string(),
            bands: canonical_band_names(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("biosensor-aggregator")
            .join("config.json")
    }

    /// Path of the cumulative session statistics file.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("session_stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Reject settings a session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 || self.met_window_size == 0 {
            return Err(ConfigError::Invalid(
                "window sizes must be at least 1".to_string(),
            ));
        }
        if self.bands.is_empty() {
            return Err(ConfigError::Invalid("band list is empty".to_string()));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.bands.iter().find(|b| !seen.insert(b.as_str())) {
            return Err(ConfigError::Invalid(format!("duplicate band '{dup}'")));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
