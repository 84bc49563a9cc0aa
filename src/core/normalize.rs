//! Canonical short names for motion channels.
//!
//! Motion columns arrive as `IMD_GYROX`, `IMD_ACCY` and so on. They are
//! rewritten to `gyroX`, `accY`: prefix stripped, name lower-cased, the
//! trailing axis letter kept as-is.

/// Device prefix carried by raw motion columns.
pub const DEFAULT_MOTION_PREFIX: &str = "IMD_";

const AXES: [char; 3] = ['X', 'Y', 'Z'];

/// Rewrites raw motion column names.
#[derive(Debug, Clone)]
pub struct ColumnNormalizer {
    prefix: String,
}

impl Default for ColumnNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_PREFIX)
    }
}

impl ColumnNormalizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Normalize one column name.
    ///
    /// Names without the device prefix are returned unchanged.
    pub fn normalize(&self, raw: &str) -> String {
        let Some(rest) = raw.strip_prefix(self.prefix.as_str()) else {
            return raw.to_string();
        };

        match rest.strip_suffix(&AXES[..]) {
            Some(name) => {
                // strip_suffix only removed one ASCII byte
                let axis = &rest[name.len()..];
                format!("{}{}", name.to_lowercase(), axis)
            }
            None => rest.to_lowercase(),
        }
    }

    /// Normalize a whole header, preserving order.
    pub fn normalize_all(&self, header: &[String]) -> Vec<String> {
        header.iter().map(|c| self.normalize(c)).collect()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Normalize a motion column using [`DEFAULT_MOTION_PREFIX`].
pub fn normalize_motion_column(raw: &str) -> String {
    ColumnNormalizer::default().normalize(raw)
}
