//! Incremental rolling average over a fixed set of named columns.
//!
//! The sample count saturates at the window size, after which every new
//! sample is blended in with weight `1 / window`. Older samples are never
//! dropped outright, only down-weighted, so this is an exponentially
//! decaying mean rather than a fixed-size buffer average.

use crate::error::{SyncError, SyncResult};

/// Running mean state for one stream.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    /// Stream name used in diagnostics
    label: String,
    /// Column names, in payload order
    columns: Vec<String>,
    /// Current mean per column, aligned with `columns`
    means: Vec<f64>,
    /// Samples seen so far, capped at `window`
    count: usize,
    /// Saturation cap for `count`
    window: usize,
}

impl RollingAverage {
    /// Create an accumulator for the given columns.
    ///
    /// Fails with [`SyncError::InvalidWindow`] when `window` is zero.
    pub fn new(columns: Vec<String>, window: usize) -> SyncResult<Self> {
        if window == 0 {
            return Err(SyncError::InvalidWindow);
        }

        let means = vec![0.0; columns.len()];
        Ok(Self {
            label: "rolling".to_string(),
            columns,
            means,
            count: 0,
            window,
        })
    }

    /// Attach a stream name used in shape-mismatch errors.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Blend one sample into the running means.
    ///
    /// `values` must be aligned with [`columns`](Self::columns). The returned
    /// slice is valid until the next call.
    pub fn update(&mut self, values: &[f64]) -> SyncResult<&[f64]> {
        if values.len() != self.columns.len() {
            return Err(SyncError::shape(
                &self.label,
                self.columns.len(),
                values.len(),
            ));
        }

        self.count = (self.count + 1).min(self.window);
        let n = self.count as f64;

        for (mean, value) in self.means.iter_mut().zip(values) {
            *mean += (value - *mean) / n;
        }

        Ok(&self.means)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    /// Current mean for a single column.
    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.means[i])
    }

    /// Iterate `(column, mean)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.means.iter().copied())
    }

    /// Samples currently contributing to the mean (never above the window).
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Forget all samples.
    pub fn reset(&mut self) {
        self.count = 0;
        self.means.iter_mut().for_each(|m| *m = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(
            RollingAverage::new(cols(&["a"]), 0),
            Err(SyncError::InvalidWindow)
        ));
    }

    #[test]
    fn test_window_three_sequence() {
        let mut avg = RollingAverage::new(cols(&["a"]), 3).unwrap();
        let expected = [2.0, 3.0, 4.0, 5.333];

        for (value, want) in [2.0, 4.0, 6.0, 8.0].iter().zip(expected) {
            let means = avg.update(&[*value]).unwrap();
            assert!(approx(means[0], want), "got {} want {}", means[0], want);
        }
        assert_eq!(avg.count(), 3);
    }

    #[test]
    fn test_window_one_is_passthrough() {
        let mut avg = RollingAverage::new(cols(&["a", "b"]), 1).unwrap();

        for sample in [[1.0, -1.0], [5.5, 2.0], [0.0, 100.0]] {
            let means = avg.update(&sample).unwrap();
            assert_eq!(means, &sample);
        }
    }

    #[test]
    fn test_first_update_sets_exact_value() {
        let mut avg = RollingAverage::new(cols(&["x", "y", "z"]), 10).unwrap();
        let means = avg.update(&[0.1, 42.0, -7.25]).unwrap();
        assert_eq!(means, &[0.1, 42.0, -7.25]);
    }

    #[test]
    fn test_saturated_mean_matches_formula_replay() {
        let window = 4;
        let samples = [3.0, 9.0, 1.0, 4.0, 7.0, 2.0, 8.0];
        let mut avg = RollingAverage::new(cols(&["v"]), window).unwrap();

        let mut mean = 0.0;
        let mut n = 0usize;
        for s in samples {
            n = (n + 1).min(window);
            mean += (s - mean) / n as f64;
            let got = avg.update(&[s]).unwrap()[0];
            assert!((got - mean).abs() < 1e-12);
        }
    }

    #[test]
    fn test_shape_mismatch_leaves_state_untouched() {
        let mut avg = RollingAverage::new(cols(&["a", "b"]), 2)
            .unwrap()
            .with_label("mot");
        avg.update(&[1.0, 2.0]).unwrap();

        let err = avg.update(&[1.0]).unwrap_err();
        assert!(matches!(
            err,
            SyncError::ShapeMismatch { ref stream, expected: 2, actual: 1 } if stream == "mot"
        ));
        assert_eq!(avg.count(), 1);
        assert_eq!(avg.means(), &[1.0, 2.0]);
    }

    #[test]
    fn test_lookup_and_reset() {
        let mut avg = RollingAverage::new(cols(&["eng", "str"]), 1).unwrap();
        avg.update(&[0.4, 0.6]).unwrap();

        assert_eq!(avg.get("str"), Some(0.6));
        assert_eq!(avg.get("missing"), None);
        let pairs: Vec<_> = avg.iter().collect();
        assert_eq!(pairs, vec![("eng", 0.4), ("str", 0.6)]);

        avg.reset();
        assert_eq!(avg.count(), 0);
        assert_eq!(avg.means(), &[0.0, 0.0]);
    }
}
