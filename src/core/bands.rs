//! Reduction of per-sensor band-power columns into canonical band channels.
//!
//! The band-power stream reports one column per sensor and frequency band.
//! Each canonical band is the arithmetic mean of every column that belongs
//! to it.

use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;

/// Scalp regions reported by the headset, in canonical order.
pub const REGIONS: [&str; 14] = [
    "AF3", "F7", "F3", "FC5", "T7", "P7", "O1", "O2", "P8", "T8", "FC6", "F4", "F8", "AF4",
];

/// Frequency sub-bands reported per region, in canonical order.
pub const SUB_BANDS: [&str; 5] = ["theta", "alpha", "betaL", "betaH", "gamma"];

/// The 70 canonical band names (`region/sub-band`), region-major.
#[rustfmt::skip]
pub const CANONICAL_BANDS: [&str; 70] = [
    "AF3/theta", "AF3/alpha", "AF3/betaL", "AF3/betaH", "AF3/gamma",
    "F7/theta", "F7/alpha", "F7/betaL", "F7/betaH", "F7/gamma",
    "F3/theta", "F3/alpha", "F3/betaL", "F3/betaH", "F3/gamma",
    "FC5/theta", "FC5/alpha", "FC5/betaL", "FC5/betaH", "FC5/gamma",
    "T7/theta", "T7/alpha", "T7/betaL", "T7/betaH", "T7/gamma",
    "P7/theta", "P7/alpha", "P7/betaL", "P7/betaH", "P7/gamma",
    "O1/theta", "O1/alpha", "O1/betaL", "O1/betaH", "O1/gamma",
    "O2/theta", "O2/alpha", "O2/betaL", "O2/betaH", "O2/gamma",
    "P8/theta", "P8/alpha", "P8/betaL", "P8/betaH", "P8/gamma",
    "T8/theta", "T8/alpha", "T8/betaL", "T8/betaH", "T8/gamma",
    "FC6/theta", "FC6/alpha", "FC6/betaL", "FC6/betaH", "FC6/gamma",
    "F4/theta", "F4/alpha", "F4/betaL", "F4/betaH", "F4/gamma",
    "F8/theta", "F8/alpha", "F8/betaL", "F8/betaH", "F8/gamma",
    "AF4/theta", "AF4/alpha", "AF4/betaL", "AF4/betaH", "AF4/gamma",
];

/// Owned copy of [`CANONICAL_BANDS`].
pub fn canonical_band_names() -> Vec<String> {
    CANONICAL_BANDS.iter().map(|b| b.to_string()).collect()
}

/// Maps raw band-power columns onto canonical bands.
#[derive(Debug, Clone)]
pub struct BandReducer {
    /// Canonical band names, in output order
    bands: Vec<String>,
    /// Raw column indices contributing to each band, aligned with `bands`
    indices: Vec<Vec<usize>>,
    /// Number of raw columns expected per payload
    raw_width: usize,
}

impl BandReducer {
    /// Build a reducer from the canonical band list and the raw stream header.
    ///
    /// Raw columns are matched exactly first. Failing that, a leading device
    /// tag up to the first `_` is stripped (`IED_AF3/alpha` -> `AF3/alpha`).
    pub fn new(bands: &[String], raw_header: &[String]) -> SyncResult<Self> {
        let lookup: HashMap<&str, usize> = bands
            .iter()
            .enumerate()
            .map(|(i, b)| (b.as_str(), i))
            .collect();

        let mut indices = vec![Vec::new(); bands.len()];
        for (i, column) in raw_header.iter().enumerate() {
            let band = resolve_band(&lookup, column).ok_or_else(|| SyncError::UnknownBand {
                column: column.clone(),
            })?;
            indices[band].push(i);
        }

        if let Some(empty) = indices.iter().position(Vec::is_empty) {
            return Err(SyncError::EmptyBand {
                band: bands[empty].clone(),
            });
        }

        Ok(Self {
            bands: bands.to_vec(),
            indices,
            raw_width: raw_header.len(),
        })
    }

    /// Average one raw payload down to one value per canonical band.
    pub fn reduce(&self, raw: &[f64]) -> SyncResult<Vec<f64>> {
        if raw.len() != self.raw_width {
            return Err(SyncError::shape("pow", self.raw_width, raw.len()));
        }

        Ok(self
            .indices
            .iter()
            .map(|idx| idx.iter().map(|&i| raw[i]).sum::<f64>() / idx.len() as f64)
            .collect())
    }

    /// Canonical band names, in output order.
    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    /// Raw column indices feeding the given band.
    pub fn sources(&self, band: &str) -> Option<&[usize]> {
        self.bands
            .iter()
            .position(|b| b == band)
            .map(|i| self.indices[i].as_slice())
    }

    pub fn raw_width(&self) -> usize {
        self.raw_width
    }
}

fn resolve_band(lookup: &HashMap<&str, usize>, column: &str) -> Option<usize> {
    if let Some(&i) = lookup.get(column) {
        return Some(i);
    }
    let (_, rest) = column.split_once('_')?;
    lookup.get(rest).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_canonical_bands_are_region_major() {
        assert_eq!(CANONICAL_BANDS.len(), REGIONS.len() * SUB_BANDS.len());
        for (r, region) in REGIONS.iter().enumerate() {
            for (s, sub) in SUB_BANDS.iter().enumerate() {
                assert_eq!(
                    CANONICAL_BANDS[r * SUB_BANDS.len() + s],
                    format!("{region}/{sub}")
                );
            }
        }
    }

    #[test]
    fn test_one_sensor_per_band_is_identity() {
        let bands = canonical_band_names();
        let reducer = BandReducer::new(&bands, &bands).unwrap();

        let raw: Vec<f64> = (0..70).map(|i| i as f64 * 0.5).collect();
        assert_eq!(reducer.reduce(&raw).unwrap(), raw);
    }

    #[test]
    fn test_multiple_sensors_are_averaged() {
        let bands = names(&["AF3/theta", "AF3/alpha", "F7/theta"]);
        let header = names(&[
            "IED_AF3/theta",
            "AF3/theta",
            "AF3/alpha",
            "IED_AF3/alpha",
            "F7/theta",
            "F7/theta",
        ]);
        let reducer = BandReducer::new(&bands, &header).unwrap();

        assert_eq!(reducer.sources("AF3/alpha"), Some(&[2usize, 3][..]));
        let out = reducer.reduce(&[1.0, 3.0, 2.0, 4.0, 5.0, 5.0]).unwrap();
        assert_eq!(out, vec![2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_unknown_band_rejected() {
        let bands = canonical_band_names();
        let mut header = bands.clone();
        header.push("AF3/delta".to_string());

        let err = BandReducer::new(&bands, &header).unwrap_err();
        assert!(matches!(err, SyncError::UnknownBand { column } if column == "AF3/delta"));
    }

    #[test]
    fn test_band_without_sensors_rejected() {
        let bands = names(&["AF3/theta", "AF3/alpha"]);
        let header = names(&["AF3/theta"]);

        let err = BandReducer::new(&bands, &header).unwrap_err();
        assert!(matches!(err, SyncError::EmptyBand { band } if band == "AF3/alpha"));
    }

    #[test]
    fn test_reduce_shape_mismatch() {
        let bands = names(&["O1/gamma"]);
        let reducer = BandReducer::new(&bands, &bands).unwrap();
        assert!(matches!(
            reducer.reduce(&[1.0, 2.0]),
            Err(SyncError::ShapeMismatch {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }
}
