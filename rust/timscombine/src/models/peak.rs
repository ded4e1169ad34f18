use std::fmt::Display;

use serde::{
    Deserialize,
    Serialize,
};

use super::tolerance::{
    ToleranceFunction,
    checked_delta,
};
use crate::errors::ClusteringError;

/// Largest m/z magnitude accepted for clustering. Keeps bin keys and
/// their neighbors well inside `i64`.
pub const MAX_MZ: f64 = 1e15;

/// Half width of the window around `mz` and the bin key of its left
/// border.
pub(crate) fn window<T: ToleranceFunction + ?Sized>(
    tolerance: &T,
    mz: f64,
) -> Result<(f64, i64), ClusteringError> {
    let delta = checked_delta(tolerance, mz)?;
    let left = mz - delta;
    if left.is_nan() || left.abs() >= MAX_MZ {
        return Err(ClusteringError::MzOutOfRange { mz, left });
    }
    Ok((delta, left.ceil() as i64))
}

/// Read access shared by raw peaks and master peaks, so a master
/// peak can absorb either of them.
pub trait PeakLike {
    fn mz(&self) -> f64;
    fn intensity(&self) -> f64;
    fn counts(&self) -> u32;
    fn left(&self) -> f64;
    /// Bin key, `ceil(left)`.
    fn key(&self) -> i64;
}

/// Where in the raw data a peak was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakMeta {
    pub frame_index: u32,
    pub scan_index: u32,
}

/// A single (m/z, intensity) observation and the left edge of its
/// tolerance window.
#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    mz: f64,
    intensity: f64,
    left: f64,
    key: i64,
    counts: u32,
    meta: Option<PeakMeta>,
}

impl Peak {
    /// Builds a peak, `intensity` is expected to be relative already.
    ///
    /// ```
    /// use timscombine::{MzTolerance, Peak};
    /// use timscombine::models::peak::PeakLike;
    ///
    /// let peak = Peak::new(100.0, 1.0, &MzTolerance::Ppm(40.0)).unwrap();
    /// assert!((peak.left() - 99.996).abs() < 1e-9);
    /// assert_eq!(peak.key(), 100);
    /// ```
    pub fn new<T: ToleranceFunction + ?Sized>(
        mz: f64,
        intensity: f64,
        tolerance: &T,
    ) -> Result<Self, ClusteringError> {
        let mut out = Self {
            mz,
            intensity,
            left: mz,
            key: 0,
            counts: 1,
            meta: None,
        };
        out.update(tolerance)?;
        Ok(out)
    }

    pub fn with_meta(mut self, meta: PeakMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn meta(&self) -> Option<&PeakMeta> {
        self.meta.as_ref()
    }

    /// Recomputes `left` and the bin key from the current m/z.
    pub fn update<T: ToleranceFunction + ?Sized>(
        &mut self,
        tolerance: &T,
    ) -> Result<(), ClusteringError> {
        let (delta, key) = window(tolerance, self.mz)?;
        self.left = self.mz - delta;
        self.key = key;
        Ok(())
    }
}

impl PeakLike for Peak {
    fn mz(&self) -> f64 {
        self.mz
    }

    fn intensity(&self) -> f64 {
        self.intensity
    }

    fn counts(&self) -> u32 {
        self.counts
    }

    fn left(&self) -> f64 {
        self.left
    }

    fn key(&self) -> i64 {
        self.key
    }
}

impl Display for Peak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "mz: {}", self.mz)?;
        writeln!(f, "intensity: {}", self.intensity)?;
        writeln!(f, "left: {}", self.left)?;
        write!(f, "delta: {}", self.mz - self.left)
    }
}
