use std::fmt::Display;

use super::peak::{
    Peak,
    PeakLike,
    PeakMeta,
};
use super::peak::window;
use super::tolerance::ToleranceFunction;
use crate::errors::ClusteringError;

/// A cluster of one or more merged peaks.
///
/// The window is always symmetric around the current (intensity
/// weighted) m/z and is recomputed on every merge.
#[derive(Debug, Clone)]
pub struct MasterPeak {
    mz: f64,
    intensity: f64,
    left: f64,
    right: f64,
    key: i64,
    counts: u32,
    mz_origin: f64,
    rel_intensity_ratio: f64,
    counts_ratio: f64,
    meta: Option<PeakMeta>,
}

impl MasterPeak {
    pub fn new<T: ToleranceFunction + ?Sized>(
        peak: &Peak,
        tolerance: &T,
    ) -> Result<Self, ClusteringError> {
        let mut out = Self {
            mz: peak.mz(),
            intensity: peak.intensity(),
            left: peak.left(),
            right: peak.mz(),
            key: peak.key(),
            counts: 1,
            mz_origin: peak.mz(),
            rel_intensity_ratio: 0.0,
            counts_ratio: 0.0,
            meta: peak.meta().copied(),
        };
        out.update(tolerance)?;
        Ok(out)
    }

    /// Recalculates the window and bin key from the current m/z.
    pub fn update<T: ToleranceFunction + ?Sized>(
        &mut self,
        tolerance: &T,
    ) -> Result<(), ClusteringError> {
        let (delta, key) = window(tolerance, self.mz)?;
        self.set_window(delta, key);
        Ok(())
    }

    fn set_window(&mut self, delta: f64, key: i64) {
        self.left = self.mz - delta;
        self.right = self.mz + delta;
        self.key = key;
    }

    /// Strict on both sides, a peak sitting exactly on the border is
    /// NOT inside.
    pub fn is_inside<P: PeakLike + ?Sized>(&self, peak: &P) -> bool {
        self.is_inside_mz(peak.mz())
    }

    pub fn is_inside_mz(&self, mz: f64) -> bool {
        (self.left < mz) && (self.right > mz)
    }

    /// Folds another peak (raw or master) into this one. Nothing changes
    /// if the window around the new m/z cannot be built.
    ///
    /// ```
    /// use timscombine::{MasterPeak, MzTolerance, Peak};
    /// use timscombine::models::peak::PeakLike;
    ///
    /// let tol = MzTolerance::default();
    /// let mut mp = MasterPeak::new(&Peak::new(100.0, 1.0, &tol).unwrap(), &tol).unwrap();
    /// mp.add(&Peak::new(100.002, 3.0, &tol).unwrap(), &tol).unwrap();
    /// assert!((mp.mz() - 100.0015).abs() < 1e-9);
    /// assert_eq!(mp.intensity(), 4.0);
    /// assert_eq!(mp.counts(), 2);
    /// ```
    pub fn add<P: PeakLike + ?Sized, T: ToleranceFunction + ?Sized>(
        &mut self,
        other: &P,
        tolerance: &T,
    ) -> Result<(), ClusteringError> {
        let total = self.intensity + other.intensity();
        let mz = if total > 0.0 {
            (self.mz * self.intensity + other.mz() * other.intensity()) / total
        } else {
            // Nothing to weigh with.
            (self.mz + other.mz()) / 2.0
        };
        let (delta, key) = window(tolerance, mz)?;
        self.mz = mz;
        self.intensity = total;
        self.counts += other.counts();
        self.set_window(delta, key);
        Ok(())
    }

    /// Window lies completely below the m/z of `peak`.
    pub fn smaller<P: PeakLike + ?Sized>(&self, peak: &P) -> bool {
        self.right < peak.mz()
    }

    /// Window lies completely above the m/z of `peak`.
    pub fn greater<P: PeakLike + ?Sized>(&self, peak: &P) -> bool {
        self.left > peak.mz()
    }

    /// Stores how this peak compares to the same peak in a reference
    /// spectrum. Does not merge anything.
    pub fn recalculate_ratio(&mut self, reference: &MasterPeak) {
        self.rel_intensity_ratio = (self.intensity / self.counts as f64)
            / (reference.intensity / reference.counts as f64);
        self.counts_ratio = self.counts as f64 / reference.counts as f64;
    }

    pub fn right(&self) -> f64 {
        self.right
    }

    pub fn mz_origin(&self) -> f64 {
        self.mz_origin
    }

    pub fn rel_intensity_ratio(&self) -> f64 {
        self.rel_intensity_ratio
    }

    pub fn counts_ratio(&self) -> f64 {
        self.counts_ratio
    }

    pub fn meta(&self) -> Option<&PeakMeta> {
        self.meta.as_ref()
    }

    /// True if the two windows share more than a single point.
    pub(crate) fn overlaps(&self, other: &MasterPeak) -> bool {
        self.left < other.right && other.left < self.right
    }
}

impl PeakLike for MasterPeak {
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

// Ratios and intensity do not take part in equality.
impl PartialEq for MasterPeak {
    fn eq(&self, other: &Self) -> bool {
        self.counts == other.counts
            && self.mz == other.mz
            && self.left == other.left
            && self.right == other.right
            && self.mz_origin == other.mz_origin
    }
}

impl Display for MasterPeak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "mz: {}", self.mz)?;
        writeln!(f, "intensity: {}", self.intensity)?;
        writeln!(f, "left: {}", self.left)?;
        writeln!(f, "right: {}", self.right)?;
        writeln!(f, "counts: {}", self.counts)?;
        writeln!(f, "rel_intensity_ratio: {}", self.rel_intensity_ratio)?;
        writeln!(f, "counts_ratio: {}", self.counts_ratio)?;
        write!(f, "origin: {}", self.mz_origin)
    }
}
