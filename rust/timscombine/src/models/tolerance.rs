use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::ClusteringError;

/// Default mass accuracy used when building a spectrum from tims data.
pub const DEFAULT_PPM: f64 = 40.0;

/// Anything that can tell the half-width of the tolerance window
/// around an m/z value.
///
/// A single instance is stored on every [crate::MasterSpectrum] and
/// passed down to the peaks explicitly, so peaks never own (or
/// reference count) the function.
///
/// Plain closures work too:
/// ```
/// use timscombine::models::tolerance::ToleranceFunction;
///
/// let fixed = |_mz: f64| 0.01;
/// assert_eq!(fixed.delta(500.0), 0.01);
/// ```
pub trait ToleranceFunction: Sync {
    fn delta(&self, mz: f64) -> f64;
}

impl<F> ToleranceFunction for F
where
    F: Fn(f64) -> f64 + Sync,
{
    fn delta(&self, mz: f64) -> f64 {
        self(mz)
    }
}

/// Symmetric m/z tolerance.
///
/// Example:
/// ```
/// use timscombine::MzTolerance;
/// use timscombine::models::tolerance::ToleranceFunction;
///
/// let tol = MzTolerance::default(); // 40 ppm
/// assert!((tol.delta(100.0) - 0.004).abs() < 1e-12);
///
/// let parsed: MzTolerance = serde_json::from_str(r#"{"da": 0.02}"#).unwrap();
/// assert_eq!(parsed, MzTolerance::Absolute(0.02));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MzTolerance {
    #[serde(rename = "ppm")]
    Ppm(f64),
    #[serde(rename = "da")]
    Absolute(f64),
}

impl Default for MzTolerance {
    fn default() -> Self {
        MzTolerance::Ppm(DEFAULT_PPM)
    }
}

impl ToleranceFunction for MzTolerance {
    fn delta(&self, mz: f64) -> f64 {
        match self {
            MzTolerance::Ppm(ppm) => ppm * mz / 1e6,
            MzTolerance::Absolute(da) => *da,
        }
    }
}

/// Evaluates the tolerance function and rejects windows that would
/// corrupt the bin keys (NaN, infinite or non-positive).
pub fn checked_delta<T: ToleranceFunction + ?Sized>(
    tolerance: &T,
    mz: f64,
) -> Result<f64, ClusteringError> {
    let delta = tolerance.delta(mz);
    if delta.is_finite() && delta > 0.0 {
        Ok(delta)
    } else {
        Err(ClusteringError::MalformedTolerance { mz, delta })
    }
}
