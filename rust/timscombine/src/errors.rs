use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum TimscombineError {
    Clustering(ClusteringError),
    DataIo(DataIoError),
    Other(String),
}

impl Display for TimscombineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clustering(e) => write!(f, "Clustering error: {}", e),
            Self::DataIo(e) => write!(f, "Data I/O error: {}", e),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TimscombineError {}

impl TimscombineError {
    pub fn custom(msg: impl Display) -> Self {
        Self::Other(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TimscombineError>;

/// Errors local to the construction of a single spectrum.
///
/// None of these are transient, clustering is deterministic given
/// its inputs, so there is nothing to retry.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusteringError {
    /// A mode that is not implemented was requested (e.g. per-charge summation).
    UnsupportedConfiguration {
        option: &'static str,
        reason: &'static str,
    },
    /// The tolerance function returned a non-positive or NaN window for a finite m/z.
    MalformedTolerance { mz: f64, delta: f64 },
    InvalidMz { index: usize, mz: f64 },
    /// The tolerance window of `mz` falls outside the range that can be binned.
    MzOutOfRange { mz: f64, left: f64 },
    InvalidIntensity { index: usize, value: f64 },
    MismatchedLengths { mzs: usize, intensities: usize },
    /// Overlapping windows (or a misfiled master peak) found after an insertion.
    /// This is always a bug in the merge logic.
    InvariantViolation {
        charge: u8,
        key: i64,
        detail: String,
    },
    Cancelled,
    DeadlineExceeded { elapsed: Duration },
}

impl Display for ClusteringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedConfiguration { option, reason } => {
                write!(f, "Unsupported configuration '{}': {}", option, reason)
            }
            Self::MalformedTolerance { mz, delta } => write!(
                f,
                "Tolerance function returned {} for mz {}, expected a finite positive value",
                delta, mz
            ),
            Self::InvalidMz { index, mz } => {
                write!(f, "Invalid mz {} at position {}", mz, index)
            }
            Self::MzOutOfRange { mz, left } => write!(
                f,
                "Window of mz {} starts at {}, outside the binnable range",
                mz, left
            ),
            Self::InvalidIntensity { index, value } => {
                write!(f, "Invalid intensity {} at position {}", value, index)
            }
            Self::MismatchedLengths { mzs, intensities } => write!(
                f,
                "Expected mz and intensity arrays of the same length, got {} and {}",
                mzs, intensities
            ),
            Self::InvariantViolation {
                charge,
                key,
                detail,
            } => write!(
                f,
                "Invariant violated in bin (charge={}, key={}): {}",
                charge, key, detail
            ),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::DeadlineExceeded { elapsed } => {
                write!(f, "Deadline exceeded after {:?}", elapsed)
            }
        }
    }
}

impl std::error::Error for ClusteringError {}

impl From<ClusteringError> for TimscombineError {
    fn from(e: ClusteringError) -> Self {
        TimscombineError::Clustering(e)
    }
}

#[derive(Debug)]
pub enum DataIoError {
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },
    Csv(csv::Error),
    Json(serde_json::Error),
}

impl Display for DataIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { source, path } => match path {
                Some(path) => write!(f, "Error accessing {}: {}", path.display(), source),
                None => write!(f, "I/O error: {}", source),
            },
            Self::Csv(e) => write!(f, "CSV error: {}", e),
            Self::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for DataIoError {}

impl DataIoError {
    pub fn io_at(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }
}

impl From<std::io::Error> for DataIoError {
    fn from(e: std::io::Error) -> Self {
        DataIoError::Io {
            source: e,
            path: None,
        }
    }
}

impl From<csv::Error> for DataIoError {
    fn from(e: csv::Error) -> Self {
        DataIoError::Csv(e)
    }
}

impl From<serde_json::Error> for DataIoError {
    fn from(e: serde_json::Error) -> Self {
        DataIoError::Json(e)
    }
}

impl<T: Into<DataIoError>> From<T> for TimscombineError {
    fn from(e: T) -> Self {
        TimscombineError::DataIo(e.into())
    }
}
