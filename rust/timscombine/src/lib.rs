#![doc = include_str!("../README.md")]

// Declare modules
pub mod aggregation;
pub mod errors;
pub mod grouping;
pub mod io;
pub mod models;
pub mod utils;

// Re-export main structures
pub use crate::models::{
    AggregatedMergeSummary,
    MasterPeak,
    MasterSpectrum,
    MergeSummary,
    MzTolerance,
    Peak,
};

#[doc(inline)]
pub use crate::aggregation::{
    AggregationConfig,
    AggregationOutput,
    CombinedSpectrum,
    RunMetadata,
    ScanGroup,
    aggregate_timstof,
    binning,
    combine_group,
};
pub use crate::grouping::group_scans;
pub use crate::utils::CancellationToken;

// Re-export errors
pub use crate::errors::{
    ClusteringError,
    DataIoError,
    TimscombineError,
};
