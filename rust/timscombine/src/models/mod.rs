pub mod master_peak;
pub mod master_spectrum;
pub mod peak;
pub mod summary;
pub mod tolerance;

pub use master_peak::MasterPeak;
pub use master_spectrum::{
    MasterPeakRecord,
    MasterSpectrum,
    SearchOutcome,
};
pub use peak::{
    Peak,
    PeakLike,
    PeakMeta,
};
pub use summary::{
    AggregatedMergeSummary,
    MergeSummary,
};
pub use tolerance::{
    MzTolerance,
    ToleranceFunction,
};
