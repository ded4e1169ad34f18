use std::time::{
    Duration,
    Instant,
};

use indicatif::{
    ParallelProgressIterator,
    ProgressBar,
    ProgressStyle,
};
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::errors::{
    ClusteringError,
    TimscombineError,
};
use crate::models::{
    AggregatedMergeSummary,
    MasterSpectrum,
    MergeSummary,
    MzTolerance,
};
use crate::utils::cancellation::{
    CancellationToken,
    GroupBudget,
};

pub const MASS_ANALYZER: &str = "TOF";
pub const FRAGMENTATION: &str = "HCD";
pub const INSTRUMENT_TYPES: &str = "TIMSTOF";
pub const MZ_RANGE: &str = "0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregationConfig {
    pub tolerance: MzTolerance,
    /// Pool all peaks regardless of precursor charge.
    /// Summing per charge is not supported.
    pub ignore_charges: bool,
    /// Maximum time spent on a single scan group.
    pub group_timeout_ms: Option<u64>,
    /// Size of a dedicated thread pool, the global rayon pool is used if unset.
    pub num_threads: Option<usize>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            tolerance: MzTolerance::default(),
            ignore_charges: true,
            group_timeout_ms: None,
            num_threads: None,
        }
    }
}

impl AggregationConfig {
    pub fn group_timeout(&self) -> Option<Duration> {
        self.group_timeout_ms.map(Duration::from_millis)
    }
}

/// Run level information attached to every combined spectrum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub raw_file: String,
}

impl RunMetadata {
    pub fn new(raw_file: impl Into<String>) -> Self {
        Self {
            raw_file: raw_file.into(),
        }
    }

    /// Uses the file stem of the acquisition as the raw file name.
    pub fn from_path(path: &std::path::Path) -> Self {
        let raw_file = path
            .file_stem()
            .map(|x| x.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { raw_file }
    }
}

/// All the fragment peaks collected for one scan number, before merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanGroup {
    #[serde(rename = "SCAN_NUMBER")]
    pub scan_number: u32,
    #[serde(rename = "MZ")]
    pub mzs: Vec<f64>,
    #[serde(rename = "INTENSITIES")]
    pub intensities: Vec<f64>,
    #[serde(rename = "COLLISION_ENERGY")]
    pub collision_energy: f64,
    /// Minutes.
    #[serde(rename = "RETENTION_TIME")]
    pub retention_time: f64,
    #[serde(rename = "median_INV_ION_MOBILITY")]
    pub inv_ion_mobility: f64,
}

/// The merged spectrum of a scan number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSpectrum {
    #[serde(rename = "SCAN_NUMBER")]
    pub scan_number: u32,
    #[serde(rename = "MZ")]
    pub mzs: Vec<f64>,
    #[serde(rename = "INTENSITIES")]
    pub intensities: Vec<f64>,
    #[serde(rename = "COLLISION_ENERGY")]
    pub collision_energy: f64,
    #[serde(rename = "RETENTION_TIME")]
    pub retention_time: f64,
    #[serde(rename = "median_INV_ION_MOBILITY")]
    pub inv_ion_mobility: f64,
    #[serde(rename = "RAW_FILE")]
    pub raw_file: String,
    #[serde(rename = "MASS_ANALYZER")]
    pub mass_analyzer: String,
    #[serde(rename = "FRAGMENTATION")]
    pub fragmentation: String,
    #[serde(rename = "INSTRUMENT_TYPES")]
    pub instrument_types: String,
    #[serde(rename = "MZ_RANGE")]
    pub mz_range: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupFailure {
    pub scan_number: u32,
    pub error: ClusteringError,
}

#[derive(Debug, Clone)]
pub struct AggregationOutput {
    /// Successfully combined spectra, in input order.
    pub spectra: Vec<CombinedSpectrum>,
    pub failures: Vec<GroupFailure>,
    pub summary: AggregatedMergeSummary,
    pub wall_time: Duration,
}

fn cluster(
    mzs: &[f64],
    intensities: &[f64],
    ignore_charges: bool,
    tolerance: &MzTolerance,
    budget: &GroupBudget,
) -> Result<MasterSpectrum, ClusteringError> {
    let mut spectrum = MasterSpectrum::new(*tolerance);
    spectrum.load_from_tims_with_budget(mzs, intensities, ignore_charges, budget)?;
    Ok(spectrum)
}

/// Merges one list of peaks and returns the resulting (mz, intensity)
/// arrays sorted by m/z.
///
/// ```
/// use timscombine::{MzTolerance, binning};
///
/// let (mzs, ints) = binning(&[200.0, 100.0], &[1.0, 0.5], true, &MzTolerance::default()).unwrap();
/// assert_eq!(mzs, vec![100.0, 200.0]);
/// assert_eq!(ints, vec![0.5, 1.0]);
/// ```
pub fn binning(
    mzs: &[f64],
    intensities: &[f64],
    ignore_charges: bool,
    tolerance: &MzTolerance,
) -> Result<(Vec<f64>, Vec<f64>), ClusteringError> {
    let spectrum = cluster(
        mzs,
        intensities,
        ignore_charges,
        tolerance,
        &GroupBudget::unlimited(),
    )?;
    Ok(spectrum.to_arrays())
}

/// Merges the peaks of a single scan group.
pub fn combine_group(
    group: &ScanGroup,
    config: &AggregationConfig,
    meta: &RunMetadata,
    budget: &GroupBudget,
) -> Result<(CombinedSpectrum, MergeSummary), ClusteringError> {
    let start = Instant::now();
    let spectrum = cluster(
        &group.mzs,
        &group.intensities,
        config.ignore_charges,
        &config.tolerance,
        budget,
    )?;
    let summary = spectrum.summary(start.elapsed());
    let (mzs, intensities) = spectrum.to_arrays();
    let out = CombinedSpectrum {
        scan_number: group.scan_number,
        mzs,
        intensities,
        collision_energy: group.collision_energy,
        retention_time: group.retention_time,
        inv_ion_mobility: group.inv_ion_mobility,
        raw_file: meta.raw_file.clone(),
        mass_analyzer: MASS_ANALYZER.to_string(),
        fragmentation: FRAGMENTATION.to_string(),
        instrument_types: INSTRUMENT_TYPES.to_string(),
        mz_range: MZ_RANGE.to_string(),
    };
    Ok((out, summary))
}

fn progress_bar(len: usize) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len as u64).with_style(style)
}

/// Combines every scan group of a run.
///
/// Groups are independent of each other and are processed in parallel.
/// A group that fails (bad input, cancellation, timeout) is reported in
/// [AggregationOutput::failures] and does not affect the others.
#[instrument(skip_all)]
pub fn aggregate_timstof(
    groups: &[ScanGroup],
    config: &AggregationConfig,
    meta: &RunMetadata,
    token: Option<&CancellationToken>,
) -> Result<AggregationOutput, TimscombineError> {
    info!(
        "Aggregating {} scan groups from '{}'",
        groups.len(),
        meta.raw_file
    );
    let start = Instant::now();
    let run = || {
        groups
            .par_iter()
            .progress_with(progress_bar(groups.len()))
            .map(|group| {
                let budget = GroupBudget::new(token.cloned(), config.group_timeout());
                (group.scan_number, combine_group(group, config, meta, &budget))
            })
            .collect::<Vec<_>>()
    };

    let results = match config.num_threads {
        Some(num_threads) => {
            debug!("Using a dedicated pool with {} threads", num_threads);
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .map_err(TimscombineError::custom)?
                .install(run)
        }
        None => run(),
    };

    let mut spectra = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    let mut summary = AggregatedMergeSummary::new();
    for (scan_number, result) in results {
        match result {
            Ok((spectrum, group_summary)) => {
                summary = AggregatedMergeSummary::fold_summary(summary, &group_summary);
                spectra.push(spectrum);
            }
            Err(error) => {
                warn!("Failed to combine scan number {}: {}", scan_number, error);
                summary = AggregatedMergeSummary::fold_failure(summary);
                failures.push(GroupFailure { scan_number, error });
            }
        }
    }

    let wall_time = start.elapsed();
    info!("Aggregation finished in {:#.2?}\n{}", wall_time, summary);
    Ok(AggregationOutput {
        spectra,
        failures,
        summary,
        wall_time,
    })
}
