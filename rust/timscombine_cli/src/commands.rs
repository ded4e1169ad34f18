use serde::Serialize;
use std::fs::File;
use std::io::{
    self,
    BufWriter,
    Write,
};
use std::path::Path;
use std::time::Instant;

use timscombine::io::{
    read_peak_list,
    read_precursor_map,
    read_raw_peaks,
    read_scan_groups,
    write_scan_groups,
};
use timscombine::aggregation::GroupFailure;
use timscombine::{
    AggregationConfig,
    AggregationOutput,
    MasterSpectrum,
    RunMetadata,
    ScanGroup,
    aggregate_timstof,
    group_scans,
};
use tracing::{
    info,
    instrument,
    warn,
};

use crate::cli::{
    AggregateArgs,
    ClusterArgs,
    CombineArgs,
    RunArgs,
    SerializationFormat,
    WriteTemplateArgs,
};
use crate::config::Config;
use crate::error::CliError;

/// Main function for the 'aggregate' subcommand.
#[instrument(skip_all)]
pub fn main_aggregate(args: AggregateArgs) -> Result<(), CliError> {
    let config = Config::with_run_args(&args.run)?;
    info!("Using configuration: {:#?}", config);
    let output_dir = config.output_directory()?;
    std::fs::create_dir_all(output_dir)?;

    let raw = read_raw_peaks(&args.raw_peaks)?;
    let map = read_precursor_map(&args.precursor_map)?;
    let groups = group_scans(&raw, &map);
    info!(
        "Built {} scan groups from {} raw peaks",
        groups.len(),
        raw.len()
    );
    if args.write_groups {
        let groups_path = output_dir.join("scan_groups.json");
        write_scan_groups(&groups_path, &groups)?;
        info!("Wrote scan groups to {}", groups_path.display());
    }

    let meta = match &args.run.raw_file {
        Some(name) => RunMetadata::new(name.clone()),
        None => RunMetadata::from_path(&args.raw_peaks),
    };
    run_and_write(&groups, &config.aggregation, &meta, &args.run, output_dir)
}

/// Main function for the 'combine' subcommand.
#[instrument(skip_all)]
pub fn main_combine(args: CombineArgs) -> Result<(), CliError> {
    let config = Config::with_run_args(&args.run)?;
    info!("Using configuration: {:#?}", config);
    let output_dir = config.output_directory()?;
    std::fs::create_dir_all(output_dir)?;

    info!("Loading scan groups from {}", args.groups.display());
    let groups = read_scan_groups(&args.groups)?;
    let meta = match &args.run.raw_file {
        Some(name) => RunMetadata::new(name.clone()),
        None => RunMetadata::from_path(&args.groups),
    };
    run_and_write(&groups, &config.aggregation, &meta, &args.run, output_dir)
}

fn run_and_write(
    groups: &[ScanGroup],
    config: &AggregationConfig,
    meta: &RunMetadata,
    run: &RunArgs,
    output_dir: &Path,
) -> Result<(), CliError> {
    let out = aggregate_timstof(groups, config, meta, None)?;
    let out_path = output_dir.join(format!("combined.{}", run.format.extension()));
    let failures_path = output_dir.join(format!("failures.{}", run.format.extension()));
    write_output(&out, run.format, &out_path, &failures_path)?;

    let summary_path = output_dir.join("summary.json");
    std::fs::write(&summary_path, serde_json::to_string_pretty(&out.summary)?)?;

    println!("Wrote {} spectra to {}", out.spectra.len(), out_path.display());
    println!("{}", out.summary);
    println!("Total wall time {:#?}", out.wall_time);
    if !out.failures.is_empty() {
        warn!(
            "{} scan groups could not be combined, see {}",
            out.failures.len(),
            failures_path.display()
        );
    }
    Ok(())
}

/// One line of the failures output.
#[derive(Debug, Serialize)]
struct FailureRecord {
    #[serde(rename = "SCAN_NUMBER")]
    scan_number: u32,
    error: String,
}

impl From<&GroupFailure> for FailureRecord {
    fn from(failure: &GroupFailure) -> Self {
        Self {
            scan_number: failure.scan_number,
            error: failure.error.to_string(),
        }
    }
}

/// Writes the combined spectra, and the failed scan groups if there are
/// any, in the same format.
fn write_output(
    out: &AggregationOutput,
    format: SerializationFormat,
    spectra_path: &Path,
    failures_path: &Path,
) -> Result<(), CliError> {
    let start = Instant::now();
    let mut spectra = RecordStreamWriter::new(BufWriter::new(File::create(spectra_path)?), format);
    spectra.write_all(&out.spectra)?;
    let written = spectra.finish()?;
    info!("Wrote {} spectra in {:#?}", written, start.elapsed());

    if !out.failures.is_empty() {
        let mut failures =
            RecordStreamWriter::new(BufWriter::new(File::create(failures_path)?), format);
        failures.write_all(out.failures.iter().map(FailureRecord::from))?;
        failures.finish()?;
    }
    Ok(())
}

/// Main function for the 'cluster' subcommand.
#[instrument(skip_all)]
pub fn main_cluster(args: ClusterArgs) -> Result<(), CliError> {
    let config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    let agg = &config.aggregation;

    let (mzs, intensities) = read_peak_list(&args.input)?;
    let mut spectrum = MasterSpectrum::new(agg.tolerance);
    spectrum.load_from_tims(&mzs, &intensities, agg.ignore_charges)?;
    info!(
        "Clustered {} peaks into {} master peaks",
        mzs.len(),
        spectrum.len()
    );

    if let Some(reference_path) = &args.reference {
        let (ref_mzs, ref_intensities) = read_peak_list(reference_path)?;
        let mut reference = MasterSpectrum::new(agg.tolerance);
        reference.load_from_tims(&ref_mzs, &ref_intensities, agg.ignore_charges)?;
        let matched = spectrum.compare_to(&reference)?;
        info!(
            "Matched {} of {} master peaks against the reference",
            matched,
            spectrum.len()
        );
    }

    spectrum.export_to_csv(&args.output_path)?;
    println!("Wrote master peaks to {}", args.output_path.display());
    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"{
  "aggregation": {
    "tolerance": { "ppm": 40.0 },
    "ignore_charges": true,
    "group_timeout_ms": 10000,
    "num_threads": null
  },
  "output": { "directory": "timscombine_output" }
}"#;

const SCAN_GROUP_TEMPLATE: &str = r#"[
  {
    "SCAN_NUMBER": 1,
    "MZ": [147.1128, 147.11284, 248.1604, 347.22889],
    "INTENSITIES": [1200.0, 800.0, 430.0, 90.0],
    "COLLISION_ENERGY": 27.5,
    "RETENTION_TIME": 5.04,
    "median_INV_ION_MOBILITY": 0.985
  }
]"#;

/// Main function for the 'write-template' subcommand.
pub fn main_write_template(args: WriteTemplateArgs) -> Result<(), CliError> {
    let target_dir = args.output_path;
    std::fs::create_dir_all(&target_dir)?;

    let config_path = target_dir.join("config_template.json");
    std::fs::write(&config_path, CONFIG_TEMPLATE)?;
    println!("Wrote config template to: {}", config_path.display());

    let groups_path = target_dir.join("scan_groups_template.json");
    std::fs::write(&groups_path, SCAN_GROUP_TEMPLATE)?;
    println!("Wrote scan group template to: {}", groups_path.display());
    Ok(())
}

/// Streams records out as one json array, or as newline delimited json,
/// without collecting them first.
pub struct RecordStreamWriter<W: Write> {
    writer: W,
    format: SerializationFormat,
    written: usize,
}

impl<W: Write> RecordStreamWriter<W> {
    pub fn new(writer: W, format: SerializationFormat) -> Self {
        Self {
            writer,
            format,
            written: 0,
        }
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        match (self.format, self.written) {
            (SerializationFormat::Ndjson, _) => {}
            (_, 0) => self.writer.write_all(b"[")?,
            _ => self.writer.write_all(b",")?,
        }
        match self.format {
            SerializationFormat::PrettyJson => serde_json::to_writer_pretty(&mut self.writer, record),
            _ => serde_json::to_writer(&mut self.writer, record),
        }
        .map_err(io::Error::other)?;
        if self.format == SerializationFormat::Ndjson {
            self.writer.write_all(b"\n")?;
        }
        self.written += 1;
        Ok(())
    }

    pub fn write_all<T: Serialize>(&mut self, records: impl IntoIterator<Item = T>) -> io::Result<()> {
        for record in records {
            self.write(&record)?;
        }
        Ok(())
    }

    /// Closes the json array (if any), flushes and returns how many
    /// records were written.
    pub fn finish(mut self) -> io::Result<usize> {
        match (self.format, self.written) {
            (SerializationFormat::Ndjson, _) => {}
            (_, 0) => self.writer.write_all(b"[]")?,
            _ => self.writer.write_all(b"]")?,
        }
        self.writer.flush()?;
        Ok(self.written)
    }
}
