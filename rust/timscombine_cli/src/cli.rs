use clap::{
    Parser,
    Subcommand,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Group raw fragment peaks by scan number and combine each group.
    Aggregate(AggregateArgs),
    /// Combine already grouped spectra (json).
    Combine(CombineArgs),
    /// Cluster a single peak list and write the master peak table.
    Cluster(ClusterArgs),
    /// Write template configuration files.
    WriteTemplate(WriteTemplateArgs),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum SerializationFormat {
    Json,
    #[default]
    PrettyJson,
    Ndjson,
}

impl SerializationFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SerializationFormat::Json | SerializationFormat::PrettyJson => "json",
            SerializationFormat::Ndjson => "ndjson",
        }
    }
}

/// Settings shared by the subcommands that combine scan groups.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the json configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for the output files, overrides the config file.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Name of the raw file written to every spectrum.
    #[arg(long)]
    pub raw_file: Option<String>,

    /// Mass tolerance in ppm, overrides the config file.
    #[arg(long)]
    pub ppm: Option<f64>,

    /// Number of threads, overrides the config file.
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// The format to use for the output
    #[arg(short, long, default_value_t, value_enum)]
    pub format: SerializationFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct AggregateArgs {
    /// Csv with the raw fragment peaks
    /// (FRAME,SCAN,PRECURSOR,RETENTION_TIME,INV_ION_MOBILITY,MZ,INTENSITY).
    #[arg(long)]
    pub raw_peaks: PathBuf,

    /// Csv mapping scan numbers to precursors and frames.
    #[arg(long)]
    pub precursor_map: PathBuf,

    /// Also write the scan groups before combining.
    #[arg(long, default_value_t = false)]
    pub write_groups: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct CombineArgs {
    /// Json file with the scan groups.
    #[arg(short, long)]
    pub groups: PathBuf,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct ClusterArgs {
    /// Csv peak list with `mz` and `intensity` columns.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Peak list of a reference spectrum to compute ratios against.
    #[arg(short, long)]
    pub reference: Option<PathBuf>,

    /// Where to write the master peak table (csv).
    #[arg(short, long)]
    pub output_path: PathBuf,

    /// Path to the json configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct WriteTemplateArgs {
    /// The path to the output files.
    #[arg(short, long)]
    pub output_path: PathBuf,
}
