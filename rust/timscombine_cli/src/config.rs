use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};
use timscombine::{
    AggregationConfig,
    MzTolerance,
};

use crate::cli::RunArgs;
use crate::error::CliError;

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub aggregation: AggregationConfig,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self, CliError> {
        let file = std::fs::File::open(path).map_err(|e| {
            CliError::Config(format!("Failed to open config file {}: {}", path.display(), e))
        })?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(config)
    }

    /// Reads the config file (if any) and applies the command line overrides.
    pub fn with_run_args(args: &RunArgs) -> Result<Self, CliError> {
        let mut config = match &args.config {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        if let Some(ppm) = args.ppm {
            config.aggregation.tolerance = MzTolerance::Ppm(ppm);
        }
        if let Some(threads) = args.threads {
            config.aggregation.num_threads = Some(threads);
        }
        if let Some(directory) = &args.output_dir {
            config.output = Some(OutputConfig {
                directory: directory.clone(),
            });
        }
        Ok(config)
    }

    pub fn output_directory(&self) -> Result<&Path, CliError> {
        match &self.output {
            Some(out) => Ok(&out.directory),
            None => Err(CliError::Config(
                "No output directory provided, please provide one in either the config file or with the --output-dir flag"
                    .to_string(),
            )),
        }
    }
}
