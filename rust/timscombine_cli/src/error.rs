use thiserror::Error;
use timscombine::{
    ClusteringError,
    DataIoError,
    TimscombineError,
};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error reading or writing data: {0}")]
    DataIo(#[from] DataIoError),

    #[error("Clustering error: {0}")]
    Clustering(#[from] ClusteringError),

    #[error(transparent)]
    Timscombine(#[from] TimscombineError),

    #[error("Configuration error: {0}")]
    Config(String),
}
