use thiserror::Error;
use vodmux_engine::{JobFailure, JobId};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] vodmux_engine::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] vodmux_engine::ManifestError),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Could not serialize configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job {job} failed: {failure}")]
    JobFailed { job: JobId, failure: JobFailure },

    #[error("Interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, AppError>;
