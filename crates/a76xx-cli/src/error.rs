//! CLI error type.

use std::io;
use std::path::PathBuf;

use a76xx_at::AtError;
use a76xx_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error(transparent)]
    At(#[from] AtError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{0}")]
    Usage(String),
}

pub type CliResult<T> = Result<T, CliError>;
