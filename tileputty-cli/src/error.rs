//! CLI error type.

use thiserror::Error;

use tileputty::{ConfigError, PublishError};

/// Errors that end the process with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid settings from flags, environment or config file.
    #[error("configuration error: {0}")]
    Config(String),

    /// The publish run failed as a whole.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The run was interrupted before the queue drained.
    #[error("publish cancelled before all files were uploaded")]
    Cancelled,

    /// Some files failed and `--fail-on-upload-error` was given.
    #[error("{failed} file(s) failed to upload")]
    UploadFailures { failed: usize },

    /// The async runtime could not be started.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}
