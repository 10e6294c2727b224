//! CLI error type.

use thiserror::Error;
use tilerender::renderer::ConfigError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to initialize logging: {0}")]
    Logging(std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Loader thread stopped unexpectedly")]
    LoaderStopped,
}
