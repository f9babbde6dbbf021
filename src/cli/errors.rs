//! CLI error types

use std::io;

use thiserror::Error;

use crate::migrations::MigrationError;
use crate::store::StoreError;

/// Result type for CLI commands
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Database or migrations configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Arguments are individually valid but not together
    #[error("{0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// Stable error code printed alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidArguments(_) => "INVALID_ARGUMENTS",
            Self::Migration(e) => e.code(),
            Self::Store(_) => "STORE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}
