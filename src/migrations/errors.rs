//! # Migration Errors
//!
//! Every failure the migration core can report. `Skip` and `Abort` double as
//! control signals returned by lifecycle hooks; `Skip` never travels past the
//! version executor.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Migration error types
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A required configuration field is unset
    #[error("{0}")]
    ConfigurationValidation(String),

    /// Version registered twice
    #[error("Migration version {version} already registered with class {class}")]
    DuplicateVersion { version: String, class: String },

    /// Version is not registered, or has no tracking record
    #[error("Could not find migration version {0}")]
    UnknownVersion(String),

    /// Explicit abort from an operator or migration author
    #[error("{0}")]
    Abort(String),

    /// Explicit skip from a migration author
    #[error("{0}")]
    Skip(String),

    /// The migration declines to run `down`
    #[error("{0}")]
    Irreversible(String),

    /// Planning yielded nothing when something was expected
    #[error("Could not find any migrations to execute.")]
    NoMigrationsToExecute,

    /// Tracking data violates an invariant the store should guarantee
    #[error("{0}")]
    Domain(String),

    /// Version identifier is not a canonical `YYYYMMDDHHMMSS` value
    #[error("Invalid migration version '{0}': expected 14 digits (YYYYMMDDHHMMSS) or \"0\"")]
    InvalidVersion(String),

    /// No factory is registered for a migration class
    #[error("Migration class '{0}' is not registered in the migration catalog")]
    UnknownMigrationClass(String),

    /// Caller supplied an unusable argument
    #[error("{0}")]
    InvalidArgument(String),

    /// Script execution requested without a script directory
    #[error("Missing Configuration for migrations script directory")]
    MissingScriptDirectory,

    /// A file could not be read
    #[error("Failed to read {path:?}: {source}")]
    FileRead { path: PathBuf, source: io::Error },

    /// A file could not be written
    #[error("Failed to write {path:?}: {source}")]
    FileWrite { path: PathBuf, source: io::Error },

    /// A configuration or migration file failed to parse
    #[error("Failed to parse {path:?}: {message}")]
    ParseError { path: PathBuf, message: String },

    /// Store or driver failure, passed through unmodified
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MigrationError {
    /// Create a configuration validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigurationValidation(message.into())
    }

    /// Create an abort signal
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort(reason.into())
    }

    /// Create a skip signal
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Stable error code for command line output
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigurationValidation(_) => "CONFIGURATION_VALIDATION",
            Self::DuplicateVersion { .. } => "DUPLICATE_VERSION",
            Self::UnknownVersion(_) => "UNKNOWN_VERSION",
            Self::Abort(_) => "ABORTED",
            Self::Skip(_) => "SKIPPED",
            Self::Irreversible(_) => "IRREVERSIBLE",
            Self::NoMigrationsToExecute => "NO_MIGRATIONS_TO_EXECUTE",
            Self::Domain(_) => "DOMAIN_ERROR",
            Self::InvalidVersion(_) => "INVALID_VERSION",
            Self::UnknownMigrationClass(_) => "UNKNOWN_MIGRATION_CLASS",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::MissingScriptDirectory => "MISSING_SCRIPT_DIRECTORY",
            Self::FileRead { .. } => "FILE_READ",
            Self::FileWrite { .. } => "FILE_WRITE",
            Self::ParseError { .. } => "PARSE_ERROR",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_version_message() {
        let err = MigrationError::DuplicateVersion {
            version: "20140101000000".to_string(),
            class: "app::Version20140101000000".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("20140101000000"));
        assert!(msg.contains("already registered"));
        assert_eq!(err.code(), "DUPLICATE_VERSION");
    }

    #[test]
    fn test_store_errors_pass_through() {
        let store_err = StoreError::UnsupportedCommand("shutdown".to_string());
        let expected = store_err.to_string();

        let err: MigrationError = store_err.into();
        assert_eq!(err.to_string(), expected);
        assert_eq!(err.code(), "STORE_ERROR");
    }

    #[test]
    fn test_unknown_version_message() {
        let err = MigrationError::UnknownVersion("20990101000000".to_string());
        assert!(err.to_string().contains("20990101000000"));
    }
}
