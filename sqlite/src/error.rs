//! Error types for SQLite command execution.
//!
//! Provides a unified error type covering database access, binding,
//! meta table and configuration failures, and the mapping from those
//! failures onto the [`Status`] a caller observes.

use std::path::PathBuf;

use dbcommand_core::Status;
use thiserror::Error;

/// Errors that can occur while executing commands against SQLite.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// The database file could not be opened or created.
    #[error("failed to open database {path:?}: {source}")]
    OpenError {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A command other than Initialize ran before the connection was initialized.
    #[error("database is not initialized")]
    NotInitialized,

    /// A binding targets a parameter slot the statement does not have.
    #[error("binding index {index} is out of range for a statement with {count} parameters")]
    BindingOutOfRange { index: usize, count: usize },

    /// Meta table name contains invalid characters.
    #[error("invalid table name '{0}': must contain only alphanumeric characters and underscores")]
    InvalidTableName(String),

    /// A required key is missing from the meta table.
    #[error("meta table has no '{0}' entry")]
    MissingMetaKey(&'static str),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl SqliteError {
    /// Maps this error onto the status reported for a failed command.
    pub fn status(&self) -> Status {
        match self {
            Self::OpenError { .. } | Self::NotInitialized => Status::InitializationError,
            Self::InvalidTableName(_) | Self::IoError(_) | Self::YamlError(_) => {
                Status::InitializationError
            }
            Self::DatabaseError(_) | Self::BindingOutOfRange { .. } | Self::MissingMetaKey(_) => {
                Status::CommandError
            }
        }
    }
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;
