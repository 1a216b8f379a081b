//! Database configuration.
//!
//! Defines the YAML-serializable settings used to open a
//! [`Database`](crate::Database): where it lives, the name of the reserved
//! meta table, and connection tuning.
//!
//! # Example YAML
//!
//! ```yaml
//! location: !File data/ledger.db
//! meta_table: meta
//! busy_timeout_ms: 5000
//! statement_cache_capacity: 32
//! foreign_keys: true
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lifecycle::DatabaseLocation;
use crate::meta::{DEFAULT_META_TABLE, validate_table_name};

fn default_meta_table() -> String {
    DEFAULT_META_TABLE.to_string()
}

fn default_statement_cache_capacity() -> usize {
    32
}

/// Settings for opening and running a database.
///
/// # Examples
///
/// ```
/// use dbcommand_sqlite::{DatabaseConfig, DatabaseLocation};
///
/// let config = DatabaseConfig::new("ledger.db");
/// assert_eq!(config.meta_table, "meta");
/// assert!(config.validate().is_ok());
///
/// let memory = DatabaseConfig::in_memory();
/// assert_eq!(memory.location, DatabaseLocation::InMemory);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file or in-memory instance.
    pub location: DatabaseLocation,
    /// Name of the reserved meta table.
    #[serde(default = "default_meta_table")]
    pub meta_table: String,
    /// How long SQLite waits on a locked database, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
    /// Capacity of the per-connection prepared statement cache.
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
    /// Enforce foreign key constraints.
    #[serde(default)]
    pub foreign_keys: bool,
}

impl DatabaseConfig {
    /// Configuration for a database file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_location(DatabaseLocation::File(path.into()))
    }

    /// Configuration for a private in-memory database.
    pub fn in_memory() -> Self {
        Self::with_location(DatabaseLocation::InMemory)
    }

    fn with_location(location: DatabaseLocation) -> Self {
        Self {
            location,
            meta_table: default_meta_table(),
            busy_timeout_ms: None,
            statement_cache_capacity: default_statement_cache_capacity(),
            foreign_keys: false,
        }
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](crate::SqliteError::IoError) if the file cannot be
    /// read, or [`YamlError`](crate::SqliteError::YamlError) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Checks that the configuration can be used to open a database.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTableName`](crate::SqliteError::InvalidTableName) if
    /// the meta table name is not a plain identifier.
    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.meta_table)
    }

    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }
}
