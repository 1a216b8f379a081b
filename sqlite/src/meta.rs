//! Schema version bookkeeping.
//!
//! The meta table is a reserved key/value table living in the database
//! itself. It holds two integer entries: the current schema `version` and
//! the `last_compatible_version`. Initialize bootstraps it and Migrate
//! overwrites it; nothing else writes to it.
//!
//! # Fresh databases
//!
//! When the table does not exist yet it is created and seeded with the
//! caller's *target* version. Until the caller's first migration batch
//! commits, a new, empty database therefore reports the final version. This
//! sequencing is not atomic and callers rely on it, so it is kept as is.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::{Result, SqliteError};

/// Default name of the reserved meta table.
pub const DEFAULT_META_TABLE: &str = "meta";

const VERSION_KEY: &str = "version";
const COMPATIBLE_VERSION_KEY: &str = "last_compatible_version";

/// Validates that a table name contains only alphanumeric characters and underscores.
pub(crate) fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SqliteError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

/// Accessor for the reserved meta table of one connection.
///
/// Holds no connection of its own; every operation takes the connection (or
/// open transaction) it should run on, so meta writes join the caller's
/// transaction.
#[derive(Debug, Clone)]
pub struct MetaTable {
    table: String,
    initialized: bool,
}

impl MetaTable {
    /// Creates an accessor for the named table.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::InvalidTableName`] if the name is not a plain
    /// identifier.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self {
            table,
            initialized: false,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Whether [`init`](Self::init) has succeeded since the last reset.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Checks whether the meta table exists in the database.
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        )?;
        let count: i64 = stmt.query_row([&self.table], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Creates the table if needed and seeds missing version entries.
    ///
    /// Existing entries are left untouched, so calling this on an existing
    /// database never changes its recorded version.
    pub fn init(&mut self, conn: &Connection, version: i32, compatible_version: i32) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT NOT NULL PRIMARY KEY, value INTEGER NOT NULL)",
            self.table
        ))?;

        if self.get(conn, VERSION_KEY)?.is_none() {
            debug!(table = %self.table, version, compatible_version, "seeding meta table");
            self.set(conn, VERSION_KEY, version)?;
            self.set(conn, COMPATIBLE_VERSION_KEY, compatible_version)?;
        }

        self.initialized = true;
        Ok(())
    }

    /// Reads the stored schema version.
    pub fn version(&self, conn: &Connection) -> Result<i32> {
        self.get(conn, VERSION_KEY)?
            .ok_or(SqliteError::MissingMetaKey(VERSION_KEY))
    }

    /// Reads the stored compatible version.
    pub fn compatible_version(&self, conn: &Connection) -> Result<i32> {
        self.get(conn, COMPATIBLE_VERSION_KEY)?
            .ok_or(SqliteError::MissingMetaKey(COMPATIBLE_VERSION_KEY))
    }

    pub fn set_version(&self, conn: &Connection, version: i32) -> Result<()> {
        self.set(conn, VERSION_KEY, version)
    }

    pub fn set_compatible_version(&self, conn: &Connection, version: i32) -> Result<()> {
        self.set(conn, COMPATIBLE_VERSION_KEY, version)
    }

    /// Forgets per-connection state. Called when the connection closes.
    pub fn reset(&mut self) {
        self.initialized = false;
    }

    fn get(&self, conn: &Connection, key: &str) -> Result<Option<i32>> {
        let mut stmt =
            conn.prepare_cached(&format!("SELECT value FROM {} WHERE key = ?1", self.table))?;
        let value = stmt
            .query_row(params![key], |row| row.get::<_, i32>(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, conn: &Connection, key: &str, value: i32) -> Result<()> {
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
            self.table
        ))?;
        stmt.execute(params![key, value])?;
        Ok(())
    }
}

impl Default for MetaTable {
    fn default() -> Self {
        Self {
            table: DEFAULT_META_TABLE.to_string(),
            initialized: false,
        }
    }
}
