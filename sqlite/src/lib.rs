//! Transactional SQLite command executor.
//!
//! This crate runs batches of typed commands
//! ([`Transaction`](dbcommand_core::Transaction)) against an embedded SQLite
//! database, all-or-nothing, and answers each batch with a single
//! [`CommandResponse`](dbcommand_core::CommandResponse). Callers never see
//! the connection handle.
//!
//! # Architecture
//!
//! - **`binder`**: applies positional bindings to prepared statements
//! - **`record`**: turns result rows into records (explicit or inferred typing)
//! - **`meta`**: schema version bookkeeping in a reserved meta table
//! - **`executor`**: [`Database`], the transaction wrapper and command dispatch
//! - **`lifecycle`**: connection states, thread affinity, memory pressure
//! - **`worker`**: [`DatabaseWorker`], a dedicated owner thread with a queue
//! - **`config`**: YAML-loadable [`DatabaseConfig`]
//!
//! # Quick start
//!
//! ```
//! use dbcommand_core::{Command, Transaction, Value};
//! use dbcommand_sqlite::{Database, DatabaseConfig};
//!
//! let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
//!
//! let setup = Transaction::new(1, 1)
//!     .with_command(Command::initialize())
//!     .with_command(Command::execute("CREATE TABLE t (id INTEGER, name TEXT)"))
//!     .with_command(Command::run("INSERT INTO t VALUES (?, ?)").bind(0, 1i64).bind(1, "a"));
//! assert!(db.run_transaction(&setup).is_ok());
//!
//! let read = Transaction::new(1, 1).with_command(Command::read("SELECT id, name FROM t"));
//! let response = db.run_transaction(&read);
//! let rows = response.records().unwrap();
//! assert_eq!(rows[0].fields, vec![Value::Int64(1), Value::String("a".into())]);
//! ```
//!
//! # Schema versions
//!
//! Initialize reports the version stored in the meta table so the caller
//! can decide which migrations to send. On a brand-new database the table
//! is seeded with the transaction's target version, which is what gets
//! reported; the caller's migration batch then ends with a Migrate command
//! that records the version it actually reached.

mod binder;
mod config;
mod error;
mod executor;
mod lifecycle;
mod meta;
mod record;
mod worker;

pub use config::DatabaseConfig;
pub use error::{Result, SqliteError};
pub use executor::Database;
pub use lifecycle::{
    ConnectionState, DatabaseLocation, MemoryPressureLevel, MemoryPressureListener,
    MemoryPressureNotifier, SequenceChecker,
};
pub use meta::{DEFAULT_META_TABLE, MetaTable};
pub use worker::{DatabaseWorker, PendingResponse};
