//! Core command, value and response types.
//!
//! This crate defines the data model for transactional database command
//! batches:
//!
//! - [`Value`] and [`Binding`]: tagged scalar values and positional
//!   statement parameters.
//! - [`Command`]: one operation (initialize, read, execute, run, migrate,
//!   vacuum, close) selected by [`CommandType`].
//! - [`Transaction`]: an ordered batch of commands plus the target schema
//!   version, executed all-or-nothing.
//! - [`Record`], [`CommandResult`] and [`CommandResponse`]: what comes back.
//!
//! Validation ([`validate_transaction`]) catches contract violations such as
//! a Close command mixed into a larger batch.
//!
//! # Example
//!
//! ```
//! use dbcommand_core::*;
//!
//! let tx = Transaction::new(1, 1)
//!     .with_command(Command::initialize())
//!     .with_command(Command::execute("CREATE TABLE t (id INTEGER, name TEXT)"))
//!     .with_command(Command::run("INSERT INTO t VALUES (?, ?)").bind(0, 1i64).bind(1, "a"));
//!
//! assert!(validate_transaction(&tx).is_empty());
//! ```

mod types;
mod validate;

pub use types::*;
pub use validate::{ValidationError, validate_transaction};
