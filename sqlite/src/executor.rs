//! Transactional execution of command batches.
//!
//! Provides [`Database`], which owns one SQLite connection and runs each
//! [`Transaction`] as a single all-or-nothing SQLite transaction:
//!
//! 1. The connection is opened on demand.
//! 2. A batch consisting of exactly one Close command closes the connection
//!    without a transaction.
//! 3. Every other batch is validated, then each command is dispatched in
//!    order inside one transaction. The first failing command rolls the
//!    whole batch back and its status is returned.
//! 4. After a successful commit a requested VACUUM runs outside the
//!    transaction. Its failure is logged and does not change the status.
//!
//! # Example
//!
//! ```
//! use dbcommand_core::{Command, Status, Transaction, Value};
//! use dbcommand_sqlite::{Database, DatabaseConfig};
//!
//! let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
//!
//! let response = db.run_transaction(
//!     &Transaction::new(1, 1)
//!         .with_command(Command::initialize())
//!         .with_command(Command::execute("CREATE TABLE t (id INTEGER, name TEXT)"))
//!         .with_command(Command::run("INSERT INTO t VALUES (?, ?)").bind(0, 1i64).bind(1, "a")),
//! );
//! assert_eq!(response.status, Status::Ok);
//! assert_eq!(response.value(), Some(&Value::Int(1)));
//! ```

use dbcommand_core::{
    Command, CommandResponse, CommandResult, CommandType, Record, Status, Transaction, Value,
    validate_transaction,
};
use rusqlite::Connection;
use tracing::{debug, error, warn};

use crate::binder::bind_all;
use crate::config::DatabaseConfig;
use crate::error::{Result, SqliteError};
use crate::lifecycle::{
    ConnectionState, DatabaseLocation, MemoryPressureLevel, MemoryPressureListener,
    MemoryPressureNotifier, PendingPressure, PressureWaker, SequenceChecker,
};
use crate::meta::MetaTable;
use crate::record::read_record;

/// Command executor owning a single SQLite connection.
///
/// All methods take `&mut self`, and the first thread to run a transaction
/// becomes the owner: using the database from any other thread afterwards
/// panics (see [`SequenceChecker`]). Hosts that need to submit work from
/// several threads should go through a [`DatabaseWorker`](crate::DatabaseWorker).
#[derive(Debug)]
pub struct Database {
    config: DatabaseConfig,
    conn: Option<Connection>,
    state: ConnectionState,
    meta: MetaTable,
    notifier: Option<MemoryPressureNotifier>,
    listener: Option<MemoryPressureListener>,
    pending_pressure: PendingPressure,
    waker: Option<PressureWaker>,
    sequence: SequenceChecker,
}

/// Per-batch state, promoted onto the [`Database`] only when the batch commits.
#[derive(Debug, Default)]
struct Batch {
    vacuum_requested: bool,
    result: Option<CommandResult>,
}

impl Database {
    /// Creates an unopened database. Nothing touches the disk until the
    /// first transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::InvalidTableName`] if the configured meta
    /// table name is invalid.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let meta = MetaTable::new(config.meta_table.clone())?;
        Ok(Self {
            config,
            conn: None,
            state: ConnectionState::Unopened,
            meta,
            notifier: None,
            listener: None,
            pending_pressure: PendingPressure::default(),
            waker: None,
            sequence: SequenceChecker::default(),
        })
    }

    /// Subscribes the database to host memory-pressure signals once it is
    /// initialized.
    pub fn with_memory_pressure(mut self, notifier: MemoryPressureNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Opens a private in-memory instance instead of the configured location.
    ///
    /// Does nothing if a connection is already open.
    pub fn open_in_memory_for_testing(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.install(Connection::open_in_memory()?)?;
        }
        Ok(())
    }

    /// Releases the binding to the current owner thread so the database
    /// can be handed to another one.
    pub fn detach_from_sequence(&mut self) {
        self.sequence.detach();
    }

    /// Runs a batch of commands atomically and reports the outcome.
    ///
    /// The response's result is that of the last command producing one
    /// (Initialize, Read, Execute or Run). Failed batches carry no result and
    /// leave both the database and the connection state as they were.
    pub fn run_transaction(&mut self, transaction: &Transaction) -> CommandResponse {
        self.sequence.check();
        self.service_memory_pressure();

        if let Err(err) = self.ensure_open() {
            error!(%err, "cannot open database");
            return CommandResponse::with_status(Status::InitializationError);
        }

        if transaction.is_close() {
            self.close();
            return CommandResponse::ok();
        }

        let violations = validate_transaction(transaction);
        if !violations.is_empty() {
            for violation in &violations {
                warn!(%violation, "rejecting transaction");
            }
            return CommandResponse::with_status(Status::CommandError);
        }

        let Some(conn) = self.conn.as_mut() else {
            return CommandResponse::with_status(Status::InitializationError);
        };

        let tx = match conn.transaction() {
            Ok(tx) => tx,
            Err(err) => {
                error!(%err, "failed to begin transaction");
                return CommandResponse::with_status(Status::TransactionError);
            }
        };

        let mut meta = self.meta.clone();
        let mut batch = Batch::default();

        for (position, command) in transaction.commands.iter().enumerate() {
            debug!(position, command_type = ?command.command_type, "dispatching command");
            let status = dispatch(&tx, &mut meta, &mut batch, command, transaction);
            if status != Status::Ok {
                warn!(position, command_type = ?command.command_type, %status, "rolling back transaction");
                if let Err(err) = tx.rollback() {
                    error!(%err, "rollback failed");
                }
                return CommandResponse::with_status(status);
            }
        }

        if let Err(err) = tx.commit() {
            error!(%err, "failed to commit transaction");
            return CommandResponse::with_status(Status::TransactionError);
        }

        let initialized = meta.is_initialized();
        self.meta = meta;
        if initialized && !self.state.is_initialized() {
            debug!(path = %self.config.location.display_path().display(), "database initialized");
            self.state = ConnectionState::Open { initialized: true };
            self.register_memory_pressure();
        }

        if batch.vacuum_requested {
            self.vacuum();
        }

        CommandResponse {
            status: Status::Ok,
            result: batch.result,
        }
    }

    /// Releases cached memory held by the connection.
    ///
    /// Flushes the prepared statement cache and asks SQLite to free what it
    /// can. Committed data is unaffected.
    pub fn on_memory_pressure(&mut self, level: MemoryPressureLevel) {
        self.sequence.check();
        let Some(conn) = &self.conn else {
            return;
        };
        debug!(?level, "trimming database memory");
        conn.flush_prepared_statement_cache();
        if let Err(err) = conn.execute_batch("PRAGMA shrink_memory") {
            warn!(%err, "failed to release database memory");
        }
    }

    /// Applies a memory-pressure signal recorded since the last call.
    ///
    /// Returns `true` if a trim was performed.
    pub fn service_memory_pressure(&mut self) -> bool {
        match self.pending_pressure.take() {
            Some(level) => {
                self.on_memory_pressure(level);
                true
            }
            None => false,
        }
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = match &self.config.location {
            DatabaseLocation::File(path) => {
                Connection::open(path).map_err(|source| SqliteError::OpenError {
                    path: path.clone(),
                    source,
                })?
            }
            DatabaseLocation::InMemory => Connection::open_in_memory()?,
        };
        self.install(conn)
    }

    fn install(&mut self, conn: Connection) -> Result<()> {
        conn.set_prepared_statement_cache_capacity(self.config.statement_cache_capacity);
        if let Some(timeout) = self.config.busy_timeout() {
            conn.busy_timeout(timeout)?;
        }
        if self.config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }
        debug!(path = %self.config.location.display_path().display(), "database opened");
        self.conn = Some(conn);
        self.state = ConnectionState::Open { initialized: false };
        Ok(())
    }

    fn close(&mut self) {
        self.listener = None;
        self.pending_pressure.take();
        self.meta.reset();
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                error!(%err, "error closing database");
            }
        }
        self.state = ConnectionState::Closed;
        debug!(path = %self.config.location.display_path().display(), "database closed");
    }

    /// Runs `wake` after every recorded memory-pressure signal.
    pub(crate) fn set_pressure_waker(&mut self, waker: PressureWaker) {
        self.waker = Some(waker);
        if self.listener.is_some() {
            self.register_memory_pressure();
        }
    }

    fn register_memory_pressure(&mut self) {
        if let Some(notifier) = &self.notifier {
            let pending = self.pending_pressure.clone();
            let waker = self.waker.clone();
            self.listener = Some(notifier.listen(move |level| {
                pending.record(level);
                if let Some(waker) = &waker {
                    waker.wake();
                }
            }));
        }
    }

    fn vacuum(&mut self) {
        let Some(conn) = &self.conn else {
            return;
        };
        if let Err(err) = conn.execute_batch("VACUUM") {
            // The batch already committed; vacuum is best effort.
            error!(%err, "error executing VACUUM");
        }
    }
}

/// Runs one command inside the open transaction and returns its status.
fn dispatch(
    conn: &Connection,
    meta: &mut MetaTable,
    batch: &mut Batch,
    command: &Command,
    transaction: &Transaction,
) -> Status {
    let requires_init = matches!(
        command.command_type,
        CommandType::Read | CommandType::Execute | CommandType::Run | CommandType::Migrate
    );
    if requires_init && !meta.is_initialized() {
        let err = SqliteError::NotInitialized;
        warn!(%err, command_type = ?command.command_type, "command sent before Initialize");
        return err.status();
    }

    match command.command_type {
        CommandType::Initialize => {
            match initialize(conn, meta, transaction.version, transaction.compatible_version) {
                Ok(version) => {
                    batch.result = Some(CommandResult::Value(Value::Int(version)));
                    Status::Ok
                }
                Err(err) => {
                    error!(%err, "initialize failed");
                    Status::InitializationError
                }
            }
        }
        CommandType::Read => {
            batch.result = Some(CommandResult::Records(read(conn, command)));
            Status::Ok
        }
        CommandType::Execute => match execute(conn, command) {
            Ok(changes) => {
                batch.result = Some(CommandResult::Value(count_value(changes)));
                Status::Ok
            }
            Err(err) => {
                error!(%err, sql = %command.text, "execute failed");
                Status::CommandError
            }
        },
        CommandType::Run => match run(conn, command) {
            Ok(changes) => {
                batch.result = Some(CommandResult::Value(count_value(changes)));
                Status::Ok
            }
            Err(err) => {
                error!(%err, sql = %command.text, "run failed");
                err.status()
            }
        },
        CommandType::Migrate => {
            let migrated = meta
                .set_version(conn, transaction.version)
                .and_then(|()| meta.set_compatible_version(conn, transaction.compatible_version));
            match migrated {
                Ok(()) => {
                    debug!(
                        version = transaction.version,
                        compatible_version = transaction.compatible_version,
                        "schema version updated"
                    );
                    Status::Ok
                }
                Err(err) => {
                    error!(%err, "migrate failed");
                    Status::CommandError
                }
            }
        }
        CommandType::Vacuum => {
            batch.vacuum_requested = true;
            Status::Ok
        }
        CommandType::Close => {
            error!("close must be sent as the only command of a transaction");
            Status::CommandError
        }
    }
}

/// Bootstraps the meta table on first use and returns the stored version.
fn initialize(
    conn: &Connection,
    meta: &mut MetaTable,
    version: i32,
    compatible_version: i32,
) -> Result<i32> {
    if !meta.is_initialized() {
        meta.init(conn, version, compatible_version)?;
    }
    meta.version(conn)
}

/// Collects every row of a query.
///
/// Preparation, binding and stepping errors end the read early; the rows
/// read so far are returned.
fn read(conn: &Connection, command: &Command) -> Vec<Record> {
    let mut records = Vec::new();

    let mut stmt = match conn.prepare_cached(&command.text) {
        Ok(stmt) => stmt,
        Err(err) => {
            warn!(%err, sql = %command.text, "read statement failed to prepare");
            return records;
        }
    };
    if let Err(err) = bind_all(&mut stmt, &command.bindings) {
        warn!(%err, sql = %command.text, "read statement failed to bind");
        return records;
    }

    let columns = stmt.column_count();
    let mut rows = stmt.raw_query();
    loop {
        match rows.next() {
            Ok(Some(row)) => match read_record(row, columns, &command.record_bindings) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(%err, sql = %command.text, "failed to read row");
                    break;
                }
            },
            Ok(None) => break,
            Err(err) => {
                warn!(%err, sql = %command.text, "read stopped early");
                break;
            }
        }
    }
    records
}

fn execute(conn: &Connection, command: &Command) -> Result<i64> {
    let before = total_changes(conn)?;
    conn.execute_batch(&command.text)?;
    Ok(total_changes(conn)? - before)
}

fn run(conn: &Connection, command: &Command) -> Result<i64> {
    let before = total_changes(conn)?;
    let mut stmt = conn.prepare_cached(&command.text)?;
    bind_all(&mut stmt, &command.bindings)?;
    stmt.raw_execute()?;
    Ok(total_changes(conn)? - before)
}

/// Rows changed on this connection since it opened.
///
/// Diffing this counter instead of reading the last-statement count keeps
/// DDL from reporting the count of an earlier insert.
fn total_changes(conn: &Connection) -> Result<i64> {
    let mut stmt = conn.prepare_cached("SELECT total_changes()")?;
    Ok(stmt.query_row([], |row| row.get(0))?)
}

fn count_value<T: TryInto<i32>>(count: T) -> Value {
    Value::Int(count.try_into().unwrap_or(i32::MAX))
}
