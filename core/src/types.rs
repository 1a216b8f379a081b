//! Command and value type definitions.
//!
//! This module defines the data model exchanged between a caller and the
//! command executor: scalar [`Value`]s and positional [`Binding`]s going in,
//! [`Record`]s and a single [`CommandResponse`] coming out. The types are
//! designed for serialization with [`serde`] so batches can be queued or
//! shipped as JSON/YAML messages.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A scalar database value.
///
/// Exactly one tag is active at a time. Equality and hashing are defined per
/// tag; [`Value::Double`] compares by bit pattern, so `NaN == NaN` and
/// `0.0 != -0.0`. This keeps `Eq` and `Hash` lawful.
///
/// # Examples
///
/// ```
/// use dbcommand_core::Value;
///
/// let v = Value::from(42i64);
/// assert_eq!(v.as_i64(), Some(42));
/// assert_ne!(Value::Int(42), Value::Int64(42));
/// assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum Value {
    /// UTF-8 text.
    String(String),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Double precision float.
    Double(f64),
    /// Boolean, stored by SQLite as integer 0/1.
    Bool(bool),
    /// SQL `NULL` (the default).
    #[default]
    Null,
}

impl Value {
    /// Returns the string payload, if this is a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the payload of a [`Value::Int`].
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload of a [`Value::Int64`].
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload of a [`Value::Double`].
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload of a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the active tag, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Int64(_) => "int64",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::Null => "null",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Null, Self::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::String(s) => s.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Bool(v) => v.hash(state),
            Self::Null => {}
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A positional parameter binding.
///
/// `index` is the zero-based parameter slot of the prepared statement. An
/// index at or beyond the statement's parameter count is rejected when the
/// command runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    /// Zero-based parameter slot.
    pub index: usize,
    /// Value bound to the slot.
    pub value: Value,
}

impl Binding {
    pub fn new(index: usize, value: impl Into<Value>) -> Self {
        Self {
            index,
            value: value.into(),
        }
    }
}

/// Kind of a [`Command`], selecting its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    /// Open the meta table and report the stored schema version.
    Initialize,
    /// Run a query and collect its rows.
    Read,
    /// Run raw SQL without parameters.
    Execute,
    /// Run a single parameterized statement.
    Run,
    /// Store the transaction's version numbers in the meta table.
    Migrate,
    /// Reclaim storage after the batch commits.
    Vacuum,
    /// Close the connection. Must be the only command in its batch.
    Close,
}

impl CommandType {
    /// Whether commands of this type require non-blank SQL text.
    pub fn requires_text(self) -> bool {
        matches!(self, Self::Read | Self::Execute | Self::Run)
    }
}

/// Legacy explicit column typing for [`CommandType::Read`].
///
/// When a command carries record bindings, column `i` of each row is read
/// with the accessor for the `i`-th declared type instead of the column's
/// runtime storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordBindingType {
    String,
    Int,
    Int64,
    Double,
    Bool,
}

/// A single database operation.
///
/// Use the constructors ([`read`](Command::read), [`run`](Command::run), ...)
/// and chain [`bind`](Command::bind) for parameters.
///
/// # Examples
///
/// ```
/// use dbcommand_core::{Command, CommandType, Value};
///
/// let cmd = Command::run("INSERT INTO t VALUES (?, ?)")
///     .bind(0, 1i64)
///     .bind(1, "a");
/// assert_eq!(cmd.command_type, CommandType::Run);
/// assert_eq!(cmd.bindings[1].value, Value::String("a".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Handler selector.
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// SQL text. Required for Read, Execute and Run; ignored otherwise.
    #[serde(default)]
    pub text: String,
    /// Positional parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
    /// Deprecated explicit column types for Read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub record_bindings: Vec<RecordBindingType>,
}

impl Command {
    /// Creates a command of the given type with the given SQL text.
    pub fn new(command_type: CommandType, text: impl Into<String>) -> Self {
        Self {
            command_type,
            text: text.into(),
            bindings: Vec::new(),
            record_bindings: Vec::new(),
        }
    }

    pub fn initialize() -> Self {
        Self::new(CommandType::Initialize, "")
    }

    pub fn read(sql: impl Into<String>) -> Self {
        Self::new(CommandType::Read, sql)
    }

    pub fn execute(sql: impl Into<String>) -> Self {
        Self::new(CommandType::Execute, sql)
    }

    pub fn run(sql: impl Into<String>) -> Self {
        Self::new(CommandType::Run, sql)
    }

    pub fn migrate() -> Self {
        Self::new(CommandType::Migrate, "")
    }

    pub fn vacuum() -> Self {
        Self::new(CommandType::Vacuum, "")
    }

    pub fn close() -> Self {
        Self::new(CommandType::Close, "")
    }

    /// Adds a binding for the zero-based parameter `index`.
    pub fn bind(mut self, index: usize, value: impl Into<Value>) -> Self {
        self.bindings.push(Binding::new(index, value));
        self
    }

    /// Sets legacy explicit column types for a Read.
    pub fn with_record_bindings(mut self, types: impl IntoIterator<Item = RecordBindingType>) -> Self {
        self.record_bindings = types.into_iter().collect();
        self
    }
}

/// A batch of commands executed atomically.
///
/// `version` and `compatible_version` are the schema versions the caller is
/// targeting; Initialize seeds them into a fresh database and Migrate
/// persists them.
///
/// # Examples
///
/// ```
/// use dbcommand_core::{Command, Transaction};
///
/// let tx = Transaction::new(2, 1)
///     .with_command(Command::initialize())
///     .with_command(Command::execute("CREATE TABLE t (id INTEGER)"))
///     .with_command(Command::migrate());
/// assert_eq!(tx.commands.len(), 3);
/// assert!(!tx.is_close());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transaction {
    /// Commands in execution order.
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Target schema version.
    #[serde(default)]
    pub version: i32,
    /// Oldest schema version the target is compatible with.
    #[serde(default)]
    pub compatible_version: i32,
}

impl Transaction {
    pub fn new(version: i32, compatible_version: i32) -> Self {
        Self {
            commands: Vec::new(),
            version,
            compatible_version,
        }
    }

    /// Appends a command to the batch.
    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Returns `true` if this batch is exactly one Close command.
    pub fn is_close(&self) -> bool {
        matches!(self.commands.as_slice(), [c] if c.command_type == CommandType::Close)
    }
}

/// One result row, fields in statement column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Record {
    pub fields: Vec<Value>,
}

impl Record {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: usize) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Vec<Value>> for Record {
    fn from(fields: Vec<Value>) -> Self {
        Self { fields }
    }
}

/// Result payload of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandResult {
    /// Rows produced by a Read.
    Records(Vec<Record>),
    /// Scalar produced by Initialize (schema version) or Execute/Run
    /// (changed row count).
    Value(Value),
}

/// Outcome of a transaction.
///
/// This is the exhaustive set of statuses a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Status {
    /// Every command succeeded and the batch committed.
    #[default]
    Ok,
    /// The database could not be opened, or was used before Initialize.
    InitializationError,
    /// Beginning or committing the transaction failed.
    TransactionError,
    /// A command failed; the whole batch was rolled back.
    CommandError,
    /// The request was malformed or no response target exists.
    ResponseError,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::InitializationError => "initialization error",
            Self::TransactionError => "transaction error",
            Self::CommandError => "command error",
            Self::ResponseError => "response error",
        };
        f.write_str(s)
    }
}

/// The single response produced for a [`Transaction`].
///
/// `result` holds the payload of the last command that produced one. It is
/// always `None` when `status` is not [`Status::Ok`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
}

impl CommandResponse {
    /// A successful response without a result.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A response with the given status and no result.
    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            result: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Rows of a Read result, if that is what the response carries.
    pub fn records(&self) -> Option<&[Record]> {
        match &self.result {
            Some(CommandResult::Records(records)) => Some(records),
            _ => None,
        }
    }

    /// Scalar of an Initialize/Execute/Run result.
    pub fn value(&self) -> Option<&Value> {
        match &self.result {
            Some(CommandResult::Value(value)) => Some(value),
            _ => None,
        }
    }
}
