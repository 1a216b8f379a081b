//! Positional parameter binding.
//!
//! Applies [`Binding`]s to a prepared statement by tag. There is no implicit
//! coercion between tags: each [`Value`] variant maps to exactly one SQLite
//! bind call.

use dbcommand_core::{Binding, Value};
use rusqlite::Statement;

use crate::error::{Result, SqliteError};

/// Binds every binding to its zero-based slot on `stmt`.
///
/// # Errors
///
/// Returns [`SqliteError::BindingOutOfRange`] if a binding targets a slot at
/// or beyond the statement's parameter count, or
/// [`SqliteError::DatabaseError`] if SQLite rejects the bind.
pub(crate) fn bind_all(stmt: &mut Statement<'_>, bindings: &[Binding]) -> Result<()> {
    let count = stmt.parameter_count();
    for binding in bindings {
        if binding.index >= count {
            return Err(SqliteError::BindingOutOfRange {
                index: binding.index,
                count,
            });
        }
        bind_value(stmt, binding.index + 1, &binding.value)?;
    }
    Ok(())
}

fn bind_value(stmt: &mut Statement<'_>, slot: usize, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => stmt.raw_bind_parameter(slot, s.as_str())?,
        Value::Int(v) => stmt.raw_bind_parameter(slot, *v)?,
        Value::Int64(v) => stmt.raw_bind_parameter(slot, *v)?,
        Value::Double(v) => stmt.raw_bind_parameter(slot, *v)?,
        Value::Bool(v) => stmt.raw_bind_parameter(slot, i32::from(*v))?,
        Value::Null => stmt.raw_bind_parameter(slot, rusqlite::types::Null)?,
    }
    Ok(())
}
