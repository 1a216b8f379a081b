//! Conversion of result rows into [`Record`]s.
//!
//! Two modes, selected by the command's record bindings:
//!
//! - **Explicit** (non-empty bindings, legacy): column `i` is read with the
//!   accessor for the `i`-th declared [`RecordBindingType`]. Storage classes
//!   are coerced the way SQLite's typed column accessors coerce them, and a
//!   declared column past the end of the row reads as that type's default.
//! - **Inferred** (empty bindings): every column is read according to its
//!   runtime storage class.

use dbcommand_core::{Record, RecordBindingType, Value};
use rusqlite::Row;
use rusqlite::types::ValueRef;

use crate::error::Result;

/// Builds one record from the current row.
pub(crate) fn read_record(
    row: &Row<'_>,
    column_count: usize,
    bindings: &[RecordBindingType],
) -> Result<Record> {
    if !bindings.is_empty() {
        let mut fields = Vec::with_capacity(bindings.len());
        for (column, binding) in bindings.iter().enumerate() {
            let value = if column < column_count {
                row.get_ref(column)?
            } else {
                ValueRef::Null
            };
            fields.push(coerce(value, *binding));
        }
        return Ok(Record::new(fields));
    }

    let mut fields = Vec::with_capacity(column_count);
    for column in 0..column_count {
        fields.push(infer(row.get_ref(column)?));
    }
    Ok(Record::new(fields))
}

fn infer(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Integer(v) => Value::Int64(v),
        ValueRef::Real(v) => Value::Double(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Null => Value::Null,
    }
}

fn coerce(value: ValueRef<'_>, binding: RecordBindingType) -> Value {
    match binding {
        RecordBindingType::String => Value::String(column_text(value)),
        // SQLite's 32-bit accessor keeps the low 32 bits of the 64-bit value.
        RecordBindingType::Int => Value::Int(column_int64(value) as i32),
        RecordBindingType::Int64 => Value::Int64(column_int64(value)),
        RecordBindingType::Double => Value::Double(column_double(value)),
        RecordBindingType::Bool => Value::Bool(column_int64(value) != 0),
    }
}

fn column_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(v) => v.to_string(),
        ValueRef::Real(v) => format_real(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn column_int64(value: ValueRef<'_>) -> i64 {
    match value {
        ValueRef::Null => 0,
        ValueRef::Integer(v) => v,
        ValueRef::Real(v) => v as i64,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => leading_integer(bytes),
    }
}

fn column_double(value: ValueRef<'_>) -> f64 {
    match value {
        ValueRef::Null => 0.0,
        ValueRef::Integer(v) => v as f64,
        ValueRef::Real(v) => v,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => leading_number(bytes),
    }
}

/// Parses a leading decimal integer the way `sqlite3Atoi64` does: optional
/// whitespace and sign, then digits up to the first non-digit. Out-of-range
/// values saturate.
fn leading_integer(bytes: &[u8]) -> i64 {
    let mut rest = bytes.trim_ascii_start();
    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    let mut magnitude: u64 = 0;
    let mut overflow = false;
    for digit in rest.iter().take_while(|b| b.is_ascii_digit()) {
        match magnitude
            .checked_mul(10)
            .and_then(|m| m.checked_add(u64::from(digit - b'0')))
        {
            Some(m) => magnitude = m,
            None => {
                overflow = true;
                break;
            }
        }
    }

    if negative {
        if overflow || magnitude > i64::MIN.unsigned_abs() {
            i64::MIN
        } else {
            0i64.wrapping_sub_unsigned(magnitude)
        }
    } else if overflow || magnitude > i64::MAX as u64 {
        i64::MAX
    } else {
        magnitude as i64
    }
}

/// Renders a REAL the way SQLite converts it to text (`%!.15g`): 15
/// significant digits, trailing zeros dropped, and at least one digit after
/// the decimal point.
fn format_real(v: f64) -> String {
    if v.is_infinite() {
        return if v > 0.0 { "Inf".into() } else { "-Inf".into() };
    }
    if v == 0.0 {
        return "0.0".into();
    }

    let scientific = format!("{v:.14e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..15).contains(&exponent) {
        let decimals = usize::try_from(14 - exponent).unwrap_or(0);
        trim_fraction(&format!("{v:.decimals$}"))
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exponent.unsigned_abs())
    }
}

fn trim_fraction(digits: &str) -> String {
    match digits.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            let fraction = if fraction.is_empty() { "0" } else { fraction };
            format!("{whole}.{fraction}")
        }
        None => format!("{digits}.0"),
    }
}

/// Parses the longest numeric prefix of `bytes`, or 0 if there is none.
fn leading_number(bytes: &[u8]) -> f64 {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start();
    let mut end = 0;
    let mut best = 0.0;
    for (i, c) in text.char_indices() {
        if !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')) {
            break;
        }
        end = i + c.len_utf8();
        if let Ok(parsed) = text[..end].parse::<f64>() {
            best = parsed;
        }
    }
    if end == 0 { 0.0 } else { best }
}
