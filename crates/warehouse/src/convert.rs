//! Typed decoding of warehouse cells into JSON values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};

use crate::result::{RawRow, RawValue};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// A complex-typed column held text that is not valid JSON.
    #[error("column '{column}' ({type_name}) holds malformed JSON: {source}")]
    MalformedJson {
        column: String,
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Broad family of a warehouse type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Integer,
    Float,
    Boolean,
    /// struct, map, array, json and variant columns arrive as JSON text.
    Complex,
    Text,
}

impl CellKind {
    /// Classify a type name such as `BIGINT`, `decimal(10,2)` or `ARRAY<STRING>`.
    pub fn of(type_name: &str) -> Self {
        let lower = type_name.trim().to_ascii_lowercase();
        let base = lower
            .split(|c| c == '(' || c == '<')
            .next()
            .unwrap_or("")
            .trim();
        match base {
            "bigint" | "int" | "integer" | "smallint" | "tinyint" | "long" | "short" | "byte" => {
                CellKind::Integer
            }
            "double" | "float" | "decimal" | "real" => CellKind::Float,
            "boolean" | "bool" => CellKind::Boolean,
            "struct" | "map" | "array" | "json" | "variant" => CellKind::Complex,
            _ => CellKind::Text,
        }
    }
}

/// Decode one cell.
///
/// NULL becomes JSON null. Numeric and boolean cells that do not parse fall
/// back to text; complex cells that do not parse are an error.
pub fn decode_cell(column: &str, value: &RawValue) -> Result<Value, ConvertError> {
    let Some(text) = value.text.as_deref() else {
        return Ok(Value::Null);
    };
    let decoded = match CellKind::of(&value.type_name) {
        CellKind::Integer => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        CellKind::Float => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        CellKind::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        },
        CellKind::Complex => {
            serde_json::from_str(text).map_err(|source| ConvertError::MalformedJson {
                column: column.to_string(),
                type_name: value.type_name.clone(),
                source,
            })?
        }
        CellKind::Text => Value::String(text.to_string()),
    };
    Ok(decoded)
}

/// Decode a whole row into a JSON object keyed by column name.
pub fn decode_row(row: &RawRow) -> Result<Map<String, Value>, ConvertError> {
    let mut object = Map::with_capacity(row.len());
    for (column, value) in row.iter() {
        object.insert(column.clone(), decode_cell(column, value)?);
    }
    Ok(object)
}

/// Parse a timestamp string into a `DateTime<Utc>`.
///
/// Tries RFC3339, then `YYYY-MM-DD HH:MM:SS[.fff]`, then a bare date
/// (midnight UTC). Returns `None` if all formats fail.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }

    if let Ok(nd) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(nd.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}
