//! Column value representation shared by export and import

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::metadata::ColumnType;

/// A cell could not be converted to its column type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{value}' is not a valid {expected}")]
pub struct ValueError {
    pub value: String,
    pub expected: &'static str,
}

/// A typed column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Null/empty value
    Null,
    /// Plain text
    Text(String),
    /// Whole number
    Int(i64),
    /// Floating point
    Float(f64),
    Bool(bool),
    /// Date and time, always UTC
    DateTime(DateTime<Utc>),
    /// Unique identifier
    Uuid(Uuid),
    /// Serialized JSON document
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parse an archive cell for the given column type
    ///
    /// An empty cell is NULL for every type.
    pub fn parse(cell: &str, column_type: ColumnType) -> Result<Self, ValueError> {
        if cell.is_empty() {
            return Ok(Value::Null);
        }

        let invalid = |expected: &'static str| ValueError {
            value: cell.to_string(),
            expected,
        };

        match column_type {
            ColumnType::Text => Ok(Value::Text(cell.to_string())),
            ColumnType::Integer => cell
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| invalid("integer")),
            ColumnType::Real => cell
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| invalid("number")),
            ColumnType::Boolean => parse_bool(cell.trim())
                .map(Value::Bool)
                .ok_or_else(|| invalid("boolean")),
            ColumnType::DateTime => parse_datetime(cell.trim())
                .map(Value::DateTime)
                .ok_or_else(|| invalid("timestamp")),
            ColumnType::Uuid => Uuid::parse_str(cell.trim())
                .map(Value::Uuid)
                .map_err(|_| invalid("uuid")),
            ColumnType::Json => serde_json::from_str(cell)
                .map(Value::Json)
                .map_err(|_| invalid("JSON document")),
        }
    }

    /// Render as an archive cell (None for NULL)
    pub fn to_cell(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::DateTime(dt) => Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Uuid(g) => Some(g.to_string()),
            Value::Json(j) => Some(j.to_string()),
        }
    }

    /// Normalize a stored text value for export
    ///
    /// Booleans become `true`/`false` and timestamps RFC 3339; anything that
    /// does not parse is passed through untouched.
    pub fn normalize_cell(raw: &str, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Boolean | ColumnType::DateTime => Value::parse(raw, column_type)
                .ok()
                .and_then(|v| v.to_cell())
                .unwrap_or_else(|| raw.to_string()),
            _ => raw.to_string(),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Accepts RFC 3339, SQLite's `YYYY-MM-DD HH:MM:SS[.fff]`, a bare date, or
/// epoch milliseconds
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if s.len() >= 10 && s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis);
    }
    None
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_cell() {
            Some(cell) => write!(f, "{}", cell),
            None => write!(f, "(null)"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cell_is_null() {
        for column_type in [ColumnType::Text, ColumnType::Integer, ColumnType::Uuid] {
            assert_eq!(Value::parse("", column_type).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_parse_booleans() {
        assert_eq!(Value::parse("1", ColumnType::Boolean).unwrap(), Value::Bool(true));
        assert_eq!(Value::parse("FALSE", ColumnType::Boolean).unwrap(), Value::Bool(false));
        assert!(Value::parse("maybe", ColumnType::Boolean).is_err());
    }

    #[test]
    fn test_parse_timestamps() {
        let expected = Value::DateTime(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap()
                .and_utc(),
        );

        assert_eq!(Value::parse("2024-03-01T12:30:00Z", ColumnType::DateTime).unwrap(), expected);
        assert_eq!(Value::parse("2024-03-01 12:30:00", ColumnType::DateTime).unwrap(), expected);
        assert_eq!(Value::parse("1709296200000", ColumnType::DateTime).unwrap(), expected);
    }

    #[test]
    fn test_invalid_value_reports_type() {
        let err = Value::parse("abc", ColumnType::Integer).unwrap_err();
        assert_eq!(err.to_string(), "'abc' is not a valid integer");
    }

    #[test]
    fn test_normalize_cell() {
        assert_eq!(Value::normalize_cell("0", ColumnType::Boolean), "false");
        assert_eq!(
            Value::normalize_cell("2024-03-01 12:30:00", ColumnType::DateTime),
            "2024-03-01T12:30:00.000Z"
        );
        assert_eq!(Value::normalize_cell("garbage", ColumnType::DateTime), "garbage");
        assert_eq!(Value::normalize_cell("Hello", ColumnType::Text), "Hello");
    }
}
