//! Database value model
//!
//! `DatabaseValue` is the tagged union used for statement parameters and row
//! values; `KeyValue` is the hashable restriction of it used for primary-key
//! tuples and the identity map.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Create a DatabaseValue from a JSON value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        DatabaseValue::Int32(i as i32)
                    } else {
                        DatabaseValue::Int64(i)
                    }
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => DatabaseValue::String(s),
            JsonValue::Array(_) | JsonValue::Object(_) => DatabaseValue::Json(json),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<Uuid> for DatabaseValue {
    fn from(value: Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<NaiveDate> for DatabaseValue {
    fn from(value: NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

impl From<KeyValue> for DatabaseValue {
    fn from(value: KeyValue) -> Self {
        match value {
            KeyValue::Int(i) => DatabaseValue::Int64(i),
            KeyValue::Uuid(u) => DatabaseValue::Uuid(u),
            KeyValue::String(s) => DatabaseValue::String(s),
        }
    }
}

/// A primary key value. The restriction of `DatabaseValue` to types that can
/// serve as durable identities (hashable, totally ordered).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyValue {
    /// Integer primary key (covers int, bigint, smallint)
    Int(i64),
    /// UUID primary key
    Uuid(Uuid),
    /// String primary key
    String(String),
}

impl KeyValue {
    /// Restrict a database value to a key value. Returns `None` for values
    /// that cannot identify a row (null, float, json, bytes).
    pub fn from_database_value(value: &DatabaseValue) -> Option<KeyValue> {
        match value {
            DatabaseValue::Int32(i) => Some(KeyValue::Int(*i as i64)),
            DatabaseValue::Int64(i) => Some(KeyValue::Int(*i)),
            DatabaseValue::Uuid(u) => Some(KeyValue::Uuid(*u)),
            DatabaseValue::String(s) => Some(KeyValue::String(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(v as i64)
    }
}

impl From<Uuid> for KeyValue {
    fn from(v: Uuid) -> Self {
        KeyValue::Uuid(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::String(v.to_string())
    }
}

/// A full primary-key tuple, in key-column order
pub type KeyTuple = Vec<KeyValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let value = DatabaseValue::Int64(42);
        assert_eq!(
            DatabaseValue::from_json(value.to_json()),
            DatabaseValue::Int32(42)
        );

        let value = DatabaseValue::String("hello".to_string());
        assert_eq!(DatabaseValue::from_json(value.to_json()), value);
    }

    #[test]
    fn test_key_value_restriction() {
        assert_eq!(
            KeyValue::from_database_value(&DatabaseValue::Int32(5)),
            Some(KeyValue::Int(5))
        );
        assert_eq!(KeyValue::from_database_value(&DatabaseValue::Null), None);
        assert_eq!(
            KeyValue::from_database_value(&DatabaseValue::Float64(1.5)),
            None
        );
    }

    #[test]
    fn test_option_into_null() {
        let v: DatabaseValue = Option::<i64>::None.into();
        assert!(v.is_null());
    }
}
