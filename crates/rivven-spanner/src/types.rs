//! Value types for rivven-spanner
//!
//! Cell values follow the storage service's type system:
//! - Scalars (BOOL, INT64, FLOAT64, NUMERIC, STRING, BYTES)
//! - Temporal types (DATE, TIMESTAMP)
//! - JSON and ARRAY
//!
//! Values are converted to protobuf `Value`s using the service's encoding
//! rules; the encoded size of those values drives batch sizing.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use prost_types::value::Kind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::proto;

/// Cell value that can hold any column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// BOOL
    Bool(bool),
    /// INT64
    Int64(i64),
    /// FLOAT64
    Float64(f64),
    /// NUMERIC
    Numeric(Decimal),
    /// STRING
    String(String),
    /// BYTES
    Bytes(Vec<u8>),
    /// DATE
    Date(NaiveDate),
    /// TIMESTAMP (always UTC)
    Timestamp(DateTime<Utc>),
    /// JSON
    Json(serde_json::Value),
    /// ARRAY<T>
    Array(Vec<Value>),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the column type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOL",
            Self::Int64(_) => "INT64",
            Self::Float64(_) => "FLOAT64",
            Self::Numeric(_) => "NUMERIC",
            Self::String(_) => "STRING",
            Self::Bytes(_) => "BYTES",
            Self::Date(_) => "DATE",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Json(_) => "JSON",
            Self::Array(_) => "ARRAY",
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(n) => Some(*n),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(n) => Some(*n as f64),
            Self::Float64(n) => Some(*n),
            Self::Numeric(d) => d.to_string().parse().ok(),
            _ => None,
        }
    }

    /// Try to borrow as str
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Encode as a protobuf `Value` the way the service expects it on the wire.
    ///
    /// INT64, NUMERIC, DATE, TIMESTAMP and JSON travel as strings, BYTES as
    /// base64 strings and non-finite floats as their textual names.
    pub fn to_proto(&self) -> prost_types::Value {
        let kind = match self {
            Self::Null => Kind::NullValue(0),
            Self::Bool(b) => Kind::BoolValue(*b),
            Self::Int64(n) => Kind::StringValue(n.to_string()),
            Self::Float64(f) if f.is_nan() => Kind::StringValue("NaN".into()),
            Self::Float64(f) if f.is_infinite() => {
                let name = if f.is_sign_positive() {
                    "Infinity"
                } else {
                    "-Infinity"
                };
                Kind::StringValue(name.into())
            }
            Self::Float64(f) => Kind::NumberValue(*f),
            Self::Numeric(d) => Kind::StringValue(d.to_string()),
            Self::String(s) => Kind::StringValue(s.clone()),
            Self::Bytes(b) => Kind::StringValue(STANDARD.encode(b)),
            Self::Date(d) => Kind::StringValue(d.format("%Y-%m-%d").to_string()),
            Self::Timestamp(ts) => {
                Kind::StringValue(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Json(j) => Kind::StringValue(j.to_string()),
            Self::Array(items) => Kind::ListValue(prost_types::ListValue {
                values: items.iter().map(Value::to_proto).collect(),
            }),
        };
        prost_types::Value { kind: Some(kind) }
    }
}

/// Encode a row of values as a protobuf `ListValue`
pub(crate) fn list_value(values: &[Value]) -> prost_types::ListValue {
    prost_types::ListValue {
        values: values.iter().map(Value::to_proto).collect(),
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Numeric(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Result row as ordered column values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Column names
    columns: Vec<String>,
    /// Column values (same order as columns)
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Convert row to HashMap
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

/// One end of a key range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyBound {
    /// Key is included in the range
    Closed(Vec<Value>),
    /// Key is excluded from the range
    Open(Vec<Value>),
}

/// Contiguous range of primary keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    /// Start of the range
    pub start: KeyBound,
    /// End of the range
    pub end: KeyBound,
}

impl KeyRange {
    /// Range including both end points
    pub fn closed(start: Vec<Value>, end: Vec<Value>) -> Self {
        Self {
            start: KeyBound::Closed(start),
            end: KeyBound::Closed(end),
        }
    }

    /// Range including the start and excluding the end
    pub fn closed_open(start: Vec<Value>, end: Vec<Value>) -> Self {
        Self {
            start: KeyBound::Closed(start),
            end: KeyBound::Open(end),
        }
    }

    fn to_proto(&self) -> proto::KeyRange {
        let start_key_type = Some(match &self.start {
            KeyBound::Closed(k) => proto::StartKeyType::StartClosed(list_value(k)),
            KeyBound::Open(k) => proto::StartKeyType::StartOpen(list_value(k)),
        });
        let end_key_type = Some(match &self.end {
            KeyBound::Closed(k) => proto::EndKeyType::EndClosed(list_value(k)),
            KeyBound::Open(k) => proto::EndKeyType::EndOpen(list_value(k)),
        });
        proto::KeyRange {
            start_key_type,
            end_key_type,
        }
    }
}

/// Set of rows addressed by primary key
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeySet {
    /// Explicit keys, each a full or prefix primary key
    pub keys: Vec<Vec<Value>>,
    /// Key ranges
    pub ranges: Vec<KeyRange>,
    /// Every row in the table (or index); overrides keys and ranges
    pub all: bool,
}

impl KeySet {
    /// All rows
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    /// Explicit keys
    pub fn keys(keys: Vec<Vec<Value>>) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }

    /// A single key range
    pub fn range(range: KeyRange) -> Self {
        Self {
            ranges: vec![range],
            ..Default::default()
        }
    }

    /// Add a key range
    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.ranges.push(range);
        self
    }

    /// Whether the key set addresses nothing
    pub fn is_empty(&self) -> bool {
        !self.all && self.keys.is_empty() && self.ranges.is_empty()
    }

    /// Encode for the wire
    pub fn to_proto(&self) -> proto::KeySet {
        proto::KeySet {
            keys: self.keys.iter().map(|k| list_value(k)).collect(),
            ranges: self.ranges.iter().map(KeyRange::to_proto).collect(),
            all: self.all,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_value_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int64(0).is_null());
    }

    #[test]
    fn test_value_from_impl() {
        let v: Value = 42_i32.into();
        assert!(matches!(v, Value::Int64(42)));

        let v: Value = "hello".into();
        assert!(matches!(v, Value::String(s) if s == "hello"));

        let v: Value = None::<i64>.into();
        assert!(v.is_null());
    }

    #[test]
    fn test_int64_encodes_as_string() {
        let encoded = Value::Int64(1234).to_proto();
        assert_eq!(encoded.kind, Some(Kind::StringValue("1234".into())));
        assert_eq!(encoded.encoded_len(), 6);
    }

    #[test]
    fn test_special_floats_encode_as_names() {
        assert_eq!(
            Value::Float64(f64::NAN).to_proto().kind,
            Some(Kind::StringValue("NaN".into()))
        );
        assert_eq!(
            Value::Float64(f64::NEG_INFINITY).to_proto().kind,
            Some(Kind::StringValue("-Infinity".into()))
        );
        assert_eq!(
            Value::Float64(1.5).to_proto().kind,
            Some(Kind::NumberValue(1.5))
        );
    }

    #[test]
    fn test_bytes_and_dates_encoding() {
        assert_eq!(
            Value::Bytes(b"hi".to_vec()).to_proto().kind,
            Some(Kind::StringValue("aGk=".into()))
        );

        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            Value::Date(date).to_proto().kind,
            Some(Kind::StringValue("2024-01-31".into()))
        );

        let ts = date.and_hms_opt(12, 0, 0).unwrap().and_utc();
        assert_eq!(
            Value::Timestamp(ts).to_proto().kind,
            Some(Kind::StringValue("2024-01-31T12:00:00Z".into()))
        );
    }

    #[test]
    fn test_row_operations() {
        let row = Row::new(
            vec!["Key".into(), "Value".into()],
            vec![Value::Int64(1), Value::String("Alice".into())],
        );

        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int64(1)));
        assert_eq!(
            row.get_by_name("value"),
            Some(&Value::String("Alice".into()))
        );
    }

    #[test]
    fn test_key_set() {
        assert!(KeySet::default().is_empty());
        assert!(!KeySet::all().is_empty());

        let ks = KeySet::keys(vec![vec![Value::Int64(1233)], vec![Value::Int64(1234)]])
            .with_range(KeyRange::closed_open(
                vec![Value::Int64(1)],
                vec![Value::Int64(10)],
            ));
        let encoded = ks.to_proto();
        assert_eq!(encoded.keys.len(), 2);
        assert_eq!(encoded.ranges.len(), 1);
        assert!(!encoded.all);
    }
}
