//! Read operation model
//!
//! A [`ReadOperation`] is either a SQL query or a table (or index) scan. The
//! storage service splits a read operation into [`Partition`]s, each carrying
//! an opaque token and the descriptor of the snapshot that issued it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::transaction::TransactionDescriptor;
use crate::types::{KeySet, Value};

/// SQL query with optional named parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuery {
    /// Query text
    pub sql: String,
    /// Named parameters (`@name` in the query text)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
}

/// Read of a table, optionally through a secondary index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScan {
    /// Table name
    pub table: String,
    /// Projected columns, in output order
    pub columns: Vec<String>,
    /// Secondary index to read through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Rows to read; all rows unless narrowed
    #[serde(default = "KeySet::all")]
    pub key_set: KeySet,
}

/// What to read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadOperation {
    /// Read by SQL query
    Query(SqlQuery),
    /// Read by table or index scan
    TableScan(TableScan),
}

impl ReadOperation {
    /// Query without parameters
    pub fn query(sql: impl Into<String>) -> Self {
        Self::Query(SqlQuery {
            sql: sql.into(),
            params: BTreeMap::new(),
        })
    }

    /// Query with named parameters
    pub fn query_with_params<I, K, V>(sql: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Query(SqlQuery {
            sql: sql.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Scan all rows of a table
    pub fn table<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::TableScan(TableScan {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            index: None,
            key_set: KeySet::all(),
        })
    }

    /// Read through a secondary index (table scans only)
    pub fn with_index(self, index: impl Into<String>) -> Self {
        match self {
            Self::TableScan(scan) => Self::TableScan(TableScan {
                index: Some(index.into()),
                ..scan
            }),
            other => other,
        }
    }

    /// Narrow the rows read (table scans only)
    pub fn with_key_set(self, key_set: KeySet) -> Self {
        match self {
            Self::TableScan(scan) => Self::TableScan(TableScan { key_set, ..scan }),
            other => other,
        }
    }

    /// Whether this is a query
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    /// Whether this is a table scan
    pub fn is_table(&self) -> bool {
        matches!(self, Self::TableScan(_))
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            Self::Query(q) => format!("query `{}`", q.sql),
            Self::TableScan(s) => match &s.index {
                Some(index) => format!("table `{}` via index `{}`", s.table, index),
                None => format!("table `{}`", s.table),
            },
        }
    }
}

/// Opaque partition token issued by the storage service
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionToken(#[serde(with = "token_base64")] Vec<u8>);

impl PartitionToken {
    /// Wrap raw token bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw token bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PartitionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionToken({})", STANDARD.encode(&self.0))
    }
}

mod token_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Independently executable slice of a read operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Token understood by the issuing snapshot
    pub token: PartitionToken,
    /// Read operation the partition was generated from
    pub read_operation: ReadOperation,
    /// Snapshot that issued the partition
    pub snapshot: TransactionDescriptor,
}

/// Hints passed to partition generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartitionOptions {
    /// Desired data size per partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_size_bytes: Option<u64>,
    /// Desired maximum number of partitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_partitions: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_scan_defaults_to_all_rows() {
        let op = ReadOperation::table("users", ["Key", "Value"]);
        assert!(op.is_table());
        match op {
            ReadOperation::TableScan(scan) => {
                assert_eq!(scan.columns, vec!["Key", "Value"]);
                assert!(scan.key_set.all);
                assert!(scan.index.is_none());
            }
            _ => panic!("expected table scan"),
        }
    }

    #[test]
    fn test_with_index_only_applies_to_tables() {
        let op = ReadOperation::query("SELECT 1").with_index("idx");
        assert_eq!(op, ReadOperation::query("SELECT 1"));

        let op = ReadOperation::table("users", ["Key"]).with_index("users_by_key");
        assert_eq!(op.describe(), "table `users` via index `users_by_key`");
    }

    #[test]
    fn test_query_params() {
        let op = ReadOperation::query_with_params(
            "SELECT * FROM users WHERE Key = @key",
            [("key", 1_i64)],
        );
        match op {
            ReadOperation::Query(q) => assert_eq!(q.params.get("key"), Some(&Value::Int64(1))),
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_operation_json_shape() {
        let json = serde_json::to_value(ReadOperation::query("SELECT 1")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "query", "sql": "SELECT 1"}));
    }

    #[test]
    fn test_partition_token_serializes_as_base64() {
        let token = PartitionToken::new(b"p-1".to_vec());
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"cC0x\"");
        assert_eq!(serde_json::from_str::<PartitionToken>(&json).unwrap(), token);
    }
}
