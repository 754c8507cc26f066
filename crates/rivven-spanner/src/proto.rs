//! Wire messages for mutations
//!
//! Hand-written mirrors of the service's `Mutation` protobuf. Tag numbers
//! must match the service definition exactly: the encoded length of these
//! messages is the byte size the batching engine accounts for, and the
//! messages themselves are what a commit sends.

/// A single write: exactly one operation is set.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Mutation {
    /// The operation carried by this mutation.
    #[prost(oneof = "Operation", tags = "1, 2, 3, 4, 5")]
    pub operation: Option<Operation>,
}

/// Mutation operation (protobuf `oneof`).
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Operation {
    /// Insert new rows; fails if any row already exists.
    #[prost(message, tag = "1")]
    Insert(Write),
    /// Update existing rows; fails if any row does not exist.
    #[prost(message, tag = "2")]
    Update(Write),
    /// Insert or update rows.
    #[prost(message, tag = "3")]
    InsertOrUpdate(Write),
    /// Replace whole rows, clearing unspecified columns.
    #[prost(message, tag = "4")]
    Replace(Write),
    /// Delete the rows addressed by a key set.
    #[prost(message, tag = "5")]
    Delete(Delete),
}

/// Row-carrying payload of insert/update/insert_or_update/replace.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Write {
    /// Target table.
    #[prost(string, tag = "1")]
    pub table: String,
    /// Column names, in the order values are given.
    #[prost(string, repeated, tag = "2")]
    pub columns: Vec<String>,
    /// One list per row, aligned with `columns`.
    #[prost(message, repeated, tag = "3")]
    pub values: Vec<prost_types::ListValue>,
}

/// Payload of a delete.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Delete {
    /// Target table.
    #[prost(string, tag = "1")]
    pub table: String,
    /// Rows to delete.
    #[prost(message, optional, tag = "2")]
    pub key_set: Option<KeySet>,
}

/// Keys, key ranges or all rows.
#[derive(Clone, PartialEq, prost::Message)]
pub struct KeySet {
    /// Explicit keys.
    #[prost(message, repeated, tag = "1")]
    pub keys: Vec<prost_types::ListValue>,
    /// Key ranges.
    #[prost(message, repeated, tag = "2")]
    pub ranges: Vec<KeyRange>,
    /// All rows; keys and ranges are ignored when set.
    #[prost(bool, tag = "3")]
    pub all: bool,
}

/// Key range with independently open/closed ends.
#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyRange {
    /// Start bound.
    #[prost(oneof = "StartKeyType", tags = "1, 2")]
    pub start_key_type: Option<StartKeyType>,
    /// End bound.
    #[prost(oneof = "EndKeyType", tags = "3, 4")]
    pub end_key_type: Option<EndKeyType>,
}

/// Start bound of a key range.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum StartKeyType {
    /// Inclusive start.
    #[prost(message, tag = "1")]
    StartClosed(prost_types::ListValue),
    /// Exclusive start.
    #[prost(message, tag = "2")]
    StartOpen(prost_types::ListValue),
}

/// End bound of a key range.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum EndKeyType {
    /// Inclusive end.
    #[prost(message, tag = "3")]
    EndClosed(prost_types::ListValue),
    /// Exclusive end.
    #[prost(message, tag = "4")]
    EndOpen(prost_types::ListValue),
}
