//! Mutation model
//!
//! Provides:
//! - WriteMutation: one insert/update/insert_or_update/replace/delete
//! - WriteMutationBuilder: validated construction from independently set kinds
//! - MutationGroup: mutations committed atomically as a unit
//!
//! Sizes used for batching are derived here: byte size is the encoded wire
//! size of the mutation, rows are the number of value tuples and cells are
//! rows times columns. Key-set deletes count zero rows and zero cells.

use prost::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::proto;
use crate::types::{list_value, KeySet, Value};

/// Operation kind of a write mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Insert new rows
    Insert,
    /// Update existing rows
    Update,
    /// Insert or update rows
    InsertOrUpdate,
    /// Replace whole rows
    Replace,
    /// Delete rows by key set
    Delete,
}

impl MutationKind {
    /// Name of the operation as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::InsertOrUpdate => "insert_or_update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        }
    }

    /// Whether this kind carries columns and row values
    pub fn carries_rows(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns and row tuples written by a data-carrying mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowWrite {
    /// Target table
    pub table: String,
    /// Column names
    pub columns: Vec<String>,
    /// Row tuples aligned with `columns`
    pub values: Vec<Vec<Value>>,
}

impl RowWrite {
    fn to_proto(&self) -> proto::Write {
        proto::Write {
            table: self.table.clone(),
            columns: self.columns.clone(),
            values: self.values.iter().map(|row| list_value(row)).collect(),
        }
    }
}

/// Rows deleted by key set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedDelete {
    /// Target table
    pub table: String,
    /// Rows to delete
    pub key_set: KeySet,
}

/// A single write operation against one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMutation {
    /// Insert new rows
    Insert(RowWrite),
    /// Update existing rows
    Update(RowWrite),
    /// Insert or update rows
    InsertOrUpdate(RowWrite),
    /// Replace whole rows
    Replace(RowWrite),
    /// Delete rows by key set
    Delete(KeyedDelete),
}

fn row_write(table: impl Into<String>, columns: Vec<String>, values: Vec<Vec<Value>>) -> RowWrite {
    RowWrite {
        table: table.into(),
        columns,
        values,
    }
}

impl WriteMutation {
    /// Insert rows
    pub fn insert(
        table: impl Into<String>,
        columns: Vec<String>,
        values: Vec<Vec<Value>>,
    ) -> Self {
        Self::Insert(row_write(table, columns, values))
    }

    /// Update rows
    pub fn update(
        table: impl Into<String>,
        columns: Vec<String>,
        values: Vec<Vec<Value>>,
    ) -> Self {
        Self::Update(row_write(table, columns, values))
    }

    /// Insert or update rows
    pub fn insert_or_update(
        table: impl Into<String>,
        columns: Vec<String>,
        values: Vec<Vec<Value>>,
    ) -> Self {
        Self::InsertOrUpdate(row_write(table, columns, values))
    }

    /// Replace rows
    pub fn replace(
        table: impl Into<String>,
        columns: Vec<String>,
        values: Vec<Vec<Value>>,
    ) -> Self {
        Self::Replace(row_write(table, columns, values))
    }

    /// Delete the rows addressed by `key_set`
    pub fn delete(table: impl Into<String>, key_set: KeySet) -> Self {
        Self::Delete(KeyedDelete {
            table: table.into(),
            key_set,
        })
    }

    /// Start a validated builder
    pub fn builder() -> WriteMutationBuilder {
        WriteMutationBuilder::new()
    }

    /// Operation kind
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Insert(_) => MutationKind::Insert,
            Self::Update(_) => MutationKind::Update,
            Self::InsertOrUpdate(_) => MutationKind::InsertOrUpdate,
            Self::Replace(_) => MutationKind::Replace,
            Self::Delete(_) => MutationKind::Delete,
        }
    }

    /// Target table
    pub fn table(&self) -> &str {
        match self {
            Self::Insert(w) | Self::Update(w) | Self::InsertOrUpdate(w) | Self::Replace(w) => {
                &w.table
            }
            Self::Delete(d) => &d.table,
        }
    }

    fn row_write(&self) -> Option<&RowWrite> {
        match self {
            Self::Insert(w) | Self::Update(w) | Self::InsertOrUpdate(w) | Self::Replace(w) => {
                Some(w)
            }
            Self::Delete(_) => None,
        }
    }

    /// Number of rows written (zero for deletes)
    pub fn rows(&self) -> u64 {
        self.row_write().map_or(0, |w| w.values.len() as u64)
    }

    /// Number of cells written (zero for deletes)
    pub fn cells(&self) -> u64 {
        self.row_write()
            .map_or(0, |w| (w.values.len() * w.columns.len()) as u64)
    }

    /// Encoded size of the mutation in bytes
    pub fn byte_size(&self) -> u64 {
        self.to_proto().encoded_len() as u64
    }

    /// Encode for the wire
    pub fn to_proto(&self) -> proto::Mutation {
        let operation = match self {
            Self::Insert(w) => proto::Operation::Insert(w.to_proto()),
            Self::Update(w) => proto::Operation::Update(w.to_proto()),
            Self::InsertOrUpdate(w) => proto::Operation::InsertOrUpdate(w.to_proto()),
            Self::Replace(w) => proto::Operation::Replace(w.to_proto()),
            Self::Delete(d) => proto::Operation::Delete(proto::Delete {
                table: d.table.clone(),
                key_set: Some(d.key_set.to_proto()),
            }),
        };
        proto::Mutation {
            operation: Some(operation),
        }
    }
}

/// Builder that accepts operation kinds independently and validates on build
///
/// # Example
///
/// ```rust,ignore
/// let err = WriteMutation::builder()
///     .insert("roles")
///     .update("roles")
///     .build()
///     .unwrap_err();
/// assert!(err.is_construction_error());
/// ```
#[derive(Debug, Default)]
pub struct WriteMutationBuilder {
    kinds: Vec<(MutationKind, String)>,
    columns: Option<Vec<String>>,
    values: Option<Vec<Vec<Value>>>,
    key_set: Option<KeySet>,
}

impl WriteMutationBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    fn kind(mut self, kind: MutationKind, table: impl Into<String>) -> Self {
        self.kinds.push((kind, table.into()));
        self
    }

    /// Set an insert into `table`
    pub fn insert(self, table: impl Into<String>) -> Self {
        self.kind(MutationKind::Insert, table)
    }

    /// Set an update of `table`
    pub fn update(self, table: impl Into<String>) -> Self {
        self.kind(MutationKind::Update, table)
    }

    /// Set an insert-or-update of `table`
    pub fn insert_or_update(self, table: impl Into<String>) -> Self {
        self.kind(MutationKind::InsertOrUpdate, table)
    }

    /// Set a replace of `table`
    pub fn replace(self, table: impl Into<String>) -> Self {
        self.kind(MutationKind::Replace, table)
    }

    /// Set a delete from `table`
    pub fn delete(self, table: impl Into<String>) -> Self {
        self.kind(MutationKind::Delete, table)
    }

    /// Set columns
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set row values
    pub fn values(mut self, values: Vec<Vec<Value>>) -> Self {
        self.values = Some(values);
        self
    }

    /// Set the key set of a delete
    pub fn key_set(mut self, key_set: KeySet) -> Self {
        self.key_set = Some(key_set);
        self
    }

    /// Validate and build the mutation
    pub fn build(mut self) -> Result<WriteMutation> {
        if self.kinds.len() > 1 {
            let kinds: Vec<_> = self.kinds.iter().map(|(k, _)| k.as_str()).collect();
            return Err(Error::invalid_mutation(format!(
                "a write mutation takes exactly one operation, got {}",
                kinds.join(", ")
            )));
        }
        let (kind, table) = self.kinds.pop().ok_or_else(|| {
            Error::invalid_mutation(
                "a write mutation requires one of insert, update, insert_or_update, replace or delete",
            )
        })?;
        if table.is_empty() {
            return Err(Error::invalid_mutation("table name must not be empty"));
        }

        let wrap: fn(RowWrite) -> WriteMutation = match kind {
            MutationKind::Insert => WriteMutation::Insert,
            MutationKind::Update => WriteMutation::Update,
            MutationKind::InsertOrUpdate => WriteMutation::InsertOrUpdate,
            MutationKind::Replace => WriteMutation::Replace,
            MutationKind::Delete => return self.build_delete(table),
        };

        if self.key_set.is_some() {
            return Err(Error::invalid_mutation(format!(
                "{kind} takes columns and values, not a key set"
            )));
        }
        let columns = match self.columns {
            Some(c) if !c.is_empty() => c,
            _ => {
                return Err(Error::invalid_mutation(format!(
                    "{kind} requires at least one column"
                )))
            }
        };
        let values = self.values.unwrap_or_default();
        if let Some((idx, row)) = values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(Error::invalid_mutation(format!(
                "row {idx} has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }

        Ok(wrap(row_write(table, columns, values)))
    }

    fn build_delete(self, table: String) -> Result<WriteMutation> {
        if self.columns.is_some() || self.values.is_some() {
            return Err(Error::invalid_mutation(
                "delete takes a key set, not columns or values",
            ));
        }
        let key_set = self
            .key_set
            .ok_or_else(|| Error::invalid_mutation("delete requires a key set"))?;
        Ok(WriteMutation::delete(table, key_set))
    }
}

/// Accounting totals of a mutation group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Encoded size in bytes
    pub byte_size: u64,
    /// Rows written
    pub rows: u64,
    /// Cells written
    pub cells: u64,
}

/// Mutations committed atomically; never split across batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationGroup {
    mutations: Vec<WriteMutation>,
    info: GroupInfo,
}

impl MutationGroup {
    /// Create a group from one or more mutations
    pub fn new(mutations: Vec<WriteMutation>) -> Result<Self> {
        if mutations.is_empty() {
            return Err(Error::invalid_mutation(
                "a mutation group requires at least one mutation",
            ));
        }
        let info = mutations.iter().fold(GroupInfo::default(), |acc, m| GroupInfo {
            byte_size: acc.byte_size + m.byte_size(),
            rows: acc.rows + m.rows(),
            cells: acc.cells + m.cells(),
        });
        Ok(Self { mutations, info })
    }

    /// Group holding a single mutation
    pub fn single(mutation: WriteMutation) -> Self {
        let info = GroupInfo {
            byte_size: mutation.byte_size(),
            rows: mutation.rows(),
            cells: mutation.cells(),
        };
        Self {
            mutations: vec![mutation],
            info,
        }
    }

    /// Accounting totals
    #[inline]
    pub fn info(&self) -> GroupInfo {
        self.info
    }

    /// Encoded size in bytes
    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.info.byte_size
    }

    /// Rows written
    #[inline]
    pub fn rows(&self) -> u64 {
        self.info.rows
    }

    /// Cells written
    #[inline]
    pub fn cells(&self) -> u64 {
        self.info.cells
    }

    /// Number of mutations
    #[inline]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Always false; groups hold at least one mutation
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Mutations in order
    pub fn mutations(&self) -> &[WriteMutation] {
        &self.mutations
    }

    /// Encode for the wire
    pub fn to_proto(&self) -> Vec<proto::Mutation> {
        self.mutations.iter().map(WriteMutation::to_proto).collect()
    }
}

impl From<WriteMutation> for MutationGroup {
    fn from(mutation: WriteMutation) -> Self {
        Self::single(mutation)
    }
}

impl IntoIterator for MutationGroup {
    type Item = WriteMutation;
    type IntoIter = std::vec::IntoIter<WriteMutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles_insert() -> WriteMutation {
        WriteMutation::insert(
            "roles",
            vec!["key".into(), "rolename".into()],
            vec![vec!["1234".into(), "mutations-inset-1234".into()]],
        )
    }

    #[test]
    fn test_insert_sizes() {
        let m = roles_insert();
        assert_eq!(m.kind(), MutationKind::Insert);
        assert_eq!(m.table(), "roles");
        assert_eq!(m.rows(), 1);
        assert_eq!(m.cells(), 2);
        assert_eq!(m.byte_size(), 58);
    }

    #[test]
    fn test_delete_has_fixed_cost() {
        let m = WriteMutation::delete(
            "roles",
            KeySet::keys(vec![vec![Value::Int64(1233)], vec![Value::Int64(1234)]]),
        );
        assert_eq!(m.kind(), MutationKind::Delete);
        assert_eq!(m.rows(), 0);
        assert_eq!(m.cells(), 0);
        assert!(m.byte_size() > 0);
    }

    #[test]
    fn test_builder_rejects_two_kinds() {
        let err = WriteMutation::builder()
            .insert("table-name")
            .update("table-name")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMutation { .. }));
        assert!(err.to_string().contains("insert, update"));
    }

    #[test]
    fn test_builder_rejects_no_kind() {
        let err = WriteMutation::builder()
            .columns(["key"])
            .build()
            .unwrap_err();
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_builder_checks_row_arity() {
        let err = WriteMutation::builder()
            .insert("roles")
            .columns(["key", "rolename"])
            .values(vec![vec!["1".into()]])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("row 0 has 1 values for 2 columns"));
    }

    #[test]
    fn test_builder_delete() {
        let m = WriteMutation::builder()
            .delete("roles")
            .key_set(KeySet::all())
            .build()
            .unwrap();
        assert_eq!(m.kind(), MutationKind::Delete);

        let err = WriteMutation::builder()
            .delete("roles")
            .columns(["key"])
            .key_set(KeySet::all())
            .build()
            .unwrap_err();
        assert!(err.is_construction_error());

        assert!(WriteMutation::builder().delete("roles").build().is_err());
    }

    #[test]
    fn test_builder_matches_constructor() {
        let built = WriteMutation::builder()
            .insert("roles")
            .columns(["key", "rolename"])
            .values(vec![vec!["1234".into(), "mutations-inset-1234".into()]])
            .build()
            .unwrap();
        assert_eq!(built, roles_insert());
    }

    #[test]
    fn test_group_sums_members() {
        let group = MutationGroup::new(vec![
            roles_insert(),
            roles_insert(),
            WriteMutation::delete("roles", KeySet::all()),
        ])
        .unwrap();

        assert_eq!(group.len(), 3);
        assert_eq!(group.rows(), 2);
        assert_eq!(group.cells(), 4);
        assert_eq!(
            group.byte_size(),
            116 + WriteMutation::delete("roles", KeySet::all()).byte_size()
        );
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(MutationGroup::new(vec![]).is_err());
    }

    #[test]
    fn test_mutation_lifts_into_group() {
        let group: MutationGroup = roles_insert().into();
        assert_eq!(group.len(), 1);
        assert_eq!(group.byte_size(), 58);
    }
}
