//! Batching engine for mutation groups
//!
//! Packs a stream of [`MutationGroup`]s into commit-sized [`Batch`]es under
//! three independent limits: encoded bytes, rows and cells.
//!
//! - First fit in arrival order; no look-ahead or reordering
//! - A group is never split; a group that exceeds a limit on its own is
//!   emitted alone
//! - A non-positive limit turns batching off: every group becomes its own batch
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_spanner::prelude::*;
//!
//! let mut batcher = MutationBatcher::new(BatchLimits::default());
//!
//! for group in groups {
//!     if let Some(batch) = batcher.add(group) {
//!         client.commit(batch.to_proto()).await?;
//!     }
//! }
//!
//! // End of the bundle: flush the tail
//! if let Some(batch) = batcher.flush() {
//!     client.commit(batch.to_proto()).await?;
//! }
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mutation::{GroupInfo, MutationGroup, WriteMutation};
use crate::proto;

/// Default maximum encoded bytes per batch (1 MiB)
pub const DEFAULT_MAX_BATCH_SIZE_BYTES: i64 = 1_048_576;
/// Default maximum rows per batch
pub const DEFAULT_MAX_NUMBER_ROWS: i64 = 50;
/// Default maximum cells per batch
pub const DEFAULT_MAX_NUMBER_CELLS: i64 = 500;

/// Resource limits for a single commit
///
/// Limits are signed so that a misconfigured negative value is representable;
/// any value `<= 0` is treated the same as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchLimits {
    /// Maximum encoded size of a batch in bytes
    #[serde(default = "default_max_batch_size_bytes")]
    pub max_batch_size_bytes: i64,
    /// Maximum number of rows in a batch
    #[serde(default = "default_max_number_rows")]
    pub max_number_rows: i64,
    /// Maximum number of cells in a batch
    #[serde(default = "default_max_number_cells")]
    pub max_number_cells: i64,
}

fn default_max_batch_size_bytes() -> i64 {
    DEFAULT_MAX_BATCH_SIZE_BYTES
}

fn default_max_number_rows() -> i64 {
    DEFAULT_MAX_NUMBER_ROWS
}

fn default_max_number_cells() -> i64 {
    DEFAULT_MAX_NUMBER_CELLS
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_size_bytes: DEFAULT_MAX_BATCH_SIZE_BYTES,
            max_number_rows: DEFAULT_MAX_NUMBER_ROWS,
            max_number_cells: DEFAULT_MAX_NUMBER_CELLS,
        }
    }
}

impl BatchLimits {
    /// Create limits from explicit values
    pub fn new(max_batch_size_bytes: i64, max_number_rows: i64, max_number_cells: i64) -> Self {
        Self {
            max_batch_size_bytes,
            max_number_rows,
            max_number_cells,
        }
    }

    /// Set the byte limit
    pub fn with_max_batch_size_bytes(mut self, bytes: i64) -> Self {
        self.max_batch_size_bytes = bytes;
        self
    }

    /// Set the row limit
    pub fn with_max_number_rows(mut self, rows: i64) -> Self {
        self.max_number_rows = rows;
        self
    }

    /// Set the cell limit
    pub fn with_max_number_cells(mut self, cells: i64) -> Self {
        self.max_number_cells = cells;
        self
    }

    /// Whether groups are accumulated at all
    ///
    /// False as soon as one limit is `<= 0`; each group is then committed on
    /// its own.
    #[inline]
    pub fn batching_enabled(&self) -> bool {
        self.max_batch_size_bytes > 0 && self.max_number_rows > 0 && self.max_number_cells > 0
    }

    /// Whether totals of `info` break any limit
    fn exceeded_by(&self, info: &GroupInfo) -> bool {
        exceeds(info.byte_size, self.max_batch_size_bytes)
            || exceeds(info.rows, self.max_number_rows)
            || exceeds(info.cells, self.max_number_cells)
    }
}

#[inline]
fn exceeds(total: u64, limit: i64) -> bool {
    // Only reached with positive limits
    total > limit.unsigned_abs()
}

/// A set of mutation groups committed in one call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    groups: Vec<MutationGroup>,
    /// Total encoded bytes
    pub total_bytes: u64,
    /// Total rows
    pub total_rows: u64,
    /// Total cells
    pub total_cells: u64,
}

impl Batch {
    /// Create an empty batch
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a batch from groups, computing totals
    pub fn from_groups(groups: Vec<MutationGroup>) -> Self {
        let mut batch = Self::empty();
        for group in groups {
            batch.push(group);
        }
        batch
    }

    fn push(&mut self, group: MutationGroup) {
        let info = group.info();
        self.total_bytes += info.byte_size;
        self.total_rows += info.rows;
        self.total_cells += info.cells;
        self.groups.push(group);
    }

    fn totals_with(&self, info: &GroupInfo) -> GroupInfo {
        GroupInfo {
            byte_size: self.total_bytes + info.byte_size,
            rows: self.total_rows + info.rows,
            cells: self.total_cells + info.cells,
        }
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of mutations across all groups
    pub fn mutation_count(&self) -> usize {
        self.groups.iter().map(MutationGroup::len).sum()
    }

    /// Groups in arrival order
    pub fn groups(&self) -> &[MutationGroup] {
        &self.groups
    }

    /// Iterate over groups
    pub fn iter(&self) -> impl Iterator<Item = &MutationGroup> {
        self.groups.iter()
    }

    /// Flatten into mutations, preserving order
    pub fn into_mutations(self) -> Vec<WriteMutation> {
        self.groups.into_iter().flatten().collect()
    }

    /// Encode every mutation for a single commit
    pub fn to_proto(&self) -> Vec<proto::Mutation> {
        self.groups
            .iter()
            .flat_map(|g| g.mutations().iter().map(WriteMutation::to_proto))
            .collect()
    }
}

impl IntoIterator for Batch {
    type Item = MutationGroup;
    type IntoIter = std::vec::IntoIter<MutationGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a MutationGroup;
    type IntoIter = std::slice::Iter<'a, MutationGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

/// Accumulates mutation groups into batches
///
/// Owned by one bundle; the caller must [`flush`](Self::flush) at the end of
/// the bundle or trailing groups are lost.
#[derive(Debug, Default)]
pub struct MutationBatcher {
    limits: BatchLimits,
    current: Batch,
}

impl MutationBatcher {
    /// Create a batcher with the given limits
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            current: Batch::empty(),
        }
    }

    /// Limits in effect
    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// Add a group
    ///
    /// Returns Some(batch) when a completed batch must be committed
    pub fn add(&mut self, group: MutationGroup) -> Option<Batch> {
        if !self.limits.batching_enabled() {
            return Some(Batch::from_groups(vec![group]));
        }

        if self.current.is_empty() {
            self.current.push(group);
            return None;
        }

        let info = group.info();
        if self.limits.exceeded_by(&self.current.totals_with(&info)) {
            let batch = self.take_batch();
            self.current.push(group);
            return batch;
        }

        self.current.push(group);
        None
    }

    /// Flush the accumulated batch, if any
    pub fn flush(&mut self) -> Option<Batch> {
        self.take_batch()
    }

    fn take_batch(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.current);
        debug!(
            groups = batch.len(),
            bytes = batch.total_bytes,
            rows = batch.total_rows,
            cells = batch.total_cells,
            "Flushing mutation batch"
        );
        Some(batch)
    }

    /// Number of groups waiting in the open batch
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Encoded bytes pending
    pub fn bytes(&self) -> u64 {
        self.current.total_bytes
    }
}

/// Run a whole sequence of groups through a fresh batcher, flushing the tail
pub fn batch_groups<I>(limits: BatchLimits, groups: I) -> Vec<Batch>
where
    I: IntoIterator<Item = MutationGroup>,
{
    let mut batcher = MutationBatcher::new(limits);
    let mut batches: Vec<Batch> = groups
        .into_iter()
        .filter_map(|group| batcher.add(group))
        .collect();
    batches.extend(batcher.flush());
    batches
}
