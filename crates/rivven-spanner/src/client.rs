//! Storage client traits for rivven-spanner
//!
//! Boundary to the storage service's session, snapshot and commit RPCs:
//! - SpannerClient: entry point; opens snapshots, read contexts and commits
//! - BatchSnapshot: read-only snapshot that can be partitioned
//! - ReadContext: read-only transaction for direct (unpartitioned) reads
//!
//! Implementations own transport, authentication, timeouts and retries of
//! individual RPCs. Nothing in this crate retries a failed call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::error::Result;
use crate::proto;
use crate::read::{PartitionOptions, PartitionToken, SqlQuery, TableScan};
use crate::transaction::{TimestampBound, TransactionDescriptor};
use crate::types::Row;

/// Lazy, finite, non-restartable sequence of result rows
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResponse {
    /// Commit timestamp assigned by the service
    pub commit_timestamp: DateTime<Utc>,
}

/// Client for one database
///
/// # Example
///
/// ```rust,ignore
/// let snapshot = client.batch_snapshot(&TimestampBound::Strong).await?;
/// let tokens = snapshot
///     .generate_query_partitions(&query, &PartitionOptions::default())
///     .await?;
/// for token in &tokens {
///     let mut rows = snapshot.process_query_partition(&query, token).await?;
///     while let Some(row) = rows.next().await {
///         println!("{:?}", row?);
///     }
/// }
/// snapshot.close().await?;
/// ```
#[async_trait]
pub trait SpannerClient: Send + Sync {
    /// Open a new partitionable read-only snapshot
    async fn batch_snapshot(&self, bound: &TimestampBound) -> Result<Arc<dyn BatchSnapshot>>;

    /// Attach to an existing snapshot by descriptor
    async fn batch_snapshot_from(
        &self,
        descriptor: &TransactionDescriptor,
    ) -> Result<Arc<dyn BatchSnapshot>>;

    /// Open a read context bound to an existing read-only transaction
    async fn read_transaction(
        &self,
        descriptor: &TransactionDescriptor,
    ) -> Result<Box<dyn ReadContext>>;

    /// Commit mutations atomically
    async fn commit(&self, mutations: Vec<proto::Mutation>) -> Result<CommitResponse>;
}

/// Read-only snapshot capable of partitioned reads
#[async_trait]
pub trait BatchSnapshot: Send + Sync {
    /// Serialize the snapshot to its identifiers
    fn descriptor(&self) -> TransactionDescriptor;

    /// Split a query into partitions
    async fn generate_query_partitions(
        &self,
        query: &SqlQuery,
        options: &PartitionOptions,
    ) -> Result<Vec<PartitionToken>>;

    /// Split a table or index scan into partitions
    async fn generate_read_partitions(
        &self,
        scan: &TableScan,
        options: &PartitionOptions,
    ) -> Result<Vec<PartitionToken>>;

    /// Execute one query partition
    async fn process_query_partition(
        &self,
        query: &SqlQuery,
        token: &PartitionToken,
    ) -> Result<RowStream>;

    /// Execute one read partition
    async fn process_read_partition(
        &self,
        scan: &TableScan,
        token: &PartitionToken,
    ) -> Result<RowStream>;

    /// Release the snapshot's session resources
    async fn close(&self) -> Result<()>;
}

/// Read-only transaction used for direct reads
#[async_trait]
pub trait ReadContext: Send + Sync {
    /// Execute a SQL query
    async fn execute_sql(&self, query: &SqlQuery) -> Result<RowStream>;

    /// Read rows of a table or index by key set
    async fn read(&self, scan: &TableScan) -> Result<RowStream>;
}
