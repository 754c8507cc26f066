//! Testing utilities
//!
//! [`MockSpannerClient`] is an in-memory storage client. It serves a fixed
//! `users` row set split over a configurable number of partitions, records
//! committed mutations and counts every call, so tests can assert how many
//! snapshots, transactions and commits a read or write really used. Closing a
//! snapshot ends its session: later calls on that session fail.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_spanner::testing::MockSpannerClient;
//!
//! #[tokio::test]
//! async fn test_my_read() {
//!     let client = Arc::new(MockSpannerClient::new().with_partitions(4));
//!
//!     let rows = SpannerRead::builder(client.clone())
//!         .config(config())
//!         .sql("SELECT * FROM users")
//!         .build()
//!         .unwrap()
//!         .read()
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(rows.len(), client.row_count());
//!     assert_eq!(client.stats().snapshots_opened, 1);
//! }
//! ```

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::client::{BatchSnapshot, CommitResponse, ReadContext, RowStream, SpannerClient};
use crate::error::{Error, Result};
use crate::proto;
use crate::read::{PartitionOptions, PartitionToken, SqlQuery, TableScan};
use crate::transaction::{TimestampBound, TransactionDescriptor};
use crate::types::{Row, Value};

const TOKEN_PREFIX: &str = "partition-";

/// Call counts observed by a [`MockSpannerClient`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// New snapshots opened
    pub snapshots_opened: usize,
    /// Existing snapshots attached by descriptor
    pub snapshots_attached: usize,
    /// Snapshots closed
    pub snapshots_closed: usize,
    /// Descriptors issued by snapshots
    pub descriptors_issued: usize,
    /// Partition generation calls
    pub partition_requests: usize,
    /// Partitions executed
    pub partitions_processed: usize,
    /// Read contexts opened on a shared transaction
    pub read_contexts: usize,
    /// Direct query executions
    pub execute_sql_calls: usize,
    /// Direct keyed reads
    pub read_calls: usize,
    /// Commit calls, failed ones included
    pub commits: usize,
}

#[derive(Debug, Default)]
struct Counters {
    snapshots_opened: AtomicUsize,
    snapshots_attached: AtomicUsize,
    snapshots_closed: AtomicUsize,
    descriptors_issued: AtomicUsize,
    partition_requests: AtomicUsize,
    partitions_processed: AtomicUsize,
    read_contexts: AtomicUsize,
    execute_sql_calls: AtomicUsize,
    read_calls: AtomicUsize,
    commits: AtomicUsize,
}

fn bump(counter: &AtomicUsize) -> usize {
    counter.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct MockState {
    rows: Vec<Row>,
    partitions: usize,
    counters: Counters,
    fail_commits: AtomicBool,
    fail_partitions: AtomicBool,
    fail_partition_generation: AtomicBool,
    closed_sessions: Mutex<HashSet<String>>,
    committed: Mutex<Vec<Vec<proto::Mutation>>>,
}

impl MockState {
    fn check_session(&self, descriptor: &TransactionDescriptor) -> Result<()> {
        if self.closed_sessions.lock().contains(&descriptor.session_id) {
            return Err(Error::snapshot(format!(
                "session {} not found",
                descriptor.session_id
            )));
        }
        Ok(())
    }

    fn rows_of_partition(&self, index: usize) -> Vec<Row> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(i, _)| i % self.partitions == index)
            .map(|(_, row)| row.clone())
            .collect()
    }

    fn all_rows(&self) -> RowStream {
        stream::iter(self.rows.clone().into_iter().map(Ok)).boxed()
    }
}

/// In-memory storage client with call accounting
#[derive(Debug, Clone)]
pub struct MockSpannerClient {
    state: Arc<MockState>,
}

impl Default for MockSpannerClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Rows `(Key, Value)` = `(i, "user-i")` for `i` in `0..count`
pub fn users(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            Row::new(
                vec!["Key".into(), "Value".into()],
                vec![Value::Int64(i as i64), Value::String(format!("user-{i}"))],
            )
        })
        .collect()
}

impl MockSpannerClient {
    /// Ten user rows over one partition; zero partitions make every read empty
    pub fn new() -> Self {
        Self::with_state(users(10), 1)
    }

    fn with_state(rows: Vec<Row>, partitions: usize) -> Self {
        Self {
            state: Arc::new(MockState {
                rows,
                partitions,
                counters: Counters::default(),
                fail_commits: AtomicBool::new(false),
                fail_partitions: AtomicBool::new(false),
                fail_partition_generation: AtomicBool::new(false),
                closed_sessions: Mutex::new(HashSet::new()),
                committed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Serve `rows` instead of the default users
    pub fn with_rows(self, rows: Vec<Row>) -> Self {
        Self::with_state(rows, self.state.partitions)
    }

    /// Split every read into `partitions` partitions
    pub fn with_partitions(self, partitions: usize) -> Self {
        Self::with_state(self.state.rows.clone(), partitions)
    }

    /// Make commits fail with a commit error
    pub fn fail_commits(&self, fail: bool) {
        self.state.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make partition execution fail with a partition error
    pub fn fail_partitions(&self, fail: bool) {
        self.state.fail_partitions.store(fail, Ordering::SeqCst);
    }

    /// Make partition generation fail with a partition error
    pub fn fail_partition_generation(&self, fail: bool) {
        self.state
            .fail_partition_generation
            .store(fail, Ordering::SeqCst);
    }

    /// Whether the session has been closed
    pub fn is_closed(&self, session_id: &str) -> bool {
        self.state.closed_sessions.lock().contains(session_id)
    }

    /// Number of rows served by a full read
    pub fn row_count(&self) -> usize {
        self.state.rows.len()
    }

    /// Rows served by a full read
    pub fn rows(&self) -> &[Row] {
        &self.state.rows
    }

    /// Mutations of every successful commit, one entry per commit
    pub fn committed(&self) -> Vec<Vec<proto::Mutation>> {
        self.state.committed.lock().clone()
    }

    /// Call counts so far
    pub fn stats(&self) -> MockStats {
        let c = &self.state.counters;
        let load = |a: &AtomicUsize| a.load(Ordering::SeqCst);
        MockStats {
            snapshots_opened: load(&c.snapshots_opened),
            snapshots_attached: load(&c.snapshots_attached),
            snapshots_closed: load(&c.snapshots_closed),
            descriptors_issued: load(&c.descriptors_issued),
            partition_requests: load(&c.partition_requests),
            partitions_processed: load(&c.partitions_processed),
            read_contexts: load(&c.read_contexts),
            execute_sql_calls: load(&c.execute_sql_calls),
            read_calls: load(&c.read_calls),
            commits: load(&c.commits),
        }
    }

    fn snapshot(&self, descriptor: TransactionDescriptor) -> Arc<dyn BatchSnapshot> {
        Arc::new(MockSnapshot {
            state: Arc::clone(&self.state),
            descriptor,
        })
    }
}

#[async_trait]
impl SpannerClient for MockSpannerClient {
    async fn batch_snapshot(&self, _bound: &TimestampBound) -> Result<Arc<dyn BatchSnapshot>> {
        let id = bump(&self.state.counters.snapshots_opened);
        Ok(self.snapshot(TransactionDescriptor::new(
            format!("session-{id}"),
            format!("txn-{id}"),
        )))
    }

    async fn batch_snapshot_from(
        &self,
        descriptor: &TransactionDescriptor,
    ) -> Result<Arc<dyn BatchSnapshot>> {
        self.state.check_session(descriptor)?;
        bump(&self.state.counters.snapshots_attached);
        Ok(self.snapshot(descriptor.clone()))
    }

    async fn read_transaction(
        &self,
        descriptor: &TransactionDescriptor,
    ) -> Result<Box<dyn ReadContext>> {
        self.state.check_session(descriptor)?;
        bump(&self.state.counters.read_contexts);
        Ok(Box::new(MockReadContext {
            state: Arc::clone(&self.state),
        }))
    }

    async fn commit(&self, mutations: Vec<proto::Mutation>) -> Result<CommitResponse> {
        bump(&self.state.counters.commits);
        if self.state.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::commit("mock commit failure"));
        }
        self.state.committed.lock().push(mutations);
        Ok(CommitResponse {
            commit_timestamp: Utc::now(),
        })
    }
}

struct MockSnapshot {
    state: Arc<MockState>,
    descriptor: TransactionDescriptor,
}

impl MockSnapshot {
    fn tokens(&self) -> Result<Vec<PartitionToken>> {
        self.state.check_session(&self.descriptor)?;
        bump(&self.state.counters.partition_requests);
        if self.state.fail_partition_generation.load(Ordering::SeqCst) {
            return Err(Error::partition("mock partition generation failure"));
        }
        Ok((0..self.state.partitions)
            .map(|i| PartitionToken::new(format!("{TOKEN_PREFIX}{i}").into_bytes()))
            .collect())
    }

    fn process(&self, token: &PartitionToken) -> Result<RowStream> {
        self.state.check_session(&self.descriptor)?;
        bump(&self.state.counters.partitions_processed);
        if self.state.fail_partitions.load(Ordering::SeqCst) {
            return Err(Error::partition("mock partition failure"));
        }
        let index = std::str::from_utf8(token.as_bytes())
            .ok()
            .and_then(|s| s.strip_prefix(TOKEN_PREFIX))
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|i| *i < self.state.partitions)
            .ok_or_else(|| Error::partition(format!("unknown partition token {token:?}")))?;
        let rows = self.state.rows_of_partition(index);
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

#[async_trait]
impl BatchSnapshot for MockSnapshot {
    fn descriptor(&self) -> TransactionDescriptor {
        bump(&self.state.counters.descriptors_issued);
        self.descriptor.clone()
    }

    async fn generate_query_partitions(
        &self,
        _query: &SqlQuery,
        _options: &PartitionOptions,
    ) -> Result<Vec<PartitionToken>> {
        self.tokens()
    }

    async fn generate_read_partitions(
        &self,
        _scan: &TableScan,
        _options: &PartitionOptions,
    ) -> Result<Vec<PartitionToken>> {
        self.tokens()
    }

    async fn process_query_partition(
        &self,
        _query: &SqlQuery,
        token: &PartitionToken,
    ) -> Result<RowStream> {
        self.process(token)
    }

    async fn process_read_partition(
        &self,
        _scan: &TableScan,
        token: &PartitionToken,
    ) -> Result<RowStream> {
        self.process(token)
    }

    async fn close(&self) -> Result<()> {
        self.state.check_session(&self.descriptor)?;
        bump(&self.state.counters.snapshots_closed);
        self.state
            .closed_sessions
            .lock()
            .insert(self.descriptor.session_id.clone());
        Ok(())
    }
}

struct MockReadContext {
    state: Arc<MockState>,
}

#[async_trait]
impl ReadContext for MockReadContext {
    async fn execute_sql(&self, _query: &SqlQuery) -> Result<RowStream> {
        bump(&self.state.counters.execute_sql_calls);
        Ok(self.state.all_rows())
    }

    async fn read(&self, _scan: &TableScan) -> Result<RowStream> {
        bump(&self.state.counters.read_calls);
        Ok(self.state.all_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_partitions_cover_all_rows() {
        let client = MockSpannerClient::new().with_partitions(3);
        let snapshot = client.batch_snapshot(&TimestampBound::Strong).await.unwrap();
        let query = SqlQuery {
            sql: "SELECT * FROM users".into(),
            params: Default::default(),
        };

        let tokens = snapshot
            .generate_query_partitions(&query, &PartitionOptions::default())
            .await
            .unwrap();
        assert_eq!(tokens.len(), 3);

        let mut total = 0;
        for token in &tokens {
            let rows: Vec<Row> = snapshot
                .process_query_partition(&query, token)
                .await
                .unwrap()
                .try_collect()
                .await
                .unwrap();
            total += rows.len();
        }
        assert_eq!(total, client.row_count());
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let client = MockSpannerClient::new();
        let snapshot = client.batch_snapshot(&TimestampBound::Strong).await.unwrap();
        let scan = TableScan {
            table: "users".into(),
            columns: vec!["Key".into()],
            index: None,
            key_set: crate::types::KeySet::all(),
        };

        let result = snapshot
            .process_read_partition(&scan, &PartitionToken::new(b"bogus".to_vec()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let client = MockSpannerClient::new();
        let snapshot = client.batch_snapshot(&TimestampBound::Strong).await.unwrap();
        let descriptor = snapshot.descriptor();
        snapshot.close().await.unwrap();

        assert!(client.is_closed(&descriptor.session_id));
        assert!(client.batch_snapshot_from(&descriptor).await.is_err());
        assert!(client.read_transaction(&descriptor).await.is_err());
        assert!(snapshot.close().await.is_err());
        assert_eq!(client.stats().snapshots_closed, 1);
    }

    #[tokio::test]
    async fn test_zero_partitions() {
        let client = MockSpannerClient::new().with_partitions(0);
        let snapshot = client.batch_snapshot(&TimestampBound::Strong).await.unwrap();
        let query = SqlQuery {
            sql: "SELECT * FROM users".into(),
            params: Default::default(),
        };
        let tokens = snapshot
            .generate_query_partitions(&query, &PartitionOptions::default())
            .await
            .unwrap();
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_switch() {
        let client = MockSpannerClient::new();
        assert!(client.commit(vec![]).await.is_ok());

        client.fail_commits(true);
        assert!(client.commit(vec![]).await.is_err());
        assert_eq!(client.stats().commits, 2);
        assert_eq!(client.committed().len(), 1);
    }
}
