//! Read coordinator
//!
//! Without a shared transaction a read is partitioned:
//!
//! ```text
//! ReadOperation -> PartitionGenerator -> Partition -> PartitionExecutor -> Row
//! ```
//!
//! With a shared transaction bound, every read operation executes directly
//! against it and nothing is partitioned:
//!
//! ```text
//! ReadOperation -> TransactionReader -> Row
//! ```
//!
//! [`SpannerRead`] validates the read parameters and wires the operators. A
//! partitioned read opens its snapshot once and closes it after every
//! partition has executed, whether the read succeeded or not.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::client::{BatchSnapshot, ReadContext, RowStream, SpannerClient};
use crate::config::{validate_config, SpannerReadConfig};
use crate::error::{Error, Result};
use crate::metrics::{metric_names, record_request, Metrics, NoopMetrics};
use crate::pipeline::{BundleOperator, Emitter, LocalRunner, SideInput};
use crate::read::{Partition, PartitionOptions, ReadOperation, SqlQuery, TableScan};
use crate::transaction::{TimestampBound, TransactionDescriptor};
use crate::types::{KeySet, Row, Value};

/// Progress of a read operator instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadPhase {
    /// Nothing opened yet
    Unstarted,
    /// Partitioning snapshot opened
    SnapshotOpened,
    /// Partitions generated for at least one read operation
    PartitionsGenerated,
    /// Executing partitions
    PartitionExecuting,
    /// Shared transaction attached
    TransactionOpened,
    /// Executing read operations against the shared transaction
    Executing,
    /// Resources released
    Done,
}

impl fmt::Display for ReadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unstarted => "unstarted",
            Self::SnapshotOpened => "snapshot_opened",
            Self::PartitionsGenerated => "partitions_generated",
            Self::PartitionExecuting => "partition_executing",
            Self::TransactionOpened => "transaction_opened",
            Self::Executing => "executing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

async fn drain_rows(mut rows: RowStream, out: &mut Emitter<Row>) -> Result<u64> {
    let mut count = 0;
    while let Some(row) = rows.next().await {
        out.emit(row?);
        count += 1;
    }
    Ok(count)
}

async fn open_snapshot(
    client: &dyn SpannerClient,
    bound: &TimestampBound,
    metrics: &dyn Metrics,
) -> Result<(Arc<dyn BatchSnapshot>, TransactionDescriptor)> {
    let result = client.batch_snapshot(bound).await;
    record_request(metrics, "batch_snapshot", &result);
    let snapshot = result.map_err(|e| {
        error!(error = %e, bound = ?bound, "Failed to open partitioning snapshot");
        e
    })?;

    let descriptor = snapshot.descriptor();
    debug!(
        session_id = %descriptor.session_id,
        transaction_id = %descriptor.transaction_id,
        "Opened partitioning snapshot"
    );
    Ok((snapshot, descriptor))
}

async fn close_snapshot(
    snapshot: &dyn BatchSnapshot,
    descriptor: &TransactionDescriptor,
    metrics: &dyn Metrics,
) {
    let result = snapshot.close().await;
    record_request(metrics, "close_snapshot", &result);
    match result {
        Ok(()) => debug!(session_id = %descriptor.session_id, "Closed snapshot"),
        Err(e) => warn!(
            error = %e,
            session_id = %descriptor.session_id,
            "Failed to close snapshot"
        ),
    }
}

/// Splits read operations into partitions of one snapshot
///
/// Without a snapshot supplied through [`with_snapshot`](Self::with_snapshot)
/// the instance opens its own in `setup`. The generator never closes it: the
/// partitions it issued are executed later, so the snapshot is released by
/// its owner once they are done.
pub struct PartitionGenerator {
    client: Arc<dyn SpannerClient>,
    bound: TimestampBound,
    options: PartitionOptions,
    metrics: Arc<dyn Metrics>,
    snapshot: Option<(Arc<dyn BatchSnapshot>, TransactionDescriptor)>,
    phase: ReadPhase,
}

impl PartitionGenerator {
    /// Create a generator
    pub fn new(
        client: Arc<dyn SpannerClient>,
        bound: TimestampBound,
        options: PartitionOptions,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            client,
            bound,
            options,
            metrics,
            snapshot: None,
            phase: ReadPhase::Unstarted,
        }
    }

    /// Generate partitions from an already open snapshot
    pub fn with_snapshot(
        mut self,
        snapshot: Arc<dyn BatchSnapshot>,
        descriptor: TransactionDescriptor,
    ) -> Self {
        self.snapshot = Some((snapshot, descriptor));
        self.phase = ReadPhase::SnapshotOpened;
        self
    }

    /// Snapshot the partitions are issued from, once open
    pub fn snapshot(&self) -> Option<&Arc<dyn BatchSnapshot>> {
        self.snapshot.as_ref().map(|(snapshot, _)| snapshot)
    }

    /// Current phase
    pub fn phase(&self) -> ReadPhase {
        self.phase
    }
}

#[async_trait]
impl BundleOperator for PartitionGenerator {
    type Input = ReadOperation;
    type Output = Partition;

    async fn setup(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Ok(());
        }
        let opened =
            open_snapshot(self.client.as_ref(), &self.bound, self.metrics.as_ref()).await?;
        self.snapshot = Some(opened);
        self.phase = ReadPhase::SnapshotOpened;
        Ok(())
    }

    async fn process(&mut self, op: ReadOperation, out: &mut Emitter<Partition>) -> Result<()> {
        let (snapshot, descriptor) = self
            .snapshot
            .as_ref()
            .ok_or_else(|| Error::internal("partition generator used before setup"))?;

        let result = match &op {
            ReadOperation::Query(query) => {
                snapshot
                    .generate_query_partitions(query, &self.options)
                    .await
            }
            ReadOperation::TableScan(scan) => {
                snapshot.generate_read_partitions(scan, &self.options).await
            }
        };
        record_request(self.metrics.as_ref(), "generate_partitions", &result);
        let tokens = result.map_err(|e| {
            error!(error = %e, operation = %op.describe(), "Partition generation failed");
            e
        })?;

        debug!(
            operation = %op.describe(),
            partitions = tokens.len(),
            "Generated partitions"
        );
        self.metrics
            .increment(metric_names::PARTITIONS, tokens.len() as u64);
        out.extend(tokens.into_iter().map(|token| Partition {
            token,
            read_operation: op.clone(),
            snapshot: descriptor.clone(),
        }));
        self.phase = ReadPhase::PartitionsGenerated;
        Ok(())
    }
}

/// Executes partitions, attaching to the snapshot each one came from
///
/// Attachments are cached per instance and dropped in `teardown`. They are
/// never closed here: other instances may still be executing partitions of
/// the same snapshot.
pub struct PartitionExecutor {
    client: Arc<dyn SpannerClient>,
    metrics: Arc<dyn Metrics>,
    attached: HashMap<TransactionDescriptor, Arc<dyn BatchSnapshot>>,
    phase: ReadPhase,
}

impl PartitionExecutor {
    /// Create an executor
    pub fn new(client: Arc<dyn SpannerClient>, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            client,
            metrics,
            attached: HashMap::new(),
            phase: ReadPhase::Unstarted,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ReadPhase {
        self.phase
    }

    async fn attach(
        &mut self,
        descriptor: &TransactionDescriptor,
    ) -> Result<Arc<dyn BatchSnapshot>> {
        if let Some(snapshot) = self.attached.get(descriptor) {
            return Ok(Arc::clone(snapshot));
        }
        let result = self.client.batch_snapshot_from(descriptor).await;
        record_request(self.metrics.as_ref(), "batch_snapshot", &result);
        let snapshot = result.map_err(|e| {
            error!(
                error = %e,
                session_id = %descriptor.session_id,
                "Failed to attach to snapshot"
            );
            e
        })?;
        debug!(session_id = %descriptor.session_id, "Attached to snapshot");
        self.attached
            .insert(descriptor.clone(), Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

#[async_trait]
impl BundleOperator for PartitionExecutor {
    type Input = Partition;
    type Output = Row;

    async fn process(&mut self, partition: Partition, out: &mut Emitter<Row>) -> Result<()> {
        let snapshot = self.attach(&partition.snapshot).await?;
        self.phase = ReadPhase::PartitionExecuting;
        trace!(token = ?partition.token, "Executing partition");

        let result = match &partition.read_operation {
            ReadOperation::Query(query) => {
                snapshot
                    .process_query_partition(query, &partition.token)
                    .await
            }
            ReadOperation::TableScan(scan) => {
                snapshot
                    .process_read_partition(scan, &partition.token)
                    .await
            }
        };
        let rows = match result {
            Ok(stream) => drain_rows(stream, out).await,
            Err(e) => Err(e),
        };
        record_request(self.metrics.as_ref(), "process_partition", &rows);

        let count = rows.map_err(|e| {
            error!(
                error = %e,
                operation = %partition.read_operation.describe(),
                "Partition execution failed"
            );
            e
        })?;
        self.metrics.increment(metric_names::ROWS_READ, count);
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.attached.clear();
        self.phase = ReadPhase::Done;
        Ok(())
    }
}

/// Executes read operations directly against a shared transaction
///
/// The broadcast value is shape-checked the first time a read needs it; the
/// read context is opened once per instance.
pub struct TransactionReader {
    client: Arc<dyn SpannerClient>,
    transaction: SideInput<serde_json::Value>,
    metrics: Arc<dyn Metrics>,
    context: Option<Box<dyn ReadContext>>,
    phase: ReadPhase,
}

impl TransactionReader {
    /// Create a reader bound to `transaction`
    pub fn new(
        client: Arc<dyn SpannerClient>,
        transaction: SideInput<serde_json::Value>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            client,
            transaction,
            metrics,
            context: None,
            phase: ReadPhase::Unstarted,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ReadPhase {
        self.phase
    }

    async fn open(&mut self) -> Result<&dyn ReadContext> {
        if self.context.is_none() {
            let descriptor = TransactionDescriptor::from_value(self.transaction.get())?;
            let result = self.client.read_transaction(&descriptor).await;
            record_request(self.metrics.as_ref(), "read_transaction", &result);
            let context = result.map_err(|e| {
                error!(
                    error = %e,
                    session_id = %descriptor.session_id,
                    "Failed to open shared transaction"
                );
                e
            })?;
            debug!(
                session_id = %descriptor.session_id,
                transaction_id = %descriptor.transaction_id,
                "Opened shared transaction"
            );
            self.context = Some(context);
            self.phase = ReadPhase::TransactionOpened;
        }
        self.context
            .as_deref()
            .ok_or_else(|| Error::internal("shared transaction not open"))
    }
}

#[async_trait]
impl BundleOperator for TransactionReader {
    type Input = ReadOperation;
    type Output = Row;

    async fn process(&mut self, op: ReadOperation, out: &mut Emitter<Row>) -> Result<()> {
        let metrics = Arc::clone(&self.metrics);
        let context = self.open().await?;

        let (method, result) = match &op {
            ReadOperation::Query(query) => ("execute_sql", context.execute_sql(query).await),
            ReadOperation::TableScan(scan) => ("read", context.read(scan).await),
        };
        let rows = match result {
            Ok(stream) => drain_rows(stream, out).await,
            Err(e) => Err(e),
        };
        record_request(metrics.as_ref(), method, &rows);

        let count = rows.map_err(|e| {
            error!(error = %e, operation = %op.describe(), "Transactional read failed");
            e
        })?;
        metrics.increment(metric_names::ROWS_READ, count);
        self.phase = ReadPhase::Executing;
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.context = None;
        self.phase = ReadPhase::Done;
        Ok(())
    }
}

/// Where a read gets its read operations from
#[derive(Debug, Clone)]
pub enum ReadInput {
    /// The operations given at construction (`sql`, `table` or `read_operations`)
    Root,
    /// Operations arriving as the read's input
    Operations(Vec<ReadOperation>),
}

/// Builder for [`SpannerRead`]
pub struct SpannerReadBuilder {
    client: Arc<dyn SpannerClient>,
    config: SpannerReadConfig,
    sql: Option<String>,
    params: BTreeMap<String, Value>,
    table: Option<String>,
    columns: Option<Vec<String>>,
    index: Option<String>,
    key_set: Option<KeySet>,
    read_operations: Option<Vec<ReadOperation>>,
    transaction: Option<SideInput<serde_json::Value>>,
    metrics: Arc<dyn Metrics>,
    runner: LocalRunner,
}

impl SpannerReadBuilder {
    fn new(client: Arc<dyn SpannerClient>) -> Self {
        Self {
            client,
            config: SpannerReadConfig::default(),
            sql: None,
            params: BTreeMap::new(),
            table: None,
            columns: None,
            index: None,
            key_set: None,
            read_operations: None,
            transaction: None,
            metrics: Arc::new(NoopMetrics),
            runner: LocalRunner::default(),
        }
    }

    /// Database and snapshot settings
    pub fn config(mut self, config: SpannerReadConfig) -> Self {
        self.config = config;
        self
    }

    /// Read by SQL query
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Bind a named query parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Read a table
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Columns of the table read
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Read the table through a secondary index
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Narrow the rows of the table read
    pub fn key_set(mut self, key_set: KeySet) -> Self {
        self.key_set = Some(key_set);
        self
    }

    /// Explicit read operations
    pub fn read_operations(mut self, ops: Vec<ReadOperation>) -> Self {
        self.read_operations = Some(ops);
        self
    }

    /// Bind a shared transaction broadcast as a side input
    pub fn transaction(mut self, transaction: SideInput<serde_json::Value>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Bind a shared transaction by descriptor
    pub fn transaction_descriptor(self, descriptor: &TransactionDescriptor) -> Self {
        self.transaction(SideInput::new(descriptor.to_value()))
    }

    /// Report metrics to `metrics`
    pub fn metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run bundles on `runner`
    pub fn runner(mut self, runner: LocalRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Validate the parameters and build the read
    pub fn build(self) -> Result<SpannerRead> {
        validate_config(&self.config)?;

        if self.sql.is_some() && self.table.is_some() {
            return Err(Error::config("sql and table are mutually exclusive"));
        }
        if self.read_operations.is_some() && (self.sql.is_some() || self.table.is_some()) {
            return Err(Error::config(
                "read_operations cannot be combined with sql or table",
            ));
        }
        if self.table.is_none()
            && (self.columns.is_some() || self.index.is_some() || self.key_set.is_some())
        {
            return Err(Error::config("columns, index and key_set require a table"));
        }
        if self.sql.is_none() && !self.params.is_empty() {
            return Err(Error::config("query parameters require sql"));
        }

        let operations = match (self.sql, self.table, self.read_operations) {
            (Some(sql), None, None) => Some(vec![ReadOperation::Query(SqlQuery {
                sql,
                params: self.params,
            })]),
            (None, Some(table), None) => {
                let columns = match self.columns {
                    Some(c) if !c.is_empty() => c,
                    _ => {
                        return Err(Error::config(format!(
                            "columns are required to read table `{table}`"
                        )))
                    }
                };
                Some(vec![ReadOperation::TableScan(TableScan {
                    table,
                    columns,
                    index: self.index,
                    key_set: self.key_set.unwrap_or_else(KeySet::all),
                })])
            }
            (None, None, ops) => ops,
            _ => return Err(Error::config("ambiguous read parameters")),
        };

        Ok(SpannerRead {
            client: self.client,
            config: self.config,
            operations,
            transaction: self.transaction,
            metrics: self.metrics,
            runner: self.runner,
        })
    }
}

/// Validated read against one database
///
/// # Example
///
/// ```rust,ignore
/// use rivven_spanner::prelude::*;
///
/// let rows = SpannerRead::builder(client.clone())
///     .config(SpannerReadConfig::new(SpannerConfig::new("p", "i", "db")))
///     .table("users")
///     .columns(["Key", "Value"])
///     .build()?
///     .read()
///     .await?;
/// ```
pub struct SpannerRead {
    client: Arc<dyn SpannerClient>,
    config: SpannerReadConfig,
    operations: Option<Vec<ReadOperation>>,
    transaction: Option<SideInput<serde_json::Value>>,
    metrics: Arc<dyn Metrics>,
    runner: LocalRunner,
}

impl SpannerRead {
    /// Start building a read
    pub fn builder(client: Arc<dyn SpannerClient>) -> SpannerReadBuilder {
        SpannerReadBuilder::new(client)
    }

    /// Operations fixed at construction, if any
    pub fn operations(&self) -> Option<&[ReadOperation]> {
        self.operations.as_deref()
    }

    /// Whether the read is bound to a shared transaction
    pub fn is_transactional(&self) -> bool {
        self.transaction.is_some()
    }

    /// Resolve the read operations for `input`
    ///
    /// Fails before anything executes when operations are supplied both at
    /// construction and as input, or not at all.
    pub fn plan(&self, input: ReadInput) -> Result<ReadPlan<'_>> {
        let operations = match (input, &self.operations) {
            (ReadInput::Root, Some(ops)) => ops.clone(),
            (ReadInput::Root, None) => {
                return Err(Error::config(
                    "nothing to read: set sql, table or read_operations",
                ))
            }
            (ReadInput::Operations(_), Some(_)) => {
                return Err(Error::config(
                    "read operations supplied both at construction and as input",
                ))
            }
            (ReadInput::Operations(ops), None) => ops,
        };
        Ok(ReadPlan {
            read: self,
            operations,
        })
    }

    /// Read the operations given at construction
    pub async fn read(&self) -> Result<Vec<Row>> {
        self.plan(ReadInput::Root)?.execute().await
    }

    /// Read operations supplied as input
    pub async fn read_all(&self, operations: Vec<ReadOperation>) -> Result<Vec<Row>> {
        self.plan(ReadInput::Operations(operations))?.execute().await
    }
}

/// Read operations resolved and ready to execute
pub struct ReadPlan<'a> {
    read: &'a SpannerRead,
    operations: Vec<ReadOperation>,
}

impl ReadPlan<'_> {
    /// Operations that will be read
    pub fn operations(&self) -> &[ReadOperation] {
        &self.operations
    }

    /// Execute the plan, returning rows in no particular order
    pub async fn execute(self) -> Result<Vec<Row>> {
        let read = self.read;
        let database = read.config.database.database_path();
        info!(
            database = %database,
            operations = self.operations.len(),
            transactional = read.is_transactional(),
            "Starting Spanner read"
        );

        let rows = match &read.transaction {
            Some(transaction) => {
                read.runner
                    .run(
                        || {
                            TransactionReader::new(
                                Arc::clone(&read.client),
                                transaction.clone(),
                                Arc::clone(&read.metrics),
                            )
                        },
                        self.operations,
                    )
                    .await?
            }
            None if self.operations.is_empty() => Vec::new(),
            None => {
                let (snapshot, descriptor) = open_snapshot(
                    read.client.as_ref(),
                    &read.config.snapshot,
                    read.metrics.as_ref(),
                )
                .await?;
                let result =
                    read_partitioned(read, &snapshot, &descriptor, self.operations).await;
                close_snapshot(snapshot.as_ref(), &descriptor, read.metrics.as_ref()).await;
                result?
            }
        };

        info!(database = %database, rows = rows.len(), "Spanner read completed");
        Ok(rows)
    }
}

async fn read_partitioned(
    read: &SpannerRead,
    snapshot: &Arc<dyn BatchSnapshot>,
    descriptor: &TransactionDescriptor,
    operations: Vec<ReadOperation>,
) -> Result<Vec<Row>> {
    let options = read.config.partition_options();
    let partitions = read
        .runner
        .run(
            || {
                PartitionGenerator::new(
                    Arc::clone(&read.client),
                    read.config.snapshot,
                    options,
                    Arc::clone(&read.metrics),
                )
                .with_snapshot(Arc::clone(snapshot), descriptor.clone())
            },
            operations,
        )
        .await?;

    debug!(partitions = partitions.len(), "Executing partitions");
    read.runner
        .run(
            || PartitionExecutor::new(Arc::clone(&read.client), Arc::clone(&read.metrics)),
            partitions,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpannerConfig;
    use crate::read::PartitionToken;
    use crate::testing::MockSpannerClient;

    fn config() -> SpannerReadConfig {
        SpannerReadConfig::new(SpannerConfig::new("p", "i", "db"))
    }

    fn builder(client: &Arc<MockSpannerClient>) -> SpannerReadBuilder {
        let client: Arc<dyn SpannerClient> = client.clone();
        SpannerRead::builder(client).config(config())
    }

    #[test]
    fn test_sql_and_table_rejected() {
        let client = Arc::new(MockSpannerClient::new());
        let err = builder(&client)
            .sql("SELECT * FROM users")
            .table("users")
            .columns(["Key"])
            .build()
            .err()
            .unwrap();
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_table_requires_columns() {
        let client = Arc::new(MockSpannerClient::new());
        let err = builder(&client).table("users").build().err().unwrap();
        assert!(err.to_string().contains("columns are required"));
    }

    #[test]
    fn test_index_requires_table() {
        let client = Arc::new(MockSpannerClient::new());
        assert!(builder(&client).sql("SELECT 1").index("idx").build().is_err());
        assert!(builder(&client).table("t").columns(["a"]).param("x", 1).build().is_err());
    }

    #[test]
    fn test_operations_both_ways_rejected_at_plan() {
        let client = Arc::new(MockSpannerClient::new());
        let read = builder(&client)
            .read_operations(vec![ReadOperation::query("SELECT 1")])
            .build()
            .unwrap();

        let err = read
            .plan(ReadInput::Operations(vec![ReadOperation::query("SELECT 2")]))
            .err()
            .unwrap();
        assert!(err.is_construction_error());
        assert_eq!(client.stats().snapshots_opened, 0);
    }

    #[test]
    fn test_root_without_operations_rejected() {
        let client = Arc::new(MockSpannerClient::new());
        let read = builder(&client).build().unwrap();
        assert!(read.plan(ReadInput::Root).is_err());
        assert!(read.plan(ReadInput::Operations(vec![])).is_ok());
    }

    #[tokio::test]
    async fn test_generator_opens_snapshot_once() {
        let client = Arc::new(MockSpannerClient::new().with_partitions(3));
        let mut generator = PartitionGenerator::new(
            client.clone(),
            TimestampBound::Strong,
            PartitionOptions::default(),
            Arc::new(NoopMetrics),
        );
        assert_eq!(generator.phase(), ReadPhase::Unstarted);

        generator.setup().await.unwrap();
        assert_eq!(generator.phase(), ReadPhase::SnapshotOpened);

        let mut out = Emitter::new();
        generator
            .process(ReadOperation::query("SELECT * FROM users"), &mut out)
            .await
            .unwrap();
        generator
            .process(ReadOperation::table("users", ["Key", "Value"]), &mut out)
            .await
            .unwrap();

        assert_eq!(generator.phase(), ReadPhase::PartitionsGenerated);
        assert_eq!(out.len(), 6);
        assert_eq!(client.stats().snapshots_opened, 1);
        assert_eq!(client.stats().partition_requests, 2);
    }

    #[tokio::test]
    async fn test_executor_leaves_snapshot_open() {
        let client = Arc::new(MockSpannerClient::new().with_partitions(2));
        let mut generator = PartitionGenerator::new(
            client.clone(),
            TimestampBound::Strong,
            PartitionOptions::default(),
            Arc::new(NoopMetrics),
        );
        generator.setup().await.unwrap();
        let mut partitions = Emitter::new();
        generator
            .process(ReadOperation::query("SELECT * FROM users"), &mut partitions)
            .await
            .unwrap();

        let mut executor = PartitionExecutor::new(client.clone(), Arc::new(NoopMetrics));
        let mut rows = Emitter::new();
        for partition in partitions.into_inner() {
            executor.process(partition, &mut rows).await.unwrap();
        }
        assert_eq!(executor.phase(), ReadPhase::PartitionExecuting);
        executor.teardown().await.unwrap();

        assert_eq!(executor.phase(), ReadPhase::Done);
        assert_eq!(rows.len(), client.row_count());
        assert_eq!(client.stats().snapshots_attached, 1);
        assert_eq!(client.stats().snapshots_closed, 0);

        // The generator's snapshot is still usable after the executor is gone
        let snapshot = generator.snapshot().unwrap();
        assert!(!client.is_closed(&snapshot.descriptor().session_id));
    }

    #[tokio::test]
    async fn test_generator_uses_supplied_snapshot() {
        let client = Arc::new(MockSpannerClient::new().with_partitions(2));
        let snapshot = client.batch_snapshot(&TimestampBound::Strong).await.unwrap();
        let descriptor = snapshot.descriptor();

        let mut generator = PartitionGenerator::new(
            client.clone(),
            TimestampBound::Strong,
            PartitionOptions::default(),
            Arc::new(NoopMetrics),
        )
        .with_snapshot(snapshot, descriptor.clone());
        generator.setup().await.unwrap();

        let mut out = Emitter::new();
        generator
            .process(ReadOperation::query("SELECT * FROM users"), &mut out)
            .await
            .unwrap();
        assert_eq!(client.stats().snapshots_opened, 1);
        assert!(out.into_inner().iter().all(|p| p.snapshot == descriptor));
    }

    #[tokio::test]
    async fn test_executor_phase_unchanged_when_attach_fails() {
        let client = Arc::new(MockSpannerClient::new());
        let snapshot = client.batch_snapshot(&TimestampBound::Strong).await.unwrap();
        let partition = Partition {
            token: PartitionToken::new(b"partition-0".to_vec()),
            read_operation: ReadOperation::query("SELECT * FROM users"),
            snapshot: snapshot.descriptor(),
        };
        snapshot.close().await.unwrap();

        let mut executor = PartitionExecutor::new(client.clone(), Arc::new(NoopMetrics));
        let mut rows = Emitter::new();
        assert!(executor.process(partition, &mut rows).await.is_err());
        assert_eq!(executor.phase(), ReadPhase::Unstarted);
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_reader_rejects_malformed_transaction_at_first_use() {
        let client = Arc::new(MockSpannerClient::new());
        let mut reader = TransactionReader::new(
            client.clone(),
            SideInput::new(serde_json::json!({"session": "s"})),
            Arc::new(NoopMetrics),
        );

        let mut out = Emitter::new();
        let err = reader
            .process(ReadOperation::query("SELECT * FROM users"), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid transaction object"));
        assert_eq!(client.stats().read_contexts, 0);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ReadPhase::PartitionsGenerated.to_string(), "partitions_generated");
    }
}
