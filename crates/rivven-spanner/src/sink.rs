//! Write coordinator
//!
//! Mutation groups flow through two operators:
//!
//! ```text
//! MutationGroup -> BatchOperator -> Batch -> CommitOperator -> WriteResult
//! ```
//!
//! [`BatchOperator`] owns one [`MutationBatcher`] per bundle and flushes it
//! when the bundle finishes. [`CommitOperator`] issues one atomic commit per
//! batch and reports attempted/committed counts. Failed commits are never
//! retried here; the error surfaces to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::batch::{Batch, BatchLimits, MutationBatcher};
use crate::client::SpannerClient;
use crate::config::{validate_config, SpannerWriteConfig};
use crate::error::Result;
use crate::metrics::{metric_names, request_labels, Metrics, NoopMetrics};
use crate::mutation::{MutationGroup, WriteMutation};
use crate::pipeline::{BundleOperator, Emitter, LocalRunner};

/// Totals of a write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Batches committed
    pub batches: u64,
    /// Mutation groups committed
    pub mutation_groups: u64,
    /// Mutations committed
    pub mutations: u64,
    /// Encoded bytes committed
    pub bytes: u64,
}

impl WriteResult {
    /// Create an empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals of one committed batch
    pub fn from_batch(batch: &Batch) -> Self {
        Self {
            batches: 1,
            mutation_groups: batch.len() as u64,
            mutations: batch.mutation_count() as u64,
            bytes: batch.total_bytes,
        }
    }
}

impl AddAssign for WriteResult {
    fn add_assign(&mut self, other: Self) {
        self.batches += other.batches;
        self.mutation_groups += other.mutation_groups;
        self.mutations += other.mutations;
        self.bytes += other.bytes;
    }
}

impl std::iter::Sum for WriteResult {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::new(), |mut acc, r| {
            acc += r;
            acc
        })
    }
}

/// Groups mutation groups into batches, one batcher per bundle
#[derive(Debug)]
pub struct BatchOperator {
    limits: BatchLimits,
    batcher: MutationBatcher,
}

impl BatchOperator {
    /// Create an operator with the given limits
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            batcher: MutationBatcher::new(limits),
        }
    }
}

#[async_trait]
impl BundleOperator for BatchOperator {
    type Input = MutationGroup;
    type Output = Batch;

    async fn start_bundle(&mut self) -> Result<()> {
        self.batcher = MutationBatcher::new(self.limits);
        Ok(())
    }

    async fn process(&mut self, group: MutationGroup, out: &mut Emitter<Batch>) -> Result<()> {
        trace!(
            mutations = group.len(),
            bytes = group.byte_size(),
            "Batching mutation group"
        );
        out.extend(self.batcher.add(group));
        Ok(())
    }

    async fn finish_bundle(&mut self, out: &mut Emitter<Batch>) -> Result<()> {
        out.extend(self.batcher.flush());
        Ok(())
    }
}

/// Commits each batch atomically
pub struct CommitOperator {
    client: Arc<dyn SpannerClient>,
    metrics: Arc<dyn Metrics>,
}

impl CommitOperator {
    /// Create an operator committing through `client`
    pub fn new(client: Arc<dyn SpannerClient>, metrics: Arc<dyn Metrics>) -> Self {
        Self { client, metrics }
    }

    /// Commit one batch, recording attempt and outcome
    pub async fn commit(&self, batch: &Batch) -> Result<WriteResult> {
        self.metrics.increment(metric_names::BATCHES_ATTEMPTED, 1);
        let started = Instant::now();

        match self.client.commit(batch.to_proto()).await {
            Ok(response) => {
                self.metrics.increment(metric_names::BATCHES_COMMITTED, 1);
                self.metrics.increment_with_labels(
                    metric_names::API_REQUESTS,
                    1,
                    &request_labels("commit", "ok"),
                );
                self.metrics.histogram(
                    metric_names::COMMIT_LATENCY,
                    started.elapsed().as_secs_f64(),
                );
                debug!(
                    groups = batch.len(),
                    bytes = batch.total_bytes,
                    commit_timestamp = %response.commit_timestamp,
                    "Batch committed"
                );
                Ok(WriteResult::from_batch(batch))
            }
            Err(e) => {
                self.metrics.increment_with_labels(
                    metric_names::API_REQUESTS,
                    1,
                    &request_labels("commit", &e.category().to_string()),
                );
                error!(
                    error = %e,
                    groups = batch.len(),
                    bytes = batch.total_bytes,
                    retriable = e.is_retriable(),
                    "Batch commit failed"
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl BundleOperator for CommitOperator {
    type Input = Batch;
    type Output = WriteResult;

    async fn process(&mut self, batch: Batch, out: &mut Emitter<WriteResult>) -> Result<()> {
        out.emit(self.commit(&batch).await?);
        Ok(())
    }
}

/// Writes mutation groups to a database
///
/// # Example
///
/// ```rust,ignore
/// use rivven_spanner::prelude::*;
///
/// let config = SpannerWriteConfig::new(SpannerConfig::new("p", "i", "db"))
///     .with_max_number_rows(500);
/// let writer = SpannerWriter::new(client, config)?;
///
/// let result = writer
///     .write_mutations(vec![WriteMutation::insert(
///         "users",
///         vec!["Key".into(), "Value".into()],
///         vec![vec![1.into(), "Alice".into()]],
///     )])
///     .await?;
/// assert_eq!(result.mutations, 1);
/// ```
pub struct SpannerWriter {
    client: Arc<dyn SpannerClient>,
    config: SpannerWriteConfig,
    metrics: Arc<dyn Metrics>,
    runner: LocalRunner,
}

impl SpannerWriter {
    /// Create a writer; the configuration is validated here
    pub fn new(client: Arc<dyn SpannerClient>, config: SpannerWriteConfig) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self {
            client,
            config,
            metrics: Arc::new(NoopMetrics),
            runner: LocalRunner::default(),
        })
    }

    /// Report metrics to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run bundles on `runner`
    pub fn with_runner(mut self, runner: LocalRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Writer configuration
    pub fn config(&self) -> &SpannerWriteConfig {
        &self.config
    }

    /// Write mutation groups
    pub async fn write<I>(&self, groups: I) -> Result<WriteResult>
    where
        I: IntoIterator<Item = MutationGroup>,
    {
        let groups: Vec<_> = groups.into_iter().collect();
        let limits = self.config.limits();
        info!(
            database = %self.config.database.database_path(),
            groups = groups.len(),
            max_batch_size_bytes = limits.max_batch_size_bytes,
            max_number_rows = limits.max_number_rows,
            max_number_cells = limits.max_number_cells,
            "Starting Spanner write"
        );

        let batches = self
            .runner
            .run(|| BatchOperator::new(limits), groups)
            .await?;
        let results = self
            .runner
            .run(
                || CommitOperator::new(Arc::clone(&self.client), Arc::clone(&self.metrics)),
                batches,
            )
            .await?;

        let result: WriteResult = results.into_iter().sum();
        info!(
            batches = result.batches,
            mutation_groups = result.mutation_groups,
            mutations = result.mutations,
            bytes = result.bytes,
            "Spanner write completed"
        );
        Ok(result)
    }

    /// Write bare mutations, each as its own group
    pub async fn write_mutations<I>(&self, mutations: I) -> Result<WriteResult>
    where
        I: IntoIterator<Item = WriteMutation>,
    {
        self.write(mutations.into_iter().map(MutationGroup::from))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::testing::MockSpannerClient;

    fn group(key: i64) -> MutationGroup {
        MutationGroup::single(WriteMutation::insert(
            "users",
            vec!["Key".into(), "Value".into()],
            vec![vec![key.into(), format!("user-{key}").into()]],
        ))
    }

    #[tokio::test]
    async fn test_batch_operator_flushes_on_finish() {
        let mut op = BatchOperator::new(BatchLimits::default().with_max_number_rows(2));
        let mut out = Emitter::new();

        op.start_bundle().await.unwrap();
        for key in 0..5 {
            op.process(group(key), &mut out).await.unwrap();
        }
        assert_eq!(out.len(), 2);

        op.finish_bundle(&mut out).await.unwrap();
        let sizes: Vec<_> = out.into_inner().iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_commit_operator_counts_attempts() {
        let client = Arc::new(MockSpannerClient::new());
        let metrics = MetricsCollector::shared();
        let op = CommitOperator::new(client.clone(), metrics.clone());
        let batch = Batch::from_groups(vec![group(1), group(2)]);

        let result = op.commit(&batch).await.unwrap();
        assert_eq!(result.batches, 1);
        assert_eq!(result.mutation_groups, 2);

        client.fail_commits(true);
        assert!(op.commit(&batch).await.is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter(metric_names::BATCHES_ATTEMPTED), Some(2));
        assert_eq!(snapshot.counter(metric_names::BATCHES_COMMITTED), Some(1));
        assert_eq!(
            snapshot.counter_with_labels(
                metric_names::API_REQUESTS,
                &request_labels("commit", "ok")
            ),
            Some(1)
        );
        assert_eq!(
            snapshot.counter_with_labels(
                metric_names::API_REQUESTS,
                &request_labels("commit", "commit")
            ),
            Some(1)
        );
        assert_eq!(client.stats().commits, 2);
    }

    #[test]
    fn test_write_result_sum() {
        let total: WriteResult = [
            WriteResult::from_batch(&Batch::from_groups(vec![group(1)])),
            WriteResult::from_batch(&Batch::from_groups(vec![group(2), group(3)])),
        ]
        .into_iter()
        .sum();

        assert_eq!(total.batches, 2);
        assert_eq!(total.mutation_groups, 3);
        assert_eq!(total.mutations, 3);
    }

    #[test]
    fn test_writer_rejects_invalid_config() {
        let client = Arc::new(MockSpannerClient::new());
        let result = SpannerWriter::new(client, SpannerWriteConfig::default());
        assert!(result.is_err());
    }
}
