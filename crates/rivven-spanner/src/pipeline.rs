//! Host pipeline boundary
//!
//! Coordinators are written as [`BundleOperator`]s: an element-at-a-time
//! `process` callback wrapped in per-bundle and per-instance lifecycle hooks.
//! Any engine that honours the lifecycle can host them; [`LocalRunner`] is a
//! small in-process engine used by the writer, the reader and tests.
//!
//! Lifecycle of one operator instance:
//!
//! ```text
//! setup -> start_bundle -> process* -> finish_bundle -> teardown
//! ```

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::config::RunnerConfig;
use crate::error::Result;

/// Collects the outputs of one bundle
#[derive(Debug)]
pub struct Emitter<T> {
    outputs: Vec<T>,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self {
            outputs: Vec::new(),
        }
    }
}

impl<T> Emitter<T> {
    /// Create an empty emitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit one output element
    pub fn emit(&mut self, value: T) {
        self.outputs.push(value);
    }

    /// Number of emitted elements
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Check if nothing was emitted
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Take the emitted elements
    pub fn into_inner(self) -> Vec<T> {
        self.outputs
    }
}

impl<T> Extend<T> for Emitter<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.outputs.extend(iter);
    }
}

/// Read-only value broadcast to every operator instance
#[derive(Debug)]
pub struct SideInput<T>(Arc<T>);

impl<T> SideInput<T> {
    /// Wrap a value for broadcast
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the broadcast value
    pub fn get(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for SideInput<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for SideInput<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for SideInput<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Element-at-a-time operator with bundle lifecycle hooks
#[async_trait]
pub trait BundleOperator: Send {
    /// Input element type
    type Input: Send + 'static;
    /// Output element type
    type Output: Send + 'static;

    /// Called once per instance before the first bundle
    async fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called at the start of every bundle
    async fn start_bundle(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process one element
    async fn process(
        &mut self,
        element: Self::Input,
        out: &mut Emitter<Self::Output>,
    ) -> Result<()>;

    /// Called at the end of every bundle; state held for the bundle must be
    /// emitted here
    async fn finish_bundle(&mut self, _out: &mut Emitter<Self::Output>) -> Result<()> {
        Ok(())
    }

    /// Called once per instance after the last bundle, also on failure
    async fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-process pipeline engine
///
/// Splits the input into bundles and runs each bundle on a fresh operator
/// instance, several bundles at a time. Outputs of different bundles are
/// concatenated in completion order.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
    config: RunnerConfig,
}

impl LocalRunner {
    /// Create a runner
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Runner configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `input` through operators created by `factory`
    pub async fn run<O, F>(&self, factory: F, input: Vec<O::Input>) -> Result<Vec<O::Output>>
    where
        O: BundleOperator,
        F: Fn() -> O,
    {
        let bundles = split_bundles(input, self.config.bundle_size.max(1));
        let parallelism = self.config.parallelism.max(1);

        let results: Vec<Result<Vec<O::Output>>> = stream::iter(bundles)
            .enumerate()
            .map(|(idx, bundle)| run_bundle(factory(), idx, bundle))
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut outputs = Vec::new();
        for result in results {
            outputs.extend(result?);
        }
        Ok(outputs)
    }
}

fn split_bundles<T>(input: Vec<T>, bundle_size: usize) -> Vec<Vec<T>> {
    let mut bundles = Vec::with_capacity(input.len().div_ceil(bundle_size));
    let mut iter = input.into_iter().peekable();
    while iter.peek().is_some() {
        bundles.push(iter.by_ref().take(bundle_size).collect());
    }
    bundles
}

async fn run_bundle<O: BundleOperator>(
    mut operator: O,
    idx: usize,
    bundle: Vec<O::Input>,
) -> Result<Vec<O::Output>> {
    trace!(bundle = idx, elements = bundle.len(), "Starting bundle");
    let result = process_bundle(&mut operator, bundle).await;

    if let Err(e) = operator.teardown().await {
        // Teardown failures never replace a processing error
        warn!(bundle = idx, error = %e, "Operator teardown failed");
        if result.is_ok() {
            return Err(e);
        }
    }
    result
}

async fn process_bundle<O: BundleOperator>(
    operator: &mut O,
    bundle: Vec<O::Input>,
) -> Result<Vec<O::Output>> {
    let mut out = Emitter::new();
    operator.setup().await?;
    operator.start_bundle().await?;
    for element in bundle {
        operator.process(element, &mut out).await?;
    }
    operator.finish_bundle(&mut out).await?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sums each bundle; fails on a poison element
    struct SumOperator {
        sum: i64,
        teardowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BundleOperator for SumOperator {
        type Input = i64;
        type Output = i64;

        async fn start_bundle(&mut self) -> Result<()> {
            self.sum = 0;
            Ok(())
        }

        async fn process(&mut self, element: i64, _out: &mut Emitter<i64>) -> Result<()> {
            if element < 0 {
                return Err(Error::internal("poison"));
            }
            self.sum += element;
            Ok(())
        }

        async fn finish_bundle(&mut self, out: &mut Emitter<i64>) -> Result<()> {
            out.emit(self.sum);
            Ok(())
        }

        async fn teardown(&mut self) -> Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn factory(teardowns: &Arc<AtomicUsize>) -> impl Fn() -> SumOperator + '_ {
        move || SumOperator {
            sum: 0,
            teardowns: Arc::clone(teardowns),
        }
    }

    #[test]
    fn test_split_bundles() {
        let bundles = split_bundles((0..10).collect(), 3);
        let sizes: Vec<_> = bundles.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert!(split_bundles(Vec::<u8>::new(), 3).is_empty());
    }

    #[tokio::test]
    async fn test_runner_flushes_every_bundle() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let runner = LocalRunner::new(RunnerConfig::default().with_bundle_size(4));

        let mut sums = runner.run(factory(&teardowns), (1..=10).collect()).await.unwrap();
        sums.sort_unstable();

        assert_eq!(sums, vec![10, 19, 26]);
        assert_eq!(teardowns.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_runner_tears_down_on_failure() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let runner = LocalRunner::new(RunnerConfig::default().with_bundle_size(2));

        let err = runner
            .run(factory(&teardowns), vec![1, 2, -1, 4])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("poison"));
        assert_eq!(teardowns.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_side_input_shares_value() {
        let input = SideInput::new(String::from("shared"));
        let copy = input.clone();
        assert_eq!(copy.get(), "shared");
        assert_eq!(copy.len(), 6);
    }
}
