//! # rivven-spanner
//!
//! Spanner connectivity for Rivven pipelines: batched atomic writes and
//! partitioned, optionally transaction-pinned reads.
//!
//! ## Features
//!
//! - **Adaptive Write Batching**: Mutation groups are packed into commits under
//!   byte, row and cell limits; atomic groups are never split
//! - **Partitioned Reads**: One query or table scan becomes many independently
//!   executable partitions of a single snapshot
//! - **Shared Read-Only Transactions**: Many reads observe the same snapshot
//!   through one serializable descriptor
//! - **Pluggable Storage Client**: The service RPCs sit behind async traits;
//!   an in-memory fake ships in [`testing`]
//! - **Injected Metrics**: Attempted/committed batch counters and per-call
//!   request counters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_spanner::prelude::*;
//!
//! let database = SpannerConfig::new("my-project", "my-instance", "my-db");
//!
//! // Write
//! let writer = SpannerWriter::new(client.clone(), SpannerWriteConfig::new(database.clone()))?;
//! writer
//!     .write_mutations(vec![WriteMutation::insert(
//!         "users",
//!         vec!["Key".into(), "Value".into()],
//!         vec![vec![1.into(), "Alice".into()]],
//!     )])
//!     .await?;
//!
//! // Read every user through one shared snapshot
//! let txn = create_transaction(client.as_ref(), TimestampBound::Strong).await?;
//! let rows = SpannerRead::builder(client.clone())
//!     .config(SpannerReadConfig::new(database))
//!     .sql("SELECT * FROM users")
//!     .transaction_descriptor(txn.descriptor())
//!     .build()?
//!     .read()
//!     .await?;
//! txn.close().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod mutation;
pub mod pipeline;
pub mod proto;
pub mod read;
pub mod sink;
pub mod source;
pub mod testing;
pub mod transaction;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{KeyBound, KeyRange, KeySet, Row, Value};

    // Mutations and batching
    pub use crate::batch::{batch_groups, Batch, BatchLimits, MutationBatcher};
    pub use crate::mutation::{
        GroupInfo, MutationGroup, MutationKind, WriteMutation, WriteMutationBuilder,
    };

    // Reads and transactions
    pub use crate::read::{
        Partition, PartitionOptions, PartitionToken, ReadOperation, SqlQuery, TableScan,
    };
    pub use crate::transaction::{
        create_transaction, SharedTransaction, TimestampBound, TransactionDescriptor,
    };

    // Storage client traits
    pub use crate::client::{BatchSnapshot, CommitResponse, ReadContext, RowStream, SpannerClient};

    // Pipeline boundary
    pub use crate::pipeline::{BundleOperator, Emitter, LocalRunner, SideInput};

    // Configuration
    pub use crate::config::{
        validate_config, RunnerConfig, SpannerConfig, SpannerReadConfig, SpannerWriteConfig,
    };

    // Metrics
    pub use crate::metrics::{
        metric_names, Label, Metrics, MetricsCollector, MetricsSnapshot, NoopMetrics,
    };

    // Coordinators
    pub use crate::sink::{BatchOperator, CommitOperator, SpannerWriter, WriteResult};
    pub use crate::source::{
        PartitionExecutor, PartitionGenerator, ReadInput, ReadPhase, ReadPlan, SpannerRead,
        SpannerReadBuilder, TransactionReader,
    };
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;
