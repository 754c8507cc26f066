//! Configuration for rivven-spanner
//!
//! All configs deserialize from JSON or YAML, validate with `validator` and
//! expose a JSON schema through `schemars`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::batch::{
    BatchLimits, DEFAULT_MAX_BATCH_SIZE_BYTES, DEFAULT_MAX_NUMBER_CELLS, DEFAULT_MAX_NUMBER_ROWS,
};
use crate::error::{Error, Result};
use crate::read::PartitionOptions;
use crate::transaction::TimestampBound;

/// Target database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate, JsonSchema)]
pub struct SpannerConfig {
    /// Cloud project ID
    #[validate(length(min = 1))]
    pub project_id: String,

    /// Instance ID
    #[validate(length(min = 1))]
    pub instance_id: String,

    /// Database ID
    #[validate(length(min = 1))]
    pub database_id: String,
}

impl SpannerConfig {
    /// Create a config for one database
    pub fn new(
        project_id: impl Into<String>,
        instance_id: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            instance_id: instance_id.into(),
            database_id: database_id.into(),
        }
    }

    /// Fully qualified database resource name
    pub fn database_path(&self) -> String {
        format!(
            "projects/{}/instances/{}/databases/{}",
            self.project_id, self.instance_id, self.database_id
        )
    }
}

/// Write coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, JsonSchema)]
pub struct SpannerWriteConfig {
    /// Target database
    #[serde(flatten)]
    #[validate(nested)]
    pub database: SpannerConfig,

    /// Maximum encoded bytes per commit (default: 1 MiB, `<= 0` disables batching)
    #[serde(default = "default_max_batch_size_bytes")]
    pub max_batch_size_bytes: i64,

    /// Maximum rows per commit (default: 50, `<= 0` disables batching)
    #[serde(default = "default_max_number_rows")]
    pub max_number_rows: i64,

    /// Maximum cells per commit (default: 500, `<= 0` disables batching)
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

impl Default for SpannerWriteConfig {
    fn default() -> Self {
        Self::new(SpannerConfig::default())
    }
}

impl SpannerWriteConfig {
    /// Default limits for `database`
    pub fn new(database: SpannerConfig) -> Self {
        Self {
            database,
            max_batch_size_bytes: default_max_batch_size_bytes(),
            max_number_rows: default_max_number_rows(),
            max_number_cells: default_max_number_cells(),
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

    /// Batching limits
    pub fn limits(&self) -> BatchLimits {
        BatchLimits::new(
            self.max_batch_size_bytes,
            self.max_number_rows,
            self.max_number_cells,
        )
    }
}

/// Read coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate, JsonSchema)]
pub struct SpannerReadConfig {
    /// Target database
    #[serde(flatten)]
    #[validate(nested)]
    pub database: SpannerConfig,

    /// Freshness of the snapshot opened for partitioned reads
    #[serde(default)]
    pub snapshot: TimestampBound,

    /// Desired data size per partition
    #[serde(default)]
    #[validate(range(min = 1))]
    pub partition_size_bytes: Option<u64>,

    /// Desired maximum number of partitions
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_partitions: Option<u64>,
}

impl SpannerReadConfig {
    /// Strong reads of `database`
    pub fn new(database: SpannerConfig) -> Self {
        Self {
            database,
            ..Default::default()
        }
    }

    /// Set the snapshot freshness
    pub fn with_snapshot(mut self, bound: TimestampBound) -> Self {
        self.snapshot = bound;
        self
    }

    /// Partition generation hints
    pub fn partition_options(&self) -> PartitionOptions {
        PartitionOptions {
            partition_size_bytes: self.partition_size_bytes,
            max_partitions: self.max_partitions,
        }
    }
}

/// Local pipeline runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, JsonSchema)]
pub struct RunnerConfig {
    /// Elements per bundle (default: 1000)
    #[serde(default = "default_bundle_size")]
    #[validate(range(min = 1))]
    pub bundle_size: usize,

    /// Bundles processed concurrently (default: 4)
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 1024))]
    pub parallelism: usize,
}

fn default_bundle_size() -> usize {
    1000
}

fn default_parallelism() -> usize {
    4
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bundle_size: default_bundle_size(),
            parallelism: default_parallelism(),
        }
    }
}

impl RunnerConfig {
    /// Set the bundle size
    pub fn with_bundle_size(mut self, size: usize) -> Self {
        self.bundle_size = size;
        self
    }

    /// Set the parallelism
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}

/// Validate a config, mapping failures to configuration errors
pub fn validate_config<T: Validate>(config: &T) -> Result<()> {
    config
        .validate()
        .map_err(|e| Error::config(format!("invalid configuration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> SpannerConfig {
        SpannerConfig::new("test-project", "test-instance", "test-db")
    }

    #[test]
    fn test_database_path() {
        assert_eq!(
            database().database_path(),
            "projects/test-project/instances/test-instance/databases/test-db"
        );
    }

    #[test]
    fn test_write_config_defaults() {
        let config: SpannerWriteConfig = serde_json::from_value(serde_json::json!({
            "project_id": "p",
            "instance_id": "i",
            "database_id": "d"
        }))
        .unwrap();

        assert_eq!(config.limits(), BatchLimits::default());
        assert_eq!(config.database.database_id, "d");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_write_config_accepts_disabling_limits() {
        let config = SpannerWriteConfig::new(database()).with_max_number_rows(0);
        assert!(validate_config(&config).is_ok());
        assert!(!config.limits().batching_enabled());
    }

    #[test]
    fn test_empty_database_rejected() {
        let err = validate_config(&SpannerWriteConfig::default()).unwrap_err();
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_read_config_partition_options() {
        let mut config = SpannerReadConfig::new(database());
        config.max_partitions = Some(8);

        let options = config.partition_options();
        assert_eq!(options.max_partitions, Some(8));
        assert_eq!(options.partition_size_bytes, None);
        assert!(config.snapshot.is_strong());
    }

    #[test]
    fn test_runner_config_validation() {
        assert!(validate_config(&RunnerConfig::default()).is_ok());
        assert!(validate_config(&RunnerConfig::default().with_bundle_size(0)).is_err());
    }

    #[test]
    fn test_config_schema() {
        let schema = schemars::schema_for!(SpannerReadConfig);
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json["properties"].get("project_id").is_some());
    }
}
