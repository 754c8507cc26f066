//! Shared read-only transactions
//!
//! A pipeline creates one read-only snapshot up front with
//! [`create_transaction`] and hands its [`TransactionDescriptor`] to every
//! read that should observe the same point in time. The descriptor is a
//! plain serializable value; it is never mutated after creation. The
//! returned [`SharedTransaction`] owns the session and closes it once the
//! reads are done.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{BatchSnapshot, SpannerClient};
use crate::error::{Error, Result};

/// Freshness of a read-only snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimestampBound {
    /// Observe all transactions committed before the read starts
    #[default]
    Strong,
    /// Read at exactly this much in the past
    ExactStaleness {
        /// Staleness
        #[serde(with = "duration_secs")]
        #[schemars(with = "f64")]
        staleness: Duration,
    },
    /// Read at most this much in the past
    MaxStaleness {
        /// Maximum staleness
        #[serde(with = "duration_secs")]
        #[schemars(with = "f64")]
        staleness: Duration,
    },
    /// Read at a fixed commit timestamp
    ReadTimestamp {
        /// Timestamp to read at
        timestamp: DateTime<Utc>,
    },
}

impl TimestampBound {
    /// Bound for reads at exactly `staleness` in the past
    pub fn exact_staleness(staleness: Duration) -> Self {
        Self::ExactStaleness { staleness }
    }

    /// Bound for reads at most `staleness` in the past
    pub fn max_staleness(staleness: Duration) -> Self {
        Self::MaxStaleness { staleness }
    }

    /// Bound for reads at `timestamp`
    pub fn read_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self::ReadTimestamp { timestamp }
    }

    /// Resolve the optional snapshot settings of a read or transaction
    ///
    /// Neither set means strong; both set is ambiguous and rejected.
    pub fn from_options(
        read_timestamp: Option<DateTime<Utc>>,
        exact_staleness: Option<Duration>,
    ) -> Result<Self> {
        match (read_timestamp, exact_staleness) {
            (Some(_), Some(_)) => Err(Error::config(
                "read_timestamp and exact_staleness are mutually exclusive",
            )),
            (Some(timestamp), None) => Ok(Self::read_timestamp(timestamp)),
            (None, Some(staleness)) => Ok(Self::exact_staleness(staleness)),
            (None, None) => Ok(Self::Strong),
        }
    }

    /// Whether the bound reads the latest data
    pub fn is_strong(&self) -> bool {
        matches!(self, Self::Strong)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Identifiers of a read-only snapshot shared across reads
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TransactionDescriptor {
    /// Session the snapshot lives in
    pub session_id: String,
    /// Read-only transaction within the session
    pub transaction_id: String,
}

impl TransactionDescriptor {
    /// Create a descriptor from its identifiers
    pub fn new(session_id: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Serialized form broadcast to readers
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.session_id,
            "transaction_id": self.transaction_id,
        })
    }

    /// Check the shape of a broadcast value and decode it
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let invalid = |reason: &str| {
            Error::invalid_transaction(format!(
                "Invalid transaction object: {value}. {reason}; \
                 use create_transaction to obtain a valid transaction"
            ))
        };

        let descriptor: Self = serde_json::from_value(value.clone())
            .map_err(|e| invalid(&format!("expected session_id and transaction_id ({e})")))?;
        if descriptor.session_id.is_empty() || descriptor.transaction_id.is_empty() {
            return Err(invalid("session_id and transaction_id must not be empty"));
        }
        Ok(descriptor)
    }
}

/// Read-only snapshot shared by many reads
///
/// Readers only ever see the [`descriptor`](Self::descriptor). The session
/// stays open until [`close`](Self::close) is called.
pub struct SharedTransaction {
    descriptor: TransactionDescriptor,
    snapshot: Arc<dyn BatchSnapshot>,
}

impl SharedTransaction {
    /// Identifiers handed to readers
    pub fn descriptor(&self) -> &TransactionDescriptor {
        &self.descriptor
    }

    /// Serialized descriptor for broadcast
    pub fn to_value(&self) -> serde_json::Value {
        self.descriptor.to_value()
    }

    /// Release the session; reads bound to the descriptor fail afterwards
    pub async fn close(self) -> Result<()> {
        self.snapshot.close().await?;
        debug!(session_id = %self.descriptor.session_id, "Closed shared transaction");
        Ok(())
    }
}

impl fmt::Debug for SharedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTransaction")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Open one read-only snapshot to be shared by many reads
pub async fn create_transaction(
    client: &dyn SpannerClient,
    bound: TimestampBound,
) -> Result<SharedTransaction> {
    let snapshot = client.batch_snapshot(&bound).await?;
    let descriptor = snapshot.descriptor();
    info!(
        session_id = %descriptor.session_id,
        transaction_id = %descriptor.transaction_id,
        bound = ?bound,
        "Created shared read-only transaction"
    );
    Ok(SharedTransaction {
        descriptor,
        snapshot,
    })
}
