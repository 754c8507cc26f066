//! Error types for rivven-spanner
//!
//! Errors are classified so the host pipeline can decide what to do with them:
//! - Construction errors (bad mutation, ambiguous read configuration) fail
//!   before any element is processed
//! - Run-time shape errors (a malformed transaction descriptor) fail at first use
//! - Storage failures (snapshot, partition, read, commit) are propagated as-is;
//!   this crate never retries them itself

use std::fmt;
use thiserror::Error;

/// Result type for rivven-spanner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid construction parameters (not retriable)
    Configuration,
    /// Malformed or unusable shared transaction
    Transaction,
    /// Opening or attaching a read-only snapshot failed
    Snapshot,
    /// Generating or executing a partition failed
    Partition,
    /// Direct query or keyed read failed
    Read,
    /// Atomic commit failed
    Commit,
    /// Transport-level failure talking to the service (retriable)
    Connection,
    /// Deadline exceeded (retriable)
    Timeout,
    /// Transaction aborted by the service (retriable)
    Aborted,
    /// Descriptor or token (de)serialization failure
    Serialization,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable by the host
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::Aborted)
    }
}

/// Main error type for rivven-spanner
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Operator configuration rejected at construction time
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Write mutation rejected at construction time
    #[error("invalid mutation: {message}")]
    InvalidMutation { message: String },

    /// Bound transaction value does not have the descriptor shape
    #[error("{message}")]
    InvalidTransaction { message: String },

    /// Snapshot could not be opened, attached or closed
    #[error("snapshot error: {message}")]
    Snapshot {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Partition generation or execution failed
    #[error("partition error: {message}")]
    Partition {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query or keyed read failed
    #[error("read error: {message}")]
    Read {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Commit of a batch failed
    #[error("commit error: {message}")]
    Commit {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection to the service failed
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Transaction aborted by the service
    #[error("aborted: {message}")]
    Aborted { message: String },

    /// Serialization failure
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } | Self::InvalidMutation { .. } => {
                ErrorCategory::Configuration
            }
            Self::InvalidTransaction { .. } => ErrorCategory::Transaction,
            Self::Snapshot { .. } => ErrorCategory::Snapshot,
            Self::Partition { .. } => ErrorCategory::Partition,
            Self::Read { .. } => ErrorCategory::Read,
            Self::Commit { .. } => ErrorCategory::Commit,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Aborted { .. } => ErrorCategory::Aborted,
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error was raised before any data was processed
    #[inline]
    pub fn is_construction_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid mutation error
    pub fn invalid_mutation(message: impl Into<String>) -> Self {
        Self::InvalidMutation {
            message: message.into(),
        }
    }

    /// Create an invalid transaction error
    pub fn invalid_transaction(message: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            message: message.into(),
        }
    }

    /// Create a snapshot error
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
            source: None,
        }
    }

    /// Create a snapshot error with source
    pub fn snapshot_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Snapshot {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a partition error
    pub fn partition(message: impl Into<String>) -> Self {
        Self::Partition {
            message: message.into(),
            source: None,
        }
    }

    /// Create a read error
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a read error with SQL
    pub fn read_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a commit error
    pub fn commit(message: impl Into<String>) -> Self {
        Self::Commit {
            message: message.into(),
            source: None,
        }
    }

    /// Create a commit error with source
    pub fn commit_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Commit {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an aborted error
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Transaction => write!(f, "transaction"),
            Self::Snapshot => write!(f, "snapshot"),
            Self::Partition => write!(f, "partition"),
            Self::Read => write!(f, "read"),
            Self::Commit => write!(f, "commit"),
            Self::Connection => write!(f, "connection"),
            Self::Timeout => write!(f, "timeout"),
            Self::Aborted => write!(f, "aborted"),
            Self::Serialization => write!(f, "serialization"),
            Self::Other => write!(f, "other"),
        }
    }
}
