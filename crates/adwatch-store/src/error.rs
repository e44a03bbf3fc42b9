//! Error types for the store
//!
//! Store errors are fatal to the batch that raised them: the transaction
//! rolls back, the watermark stays put and the next cycle retries the same
//! range. `MissingUsn` is the exception; it is raised per entry while
//! building snapshots and only drops that entry.

use thiserror::Error;

/// Errors raised by snapshotting, versioning and the storage backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Invalid configuration (bad DSN, missing database name)
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not obtain a pooled connection
    #[error("pool error: {0}")]
    Pool(String),

    /// A query failed
    #[error("query error: {0}")]
    Query(String),

    /// Beginning, committing or rolling back a transaction failed
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The object carries no parseable `uSNChanged`; versioning is
    /// impossible without it
    #[error("object {dn} is missing a usable uSNChanged attribute")]
    MissingUsn { dn: String },

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a pool error
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a missing-USN error for `dn`
    pub fn missing_usn(dn: impl Into<String>) -> Self {
        Self::MissingUsn { dn: dn.into() }
    }

    /// Per-entry errors drop the entry; everything else fails the batch.
    pub fn is_per_entry(&self) -> bool {
        matches!(self, Self::MissingUsn { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Query(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
