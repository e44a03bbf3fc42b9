//! # adwatch-store
//!
//! Persistence side of the adwatch CDC pipeline.
//!
//! - **Snapshots** project a decoded directory object into the canonical,
//!   storable form: the normalized string map keyed by attribute name.
//! - **Diffing** compares two snapshots attribute by attribute.
//! - **Versioning** persists objects, append-only versions and
//!   per-attribute change rows under a single fail-fast batch transaction.
//!
//! Storage sits behind the [`VersionStore`] / [`VersionTx`] contracts. The
//! PostgreSQL backend (feature `postgres`, on by default) is the production
//! path; [`MemoryStore`] backs the test suites.

pub mod error;
pub mod snapshot;
pub mod store;
pub mod versioning;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{Result, StoreError};
pub use snapshot::{compare_snapshots, create_snapshot, AttributeDelta, Snapshot, MODIFIED_BY_SYSTEM};
pub use store::{
    AttributeSchemaRecord, ChangeRow, DomainRecord, MemoryStore, ObjectRow, VersionRow,
    VersionStore, VersionTx,
};
pub use versioning::VersioningService;

#[cfg(feature = "postgres")]
pub use postgres::PgStore;
