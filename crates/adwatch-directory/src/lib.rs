//! # adwatch-directory
//!
//! Active Directory side of the adwatch CDC pipeline.
//!
//! This crate turns raw LDAP search results into typed directory objects:
//!
//! - **Transformers** normalize raw attribute bytes to canonical strings and
//!   interpret them as typed values (UUID, FILETIME, SID, security
//!   descriptor, integers).
//! - **Schema registry** maps `(attributeSyntax, oMSyntax)` pairs and
//!   per-attribute overrides to a decoding pipeline, loaded once from the
//!   directory's schema partition.
//! - **Entry parser** applies the registry to a raw entry and produces a
//!   [`DirectoryObject`].
//! - **Change stream** issues paged searches filtered on `uSNChanged` and
//!   drives the paging cookie until the drain completes.
//!
//! The LDAP wire protocol stays behind the [`DirectoryClient`] trait; an
//! `ldap3`-backed implementation is available with the `ldap` feature
//! (enabled by default).
//!
//! ```text
//! ┌───────────┐    ┌──────────────┐    ┌─────────────────┐
//! │ Directory │───▶│ Change pages │───▶│ EntryParser     │
//! │ (LDAP)    │    │ (uSNChanged) │    │ (registry + C1) │
//! └───────────┘    └──────────────┘    └─────────────────┘
//! ```

pub mod client;
pub mod error;
pub mod filter;
pub mod object;
pub mod parser;
pub mod schema;
pub mod sd;
pub mod stream;
pub mod transform;
pub mod value;

#[cfg(feature = "ldap")]
pub mod ldap;

pub use client::{Control, DirectoryClient, RawAttribute, RawEntry, SearchRequest, SearchResult, SearchScope};
pub use error::{DirectoryError, Result};
pub use filter::Filter;
pub use object::{AttributeValue, DirectoryObject};
pub use parser::EntryParser;
pub use schema::{AttributeSchema, FieldType, SchemaRegistry};
pub use sd::{HeaderSdParser, SecurityDescriptor, SecurityDescriptorParser};
pub use stream::Directory;
pub use transform::Transformer;
pub use value::{LogicalType, Value};

#[cfg(feature = "ldap")]
pub use ldap::LdapDirectoryClient;
