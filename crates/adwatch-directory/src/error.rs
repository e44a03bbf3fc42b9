//! Error types for directory operations
//!
//! Per-entry errors (`EntryParse`) are logged and dropped by the caller;
//! everything else is fatal to the current cycle or to startup.

use thiserror::Error;

/// Errors raised while talking to or decoding the directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Invalid configuration (empty base DN, zero page size, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not reach the domain controller
    #[error("directory unreachable: {0}")]
    Unreachable(String),

    /// Bind (authentication) failed
    #[error("bind failed: {0}")]
    Bind(String),

    /// An LDAP search failed
    #[error("search failed: {0}")]
    Search(String),

    /// The registry has no mapping for a schema attribute. Fatal at schema
    /// load: an unmapped attribute means the whole decode pipeline is
    /// unusable for that attribute type.
    #[error("no type mapping for syntax={syntax_oid} oMSyntax={om_syntax} attribute={ldap_display_name}")]
    SchemaMapping {
        syntax_oid: String,
        om_syntax: String,
        ldap_display_name: String,
    },

    /// Structural failure while parsing a single entry; the entry is dropped
    /// from the batch.
    #[error("failed to parse entry {dn}: {message}")]
    EntryParse { dn: String, message: String },

    /// A raw value could not be decoded by a transformer
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl DirectoryError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an unreachable error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    /// Create a bind error
    pub fn bind(msg: impl Into<String>) -> Self {
        Self::Bind(msg.into())
    }

    /// Create a search error
    pub fn search(msg: impl Into<String>) -> Self {
        Self::Search(msg.into())
    }

    /// Create an invalid value error
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Create a per-entry parse error
    pub fn entry_parse(dn: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::EntryParse {
            dn: dn.into(),
            message: msg.into(),
        }
    }

    /// Per-entry errors never fail a cycle; the entry is dropped instead.
    pub fn is_per_entry(&self) -> bool {
        matches!(self, Self::EntryParse { .. })
    }
}

/// Result type for directory operations
pub type Result<T> = std::result::Result<T, DirectoryError>;
