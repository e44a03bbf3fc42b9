//! Directory client contract
//!
//! The LDAP protocol (connection management, BER framing, bind flows)
//! stays behind [`DirectoryClient`]. The pipeline only needs one
//! operation: execute a search and hand back entries plus the paging
//! cookie from the response controls.

use async_trait::async_trait;

use crate::error::Result;

/// Paged-results control, RFC 2696.
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";
/// Show-deleted control: tombstoned objects are returned.
pub const SHOW_DELETED_OID: &str = "1.2.840.113556.1.4.417";
/// Security-descriptor-flags control.
pub const SD_FLAGS_OID: &str = "1.2.840.113556.1.4.801";

/// BER-encoded SD-flags value requesting owner, group and DACL
/// (`SEQUENCE { INTEGER 7 }`).
pub const SD_FLAGS_VALUE: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x07];

/// One attribute of a raw search entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    /// Raw byte values, one per attribute value
    pub values: Vec<Vec<u8>>,
}

impl RawAttribute {
    pub fn new(name: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// A search entry as returned by the directory, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEntry {
    pub dn: String,
    pub attributes: Vec<RawAttribute>,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        self.attributes.push(RawAttribute::new(name, values));
        self
    }

    /// Convenience for string-valued attributes.
    pub fn with_str_attribute(self, name: impl Into<String>, values: &[&str]) -> Self {
        self.with_attribute(
            name,
            values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        )
    }

    /// First raw value of an attribute, if present.
    pub fn first_value(&self, name: &str) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.values.first())
            .map(|v| v.as_slice())
    }

    /// First value of an attribute decoded as UTF-8.
    pub fn first_str(&self, name: &str) -> Option<&str> {
        self.first_value(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base object only (Root DSE reads, single-entry fetches)
    Base,
    /// The whole subtree under the base DN
    Subtree,
}

/// Request controls the pipeline attaches to searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// RFC 2696 paging with an opaque server cookie
    PagedResults { size: u32, cookie: Option<Vec<u8>> },
    /// Request owner, group and DACL in `nTSecurityDescriptor`
    SdFlags,
    /// Include tombstoned objects in results
    ShowDeleted,
}

impl Control {
    pub fn oid(&self) -> &'static str {
        match self {
            Self::PagedResults { .. } => PAGED_RESULTS_OID,
            Self::SdFlags => SD_FLAGS_OID,
            Self::ShowDeleted => SHOW_DELETED_OID,
        }
    }
}

/// A directory search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Attributes to return; empty means all
    pub attributes: Vec<String>,
    pub controls: Vec<Control>,
}

impl SearchRequest {
    pub fn new(base_dn: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            controls: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: &[&str]) -> Self {
        self.attributes = attributes.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }
}

/// Result of one search request (one page, when paging is active).
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub entries: Vec<RawEntry>,
    /// Cookie from the paged-results response control; `None` or empty
    /// means the drain is complete.
    pub paging_cookie: Option<Vec<u8>>,
}

/// An authenticated directory session.
///
/// Implementations bind during construction; unauthenticated reads are not
/// supported by the pipeline.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Execute a single search request and return the entries plus any
    /// paging cookie found in the response controls.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_oids() {
        let paged = Control::PagedResults {
            size: 1000,
            cookie: None,
        };
        assert_eq!(paged.oid(), "1.2.840.113556.1.4.319");
        assert_eq!(Control::SdFlags.oid(), "1.2.840.113556.1.4.801");
        assert_eq!(Control::ShowDeleted.oid(), "1.2.840.113556.1.4.417");
    }

    #[test]
    fn test_sd_flags_ber_value() {
        assert_eq!(SD_FLAGS_VALUE, [0x30, 0x03, 0x02, 0x01, 0x07]);
    }

    #[test]
    fn test_raw_entry_accessors() {
        let entry = RawEntry::new("CN=Alice,DC=corp,DC=example")
            .with_str_attribute("cn", &["Alice"])
            .with_attribute("objectGUID", vec![vec![0u8; 16]]);

        assert_eq!(entry.first_str("cn"), Some("Alice"));
        assert_eq!(entry.first_value("objectGUID").map(|v| v.len()), Some(16));
        assert_eq!(entry.first_str("missing"), None);
    }
}
