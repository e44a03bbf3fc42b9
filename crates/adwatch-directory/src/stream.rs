//! Directory session and change stream
//!
//! [`Directory`] wraps an authenticated [`DirectoryClient`] with the
//! operations the pipeline needs:
//!
//! - schema-partition load into the [`SchemaRegistry`]
//! - Root DSE `highestCommittedUSN` reads
//! - the domain's own `objectGUID`
//! - cookie-driven paged drains, with the change-stream controls attached
//!
//! Paging is driven from this side: each response's paging cookie is fed
//! back into the next request until the server returns an empty cookie.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{Control, DirectoryClient, RawEntry, SearchRequest, SearchResult, SearchScope};
use crate::error::{DirectoryError, Result};
use crate::schema::{AttributeSchema, SchemaRegistry};
use crate::transform::ad_guids;

/// Attributes read for each `attributeSchema` entry during schema load.
const SCHEMA_ATTRIBUTES: [&str; 7] = [
    "cn",
    "lDAPDisplayName",
    "attributeID",
    "attributeSyntax",
    "oMSyntax",
    "isSingleValued",
    "objectGUID",
];

/// An authenticated session against one domain.
pub struct Directory {
    client: Arc<dyn DirectoryClient>,
    base_dn: String,
    page_size: u32,
}

impl Directory {
    pub fn new(client: Arc<dyn DirectoryClient>, base_dn: impl Into<String>, page_size: u32) -> Self {
        Self {
            client,
            base_dn: base_dn.into(),
            page_size,
        }
    }

    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// Run a paged search, invoking `handler` once per returned page.
    pub async fn paged_search<F, Fut>(
        &self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
        extra_controls: &[Control],
        mut handler: F,
    ) -> Result<()>
    where
        F: FnMut(Vec<RawEntry>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut cookie: Option<Vec<u8>> = None;
        loop {
            let mut request =
                SearchRequest::new(base_dn, scope, filter).with_attributes(attributes);
            request.controls.push(Control::PagedResults {
                size: self.page_size,
                cookie: cookie.clone(),
            });
            request.controls.extend(extra_controls.iter().cloned());

            let SearchResult {
                entries,
                paging_cookie,
            } = self.client.search(&request).await?;

            debug!(page_entries = entries.len(), filter, "received search page");
            handler(entries).await?;

            match paging_cookie {
                Some(next) if !next.is_empty() => cookie = Some(next),
                _ => break,
            }
        }
        Ok(())
    }

    /// Drain the change stream for `filter`, one handler call per page.
    ///
    /// Every request carries the SD-flags and show-deleted controls so
    /// security descriptors and tombstones are included.
    pub async fn for_each_change_page<F, Fut>(&self, filter: &str, handler: F) -> Result<()>
    where
        F: FnMut(Vec<RawEntry>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        debug!(filter, "starting change drain");
        self.paged_search(
            &self.base_dn,
            SearchScope::Subtree,
            filter,
            &[],
            &[Control::SdFlags, Control::ShowDeleted],
            handler,
        )
        .await
    }

    /// Drain the change stream into a single list.
    pub async fn collect_changes(&self, filter: &str) -> Result<Vec<RawEntry>> {
        let mut all = Vec::new();
        self.for_each_change_page(filter, |mut entries| {
            all.append(&mut entries);
            std::future::ready(Ok(()))
        })
        .await?;
        Ok(all)
    }

    /// Load every `attributeSchema` entry from the schema partition into
    /// the registry. Returns the number of attributes registered. A schema
    /// attribute the registry cannot map is fatal.
    pub async fn load_schema(&self, registry: &mut SchemaRegistry) -> Result<usize> {
        let schema_base = format!("CN=Schema,CN=Configuration,{}", self.base_dn);
        let mut loaded = 0usize;

        self.paged_search(
            &schema_base,
            SearchScope::Subtree,
            "(objectClass=attributeSchema)",
            &SCHEMA_ATTRIBUTES,
            &[],
            |entries| {
                let result = register_schema_entries(registry, &entries, &mut loaded);
                std::future::ready(result)
            },
        )
        .await?;

        info!(attributes = loaded, "schema load complete");
        Ok(loaded)
    }

    /// `highestCommittedUSN` from the Root DSE.
    pub async fn highest_committed_usn(&self) -> Result<i64> {
        let request = SearchRequest::new("", SearchScope::Base, "(objectClass=*)")
            .with_attributes(&["highestCommittedUSN"]);
        let result = self.client.search(&request).await?;

        let value = result
            .entries
            .first()
            .and_then(|e| e.first_str("highestCommittedUSN"))
            .ok_or_else(|| {
                DirectoryError::search("highestCommittedUSN not found in the Root DSE")
            })?;

        value
            .parse()
            .map_err(|e| DirectoryError::search(format!("invalid highestCommittedUSN: {e}")))
    }

    /// The domain's own `objectGUID`, read from the base DN entry. Used as
    /// the domain identity in the store.
    pub async fn domain_guid(&self) -> Result<Uuid> {
        let request =
            SearchRequest::new(&self.base_dn, SearchScope::Base, "(objectClass=*)")
                .with_attributes(&["objectGUID"]);
        let result = self.client.search(&request).await?;

        let raw = result
            .entries
            .first()
            .and_then(|e| e.first_value("objectGUID"))
            .ok_or_else(|| DirectoryError::search("base DN entry has no objectGUID"))?;

        Ok(ad_guids(&[raw.to_vec()])?[0])
    }
}

fn register_schema_entries(
    registry: &mut SchemaRegistry,
    entries: &[RawEntry],
    loaded: &mut usize,
) -> Result<()> {
    for entry in entries {
        let attribute_name = required_str(entry, "cn")?;
        let ldap_display_name = required_str(entry, "lDAPDisplayName")?;
        let attribute_id = required_str(entry, "attributeID")?;
        let syntax_oid = required_str(entry, "attributeSyntax")?;
        let om_syntax = required_str(entry, "oMSyntax")?;

        let is_single_valued = match required_str(entry, "isSingleValued")? {
            "TRUE" => true,
            "FALSE" => false,
            other => {
                return Err(DirectoryError::invalid_value(format!(
                    "invalid isSingleValued value {other:?} on {}",
                    entry.dn
                )))
            }
        };

        let raw_guid = entry.first_value("objectGUID").ok_or_else(|| {
            DirectoryError::invalid_value(format!("schema entry {} has no objectGUID", entry.dn))
        })?;
        let schema_object_guid = ad_guids(&[raw_guid.to_vec()])?[0];

        let field_type = registry
            .lookup(syntax_oid, om_syntax, ldap_display_name)?
            .clone();

        registry.register_attribute_schema(AttributeSchema {
            attribute_name: attribute_name.to_string(),
            ldap_display_name: ldap_display_name.to_string(),
            attribute_id: attribute_id.to_string(),
            syntax_oid: syntax_oid.to_string(),
            om_syntax: om_syntax.to_string(),
            field_type,
            is_single_valued,
            schema_object_guid,
        });
        *loaded += 1;
    }
    Ok(())
}

fn required_str<'a>(entry: &'a RawEntry, name: &str) -> Result<&'a str> {
    entry.first_str(name).ok_or_else(|| {
        DirectoryError::invalid_value(format!("schema entry {} is missing {name}", entry.dn))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::HeaderSdParser;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted pages and records every request it sees.
    struct ScriptedClient {
        pages: Mutex<VecDeque<SearchResult>>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    impl ScriptedClient {
        fn new(pages: Vec<SearchResult>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<SearchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DirectoryClient for ScriptedClient {
        async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    fn page(dns: &[&str], cookie: Option<&[u8]>) -> SearchResult {
        SearchResult {
            entries: dns.iter().map(|dn| RawEntry::new(*dn)).collect(),
            paging_cookie: cookie.map(|c| c.to_vec()),
        }
    }

    #[tokio::test]
    async fn test_collect_changes_follows_cookie() {
        let client = Arc::new(ScriptedClient::new(vec![
            page(&["CN=a"], Some(b"next-1")),
            page(&["CN=b", "CN=c"], Some(b"next-2")),
            page(&["CN=d"], Some(b"")),
        ]));
        let directory = Directory::new(client.clone(), "DC=corp,DC=example", 1000);

        let entries = directory.collect_changes("(uSNChanged>=1)").await.unwrap();
        assert_eq!(entries.len(), 4);

        let requests = client.requests();
        assert_eq!(requests.len(), 3);

        // Cookie from each response is echoed into the next request.
        let cookies: Vec<Option<Vec<u8>>> = requests
            .iter()
            .map(|r| {
                r.controls.iter().find_map(|c| match c {
                    Control::PagedResults { cookie, .. } => Some(cookie.clone()),
                    _ => None,
                })
            })
            .map(Option::unwrap)
            .collect();
        assert_eq!(cookies[0], None);
        assert_eq!(cookies[1], Some(b"next-1".to_vec()));
        assert_eq!(cookies[2], Some(b"next-2".to_vec()));

        // Every change request carries the SD-flags and show-deleted controls.
        for request in &requests {
            assert!(request.controls.contains(&Control::SdFlags));
            assert!(request.controls.contains(&Control::ShowDeleted));
        }
    }

    fn schema_entry(cn: &str, name: &str, syntax: &str, om: &str) -> RawEntry {
        RawEntry::new(format!("CN={cn},CN=Schema,CN=Configuration,DC=corp,DC=example"))
            .with_str_attribute("cn", &[cn])
            .with_str_attribute("lDAPDisplayName", &[name])
            .with_str_attribute("attributeID", &["1.2.840.113556.1.4.1"])
            .with_str_attribute("attributeSyntax", &[syntax])
            .with_str_attribute("oMSyntax", &[om])
            .with_str_attribute("isSingleValued", &["TRUE"])
            .with_attribute("objectGUID", vec![vec![7u8; 16]])
    }

    #[tokio::test]
    async fn test_load_schema_registers_attributes() {
        let client = Arc::new(ScriptedClient::new(vec![SearchResult {
            entries: vec![
                schema_entry("Common-Name", "cn", "2.5.5.12", "64"),
                schema_entry("USN-Changed", "uSNChanged", "2.5.5.16", "65"),
            ],
            paging_cookie: None,
        }]));
        let directory = Directory::new(client.clone(), "DC=corp,DC=example", 1000);
        let mut registry = SchemaRegistry::new(Arc::new(HeaderSdParser));

        let loaded = directory.load_schema(&mut registry).await.unwrap();
        assert_eq!(loaded, 2);
        assert!(registry.attribute_schema("cn").is_some());

        // The search targets the schema partition under the base DN.
        let requests = client.requests();
        assert!(requests[0]
            .base_dn
            .starts_with("CN=Schema,CN=Configuration,"));
    }

    #[tokio::test]
    async fn test_load_schema_unknown_mapping_is_fatal() {
        let client = Arc::new(ScriptedClient::new(vec![SearchResult {
            entries: vec![schema_entry("Weird", "weirdAttr", "2.5.5.99", "999")],
            paging_cookie: None,
        }]));
        let directory = Directory::new(client, "DC=corp,DC=example", 1000);
        let mut registry = SchemaRegistry::new(Arc::new(HeaderSdParser));

        let err = directory.load_schema(&mut registry).await.unwrap_err();
        assert!(matches!(err, DirectoryError::SchemaMapping { .. }));
    }

    #[tokio::test]
    async fn test_load_schema_rejects_bad_single_valued() {
        let mut entry = schema_entry("Common-Name", "cn", "2.5.5.12", "64");
        for attr in &mut entry.attributes {
            if attr.name == "isSingleValued" {
                attr.values = vec![b"MAYBE".to_vec()];
            }
        }
        let client = Arc::new(ScriptedClient::new(vec![SearchResult {
            entries: vec![entry],
            paging_cookie: None,
        }]));
        let directory = Directory::new(client, "DC=corp,DC=example", 1000);
        let mut registry = SchemaRegistry::new(Arc::new(HeaderSdParser));

        assert!(directory.load_schema(&mut registry).await.is_err());
    }

    #[tokio::test]
    async fn test_highest_committed_usn() {
        let client = Arc::new(ScriptedClient::new(vec![SearchResult {
            entries: vec![
                RawEntry::new("").with_str_attribute("highestCommittedUSN", &["123456"])
            ],
            paging_cookie: None,
        }]));
        let directory = Directory::new(client.clone(), "DC=corp,DC=example", 1000);

        assert_eq!(directory.highest_committed_usn().await.unwrap(), 123_456);

        // Root DSE reads use an empty base and base scope.
        let request = &client.requests()[0];
        assert_eq!(request.base_dn, "");
        assert_eq!(request.scope, SearchScope::Base);
    }

    #[tokio::test]
    async fn test_highest_committed_usn_missing() {
        let client = Arc::new(ScriptedClient::new(vec![SearchResult::default()]));
        let directory = Directory::new(client, "DC=corp,DC=example", 1000);
        assert!(directory.highest_committed_usn().await.is_err());
    }

    #[tokio::test]
    async fn test_domain_guid() {
        let guid: Vec<u8> = vec![
            0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0xa7, 0xb8, 0xc9, 0xda, 0xeb, 0xfc, 0xfd, 0xfe,
            0xff, 0x00,
        ];
        let client = Arc::new(ScriptedClient::new(vec![SearchResult {
            entries: vec![
                RawEntry::new("DC=corp,DC=example").with_attribute("objectGUID", vec![guid])
            ],
            paging_cookie: None,
        }]));
        let directory = Directory::new(client, "DC=corp,DC=example", 1000);

        let id = directory.domain_guid().await.unwrap();
        assert_eq!(id.to_string(), "d4c3b2a1-f6e5-b8a7-c9da-ebfcfdfeff00");
    }
}
