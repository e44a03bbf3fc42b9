//! `ldap3`-backed directory client
//!
//! Thin adapter from the [`DirectoryClient`] contract onto the `ldap3`
//! async client. Binds with simple auth during construction; each search
//! clones the connection handle, attaches the requested controls as raw
//! controls and lifts the paged-results cookie out of the response.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ldap3::controls::{Control as LdapControl, PagedResults, RawControl};
use ldap3::{drive, Ldap, LdapConnAsync, Scope, SearchEntry};
use tracing::{debug, info};

use crate::client::{
    Control, DirectoryClient, RawAttribute, RawEntry, SearchRequest, SearchResult, SearchScope,
    PAGED_RESULTS_OID, SD_FLAGS_VALUE,
};
use crate::error::{DirectoryError, Result};

/// Authenticated `ldap3` session.
pub struct LdapDirectoryClient {
    ldap: Ldap,
}

impl LdapDirectoryClient {
    /// Dial `url` (e.g. `ldap://dc01.corp.example:389`) and bind with
    /// simple authentication.
    pub async fn connect(url: &str, username: &str, password: &str) -> Result<Self> {
        let (conn, mut ldap) = LdapConnAsync::new(url)
            .await
            .map_err(|e| DirectoryError::unreachable(e.to_string()))?;
        drive!(conn);

        ldap.simple_bind(username, password)
            .await
            .map_err(|e| DirectoryError::bind(e.to_string()))?
            .success()
            .map_err(|e| DirectoryError::bind(e.to_string()))?;

        info!(url, username, "bound to directory");
        Ok(Self { ldap })
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        // The handle is a cheap clone onto the shared connection task.
        let mut ldap = self.ldap.clone();

        let controls: Vec<RawControl> = request.controls.iter().map(to_raw_control).collect();
        let scope = match request.scope {
            SearchScope::Base => Scope::Base,
            SearchScope::Subtree => Scope::Subtree,
        };

        let (entries, response) = ldap
            .with_controls(controls)
            .search(
                &request.base_dn,
                scope,
                &request.filter,
                request.attributes.clone(),
            )
            .await
            .map_err(|e| DirectoryError::search(e.to_string()))?
            .success()
            .map_err(|e| DirectoryError::search(e.to_string()))?;

        let mut paging_cookie = None;
        for LdapControl(_, raw) in &response.ctrls {
            if raw.ctype == PAGED_RESULTS_OID {
                let parsed: PagedResults = raw.parse();
                paging_cookie = Some(parsed.cookie);
            }
        }

        let entries = entries
            .into_iter()
            .map(|re| convert_entry(SearchEntry::construct(re)))
            .collect::<Vec<_>>();

        debug!(
            entries = entries.len(),
            has_cookie = paging_cookie.as_ref().is_some_and(|c| !c.is_empty()),
            "search page received"
        );

        Ok(SearchResult {
            entries,
            paging_cookie,
        })
    }
}

fn to_raw_control(control: &Control) -> RawControl {
    match control {
        Control::PagedResults { size, cookie } => RawControl {
            ctype: control.oid().to_string(),
            crit: true,
            val: Some(encode_paged_value(
                *size,
                cookie.as_deref().unwrap_or_default(),
            )),
        },
        Control::SdFlags => RawControl {
            ctype: control.oid().to_string(),
            crit: false,
            val: Some(SD_FLAGS_VALUE.to_vec()),
        },
        Control::ShowDeleted => RawControl {
            ctype: control.oid().to_string(),
            crit: false,
            val: None,
        },
    }
}

/// `ldap3` splits values between `attrs` (valid UTF-8) and `bin_attrs`;
/// the parser wants raw bytes for everything, so merge them back.
fn convert_entry(entry: SearchEntry) -> RawEntry {
    let mut merged: BTreeMap<String, Vec<Vec<u8>>> = BTreeMap::new();
    for (name, values) in entry.bin_attrs {
        merged.entry(name).or_default().extend(values);
    }
    for (name, values) in entry.attrs {
        merged
            .entry(name)
            .or_default()
            .extend(values.into_iter().map(String::into_bytes));
    }

    RawEntry {
        dn: entry.dn,
        attributes: merged
            .into_iter()
            .map(|(name, values)| RawAttribute::new(name, values))
            .collect(),
    }
}

/// BER-encode the RFC 2696 request value:
/// `SEQUENCE { INTEGER size, OCTET STRING cookie }`.
fn encode_paged_value(size: u32, cookie: &[u8]) -> Vec<u8> {
    let mut int_bytes: Vec<u8> = size
        .to_be_bytes()
        .iter()
        .copied()
        .skip_while(|b| *b == 0)
        .collect();
    if int_bytes.is_empty() {
        int_bytes.push(0);
    }
    // INTEGER is signed; keep the value positive.
    if int_bytes[0] & 0x80 != 0 {
        int_bytes.insert(0, 0);
    }

    let mut content = Vec::with_capacity(int_bytes.len() + cookie.len() + 4);
    content.push(0x02);
    push_ber_len(&mut content, int_bytes.len());
    content.extend_from_slice(&int_bytes);
    content.push(0x04);
    push_ber_len(&mut content, cookie.len());
    content.extend_from_slice(cookie);

    let mut out = Vec::with_capacity(content.len() + 2);
    out.push(0x30);
    push_ber_len(&mut out, content.len());
    out.extend_from_slice(&content);
    out
}

fn push_ber_len(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}
