//! Security identifiers and security descriptors
//!
//! Binary SID parsing per [MS-DTYP] 2.4.2.2 and the collaborator contract
//! for `nTSecurityDescriptor` decoding. The reference parser shipped here
//! reads the self-relative header (revision, control flags, owner and group
//! SIDs, ACE counts); full ACE decoding belongs to a dedicated parser
//! behind the same trait.

use crate::error::{DirectoryError, Result};

/// Parse a binary SID into its canonical `S-R-A-S1-S2-...` string form.
///
/// Layout: 1-byte revision, 1-byte sub-authority count, 6-byte big-endian
/// identifier authority, then count 4-byte little-endian sub-authorities.
pub fn parse_sid_string(sid_bytes: &[u8]) -> Result<String> {
    // Minimum length covers revision, count and the 6-byte authority.
    if sid_bytes.len() < 8 {
        return Err(DirectoryError::invalid_value("SID too short"));
    }

    let revision = sid_bytes[0];
    let sub_authority_count = sid_bytes[1] as usize;

    let expected = 8 + sub_authority_count * 4;
    if sid_bytes.len() < expected {
        return Err(DirectoryError::invalid_value(
            "SID truncated before sub-authorities",
        ));
    }

    let mut authority_bytes = [0u8; 8];
    authority_bytes[2..8].copy_from_slice(&sid_bytes[2..8]);
    let authority = u64::from_be_bytes(authority_bytes);

    let mut sid = format!("S-{}-{}", revision, authority);
    for i in 0..sub_authority_count {
        let offset = 8 + i * 4;
        let sub = u32::from_le_bytes([
            sid_bytes[offset],
            sid_bytes[offset + 1],
            sid_bytes[offset + 2],
            sid_bytes[offset + 3],
        ]);
        sid.push('-');
        sid.push_str(&sub.to_string());
    }

    Ok(sid)
}

/// Decoded header of a self-relative security descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityDescriptor {
    pub revision: u8,
    /// SECURITY_DESCRIPTOR_CONTROL flags
    pub control: u16,
    pub owner_sid: Option<String>,
    pub group_sid: Option<String>,
    pub dacl_ace_count: Option<u16>,
    pub sacl_ace_count: Option<u16>,
}

/// Collaborator contract for decoding `nTSecurityDescriptor` blobs.
pub trait SecurityDescriptorParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<SecurityDescriptor>;
}

/// Reference parser for the fixed 20-byte self-relative header.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderSdParser;

impl HeaderSdParser {
    fn read_offset(raw: &[u8], at: usize) -> usize {
        u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]) as usize
    }

    fn sid_at(raw: &[u8], offset: usize) -> Option<String> {
        if offset == 0 || offset >= raw.len() {
            return None;
        }
        parse_sid_string(&raw[offset..]).ok()
    }

    /// ACE count lives at bytes 4..6 of the ACL header.
    fn ace_count_at(raw: &[u8], offset: usize) -> Option<u16> {
        if offset == 0 || offset + 8 > raw.len() {
            return None;
        }
        Some(u16::from_le_bytes([raw[offset + 4], raw[offset + 5]]))
    }
}

impl SecurityDescriptorParser for HeaderSdParser {
    fn parse(&self, raw: &[u8]) -> Result<SecurityDescriptor> {
        if raw.len() < 20 {
            return Err(DirectoryError::invalid_value(
                "security descriptor shorter than its fixed header",
            ));
        }

        let revision = raw[0];
        let control = u16::from_le_bytes([raw[2], raw[3]]);
        let owner_offset = Self::read_offset(raw, 4);
        let group_offset = Self::read_offset(raw, 8);
        let sacl_offset = Self::read_offset(raw, 12);
        let dacl_offset = Self::read_offset(raw, 16);

        Ok(SecurityDescriptor {
            revision,
            control,
            owner_sid: Self::sid_at(raw, owner_offset),
            group_sid: Self::sid_at(raw, group_offset),
            dacl_ace_count: Self::ace_count_at(raw, dacl_offset),
            sacl_ace_count: Self::ace_count_at(raw, sacl_offset),
        })
    }
}
