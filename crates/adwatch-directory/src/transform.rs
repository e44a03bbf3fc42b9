//! Value transformers
//!
//! Every registry entry carries one [`Transformer`]. Each transformer
//! exposes two capabilities:
//!
//! - `normalize`: raw byte values to canonical strings, one output per
//!   input value. This is the form that gets snapshotted and diffed.
//! - `interpret`: raw byte values to typed [`Value`]s. Interpretation may
//!   fail without failing the attribute; the normalized form stays the
//!   source of truth.
//!
//! Transformers are a closed enum rather than a trait-object hierarchy, so
//! the full set of decoding behaviors is visible in one place.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::{DirectoryError, Result};
use crate::sd::{parse_sid_string, SecurityDescriptorParser};
use crate::value::Value;

/// 100ns intervals between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;
/// FILETIME sentinel meaning "never" (account never expires, etc).
const FILETIME_NEVER: i64 = i64::MAX;

/// Generalized-Time layout, e.g. `20240101120000.0Z`.
const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%S%.fZ";

/// Decoding pipeline for one attribute syntax.
#[derive(Clone)]
pub enum Transformer {
    /// UTF-8 string, falling back to base64 for binary blobs
    Simple,
    /// Always base64; no typed interpretation
    Base64,
    /// Binary SID to `S-R-A-...` string form
    Sid,
    /// 16-byte little-endian AD GUID to RFC 4122
    Guid,
    /// 64-bit FILETIME integer to a UTC timestamp
    Filetime,
    /// LDAP Generalized-Time string to a UTC timestamp
    LdapTime,
    /// String normalizer with a 32-bit integer interpreter
    Int32,
    /// String normalizer with a 64-bit integer interpreter
    Int64,
    /// `nTSecurityDescriptor`: base64 normalizer, descriptor parser interpreter
    Ntsd(Arc<dyn SecurityDescriptorParser>),
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "Simple",
            Self::Base64 => "Base64",
            Self::Sid => "Sid",
            Self::Guid => "Guid",
            Self::Filetime => "Filetime",
            Self::LdapTime => "LdapTime",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Ntsd(_) => "Ntsd",
        };
        f.write_str(name)
    }
}

impl Transformer {
    /// Normalize raw values to their canonical string form.
    ///
    /// On success the output has one string per input value.
    pub fn normalize(&self, values: &[Vec<u8>]) -> Result<Vec<String>> {
        match self {
            Self::Simple | Self::Int32 | Self::Int64 => Ok(simple_strings(values)),
            Self::Base64 => Ok(values.iter().map(|b| BASE64.encode(b)).collect()),
            Self::Sid => values.iter().map(|b| parse_sid_string(b)).collect(),
            Self::Guid => {
                let uuids = ad_guids(values)?;
                Ok(uuids.iter().map(Uuid::to_string).collect())
            }
            Self::Filetime => values
                .iter()
                .map(|b| {
                    Ok(match filetime_bytes_to_time(b)? {
                        Some(t) => t.to_string(),
                        None => "N/A".to_string(),
                    })
                })
                .collect(),
            Self::LdapTime => {
                let times = generalized_times(values)?;
                Ok(times.iter().map(|t| t.to_string()).collect())
            }
            Self::Ntsd(_) => values
                .iter()
                .map(|b| {
                    if std::str::from_utf8(b).is_ok() {
                        Err(DirectoryError::invalid_value(
                            "nTSecurityDescriptor must not be a valid UTF-8 string",
                        ))
                    } else {
                        Ok(BASE64.encode(b))
                    }
                })
                .collect(),
        }
    }

    /// Interpret raw values as typed values.
    pub fn interpret(&self, values: &[Vec<u8>]) -> Result<Vec<Value>> {
        match self {
            Self::Simple => Ok(simple_strings(values)
                .into_iter()
                .map(Value::String)
                .collect()),
            Self::Base64 => Ok(Vec::new()),
            Self::Sid => values
                .iter()
                .map(|b| parse_sid_string(b).map(Value::Sid))
                .collect(),
            Self::Guid => Ok(ad_guids(values)?.into_iter().map(Value::Uuid).collect()),
            Self::Filetime => {
                let mut out = Vec::with_capacity(values.len());
                for b in values {
                    if let Some(t) = filetime_bytes_to_time(b)? {
                        out.push(Value::Time(t));
                    }
                }
                Ok(out)
            }
            Self::LdapTime => Ok(generalized_times(values)?
                .into_iter()
                .map(Value::Time)
                .collect()),
            Self::Int32 => values
                .iter()
                .map(|b| {
                    utf8_str(b)?
                        .parse::<i32>()
                        .map(Value::Int32)
                        .map_err(|e| DirectoryError::invalid_value(format!("not a 32-bit integer: {e}")))
                })
                .collect(),
            Self::Int64 => values
                .iter()
                .map(|b| {
                    utf8_str(b)?
                        .parse::<i64>()
                        .map(Value::Int64)
                        .map_err(|e| DirectoryError::invalid_value(format!("not a 64-bit integer: {e}")))
                })
                .collect(),
            Self::Ntsd(parser) => values
                .iter()
                .map(|b| parser.parse(b).map(Value::SecurityDescriptor))
                .collect(),
        }
    }
}

fn utf8_str(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|_| DirectoryError::invalid_value("expected a UTF-8 string value"))
}

/// UTF-8 pass-through with a base64 fallback for binary blobs.
fn simple_strings(values: &[Vec<u8>]) -> Vec<String> {
    values
        .iter()
        .map(|b| match std::str::from_utf8(b) {
            Ok(s) => s.to_string(),
            Err(_) => {
                warn!("binary blob in a string-typed attribute, base64 encoding it");
                BASE64.encode(b)
            }
        })
        .collect()
}

/// Convert 16-byte little-endian AD GUIDs into RFC 4122 UUIDs.
///
/// The first three fields are stored little-endian on the wire; bytes
/// 8..16 are already in network order.
pub fn ad_guids(values: &[Vec<u8>]) -> Result<Vec<Uuid>> {
    let mut out = Vec::with_capacity(values.len());
    for (i, raw) in values.iter().enumerate() {
        if raw.len() != 16 {
            return Err(DirectoryError::invalid_value(format!(
                "invalid GUID at index {i}: expected 16 bytes, got {}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(raw);
        bytes[0..4].reverse();
        bytes[4..6].reverse();
        bytes[6..8].reverse();
        out.push(Uuid::from_bytes(bytes));
    }
    Ok(out)
}

/// Parse a FILETIME carried as a decimal string.
///
/// `""`, `"0"` and the i64::MAX sentinel all mean "never" and yield `None`.
fn filetime_bytes_to_time(bytes: &[u8]) -> Result<Option<DateTime<Utc>>> {
    let s = utf8_str(bytes)?;
    if s.is_empty() || s == "0" {
        return Ok(None);
    }
    let ft: i64 = s
        .parse()
        .map_err(|e| DirectoryError::invalid_value(format!("invalid FILETIME integer: {e}")))?;
    if ft == 0 || ft == FILETIME_NEVER {
        return Ok(None);
    }
    let ns = ft
        .checked_sub(FILETIME_UNIX_OFFSET)
        .and_then(|v| v.checked_mul(100))
        .ok_or_else(|| DirectoryError::invalid_value("FILETIME out of range"))?;
    let secs = ns.div_euclid(1_000_000_000);
    let nanos = ns.rem_euclid(1_000_000_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(Some)
        .ok_or_else(|| DirectoryError::invalid_value("FILETIME out of range"))
}

fn generalized_times(values: &[Vec<u8>]) -> Result<Vec<DateTime<Utc>>> {
    values
        .iter()
        .map(|b| {
            let s = utf8_str(b)?;
            NaiveDateTime::parse_from_str(s, GENERALIZED_TIME_FORMAT)
                .map(|t| t.and_utc())
                .map_err(|e| {
                    DirectoryError::invalid_value(format!("invalid generalized time {s:?}: {e}"))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::HeaderSdParser;
    use chrono::TimeZone;

    fn raw(values: &[&[u8]]) -> Vec<Vec<u8>> {
        values.iter().map(|v| v.to_vec()).collect()
    }

    #[test]
    fn test_simple_valid_utf8() {
        let out = Transformer::Simple
            .normalize(&raw(&[b"Alice", b"Bob"]))
            .unwrap();
        assert_eq!(out, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_simple_binary_falls_back_to_base64() {
        let out = Transformer::Simple
            .normalize(&raw(&[&[0xff, 0xfe, 0x01]]))
            .unwrap();
        assert_eq!(out, vec![BASE64.encode([0xff, 0xfe, 0x01])]);
    }

    #[test]
    fn test_base64_has_no_interpretation() {
        let t = Transformer::Base64;
        assert_eq!(t.normalize(&raw(&[b"abc"])).unwrap(), vec!["YWJj"]);
        assert!(t.interpret(&raw(&[b"abc"])).unwrap().is_empty());
    }

    #[test]
    fn test_sid_transformer() {
        let sid: &[u8] = &[
            0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x12, 0x00, 0x00, 0x00,
        ];
        let out = Transformer::Sid.normalize(&raw(&[sid])).unwrap();
        assert_eq!(out, vec!["S-1-5-18"]);
        let typed = Transformer::Sid.interpret(&raw(&[sid])).unwrap();
        assert_eq!(typed, vec![Value::Sid("S-1-5-18".into())]);
    }

    #[test]
    fn test_ad_guid_byte_order() {
        let guid: &[u8] = &[
            0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0xa7, 0xb8, 0xc9, 0xda, 0xeb, 0xfc, 0xfd, 0xfe,
            0xff, 0x00,
        ];
        let out = Transformer::Guid.normalize(&raw(&[guid])).unwrap();
        assert_eq!(out, vec!["d4c3b2a1-f6e5-b8a7-c9da-ebfcfdfeff00"]);
    }

    #[test]
    fn test_ad_guid_round_trip() {
        let original: [u8; 16] = [
            0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0xa7, 0xb8, 0xc9, 0xda, 0xeb, 0xfc, 0xfd, 0xfe,
            0xff, 0x00,
        ];
        let uuid = ad_guids(&[original.to_vec()]).unwrap()[0];
        // Reversing the field swap recovers the wire bytes.
        let mut bytes = *uuid.as_bytes();
        bytes[0..4].reverse();
        bytes[4..6].reverse();
        bytes[6..8].reverse();
        assert_eq!(bytes, original);
    }

    #[test]
    fn test_ad_guid_wrong_length() {
        assert!(ad_guids(&[vec![0u8; 15]]).is_err());
    }

    #[test]
    fn test_filetime_never_values() {
        let out = Transformer::Filetime
            .normalize(&raw(&[b"0", b"9223372036854775807", b""]))
            .unwrap();
        assert_eq!(out, vec!["N/A", "N/A", "N/A"]);
        assert!(Transformer::Filetime
            .interpret(&raw(&[b"0", b"9223372036854775807"]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_filetime_epoch_conversion() {
        // One second past the Unix epoch.
        let ft = (FILETIME_UNIX_OFFSET + 10_000_000).to_string();
        let typed = Transformer::Filetime
            .interpret(&raw(&[ft.as_bytes()]))
            .unwrap();
        assert_eq!(
            typed,
            vec![Value::Time(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap())]
        );
    }

    #[test]
    fn test_filetime_round_trip_within_100ns() {
        let ft: i64 = 133_500_000_000_000_123;
        let typed = Transformer::Filetime
            .interpret(&raw(&[ft.to_string().as_bytes()]))
            .unwrap();
        let t = typed[0].as_time().unwrap();
        let ns = t.timestamp_nanos_opt().unwrap();
        let back = ns / 100 + FILETIME_UNIX_OFFSET;
        assert!((back - ft).abs() <= 1);
    }

    #[test]
    fn test_filetime_garbage_is_an_error() {
        assert!(Transformer::Filetime.normalize(&raw(&[b"soon"])).is_err());
    }

    #[test]
    fn test_generalized_time() {
        let typed = Transformer::LdapTime
            .interpret(&raw(&[b"20240325101530.0Z"]))
            .unwrap();
        assert_eq!(
            typed,
            vec![Value::Time(
                Utc.with_ymd_and_hms(2024, 3, 25, 10, 15, 30).unwrap()
            )]
        );
    }

    #[test]
    fn test_ntsd_rejects_utf8_input() {
        let t = Transformer::Ntsd(Arc::new(HeaderSdParser));
        assert!(t.normalize(&raw(&[b"plain text"])).is_err());
    }

    #[test]
    fn test_ntsd_normalizes_binary_to_base64() {
        let t = Transformer::Ntsd(Arc::new(HeaderSdParser));
        let blob: &[u8] = &[0x01, 0x00, 0x04, 0x80, 0xff];
        let out = t.normalize(&raw(&[blob])).unwrap();
        assert_eq!(out, vec![BASE64.encode(blob)]);
    }

    #[test]
    fn test_integer_interpreters() {
        assert_eq!(
            Transformer::Int32.interpret(&raw(&[b"512"])).unwrap(),
            vec![Value::Int32(512)]
        );
        assert_eq!(
            Transformer::Int64.interpret(&raw(&[b"8675309"])).unwrap(),
            vec![Value::Int64(8_675_309)]
        );
        assert!(Transformer::Int64.interpret(&raw(&[b"x"])).is_err());
    }
}
