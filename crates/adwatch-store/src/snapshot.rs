//! Snapshots and attribute diffs
//!
//! A snapshot is the serialization-ready projection of a directory object:
//! only the normalized string form of each attribute survives, because
//! that is the form that gets stored and diffed. Both functions here are
//! pure; all I/O lives in the versioning service.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adwatch_directory::DirectoryObject;

use crate::error::{Result, StoreError};

/// Author recorded on versions the pipeline writes itself.
pub const MODIFIED_BY_SYSTEM: &str = "system";

/// Point-in-time state of one directory object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub object_guid: Uuid,
    /// `objectCategory`, or `deletedObject` for tombstones
    pub object_type: String,
    pub dn: String,
    pub is_deleted: bool,
    /// The directory's own sequence number for this state
    pub usn_changed: i64,
    /// Normalized string form of every attribute
    pub attributes: BTreeMap<String, Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

/// One attribute's difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDelta {
    pub name: String,
    pub old: Option<Vec<String>>,
    pub new: Option<Vec<String>>,
}

/// Project a directory object into a [`Snapshot`].
///
/// Fails only when `uSNChanged` is absent or unparseable; versioning is
/// keyed on it.
pub fn create_snapshot(obj: &DirectoryObject) -> Result<Snapshot> {
    let usn_changed = obj
        .normalized_one("uSNChanged")
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| StoreError::missing_usn(&obj.dn))?;

    let is_deleted = obj.normalized_one("isDeleted") == Some("TRUE");

    let object_type = match obj.normalized_one("objectCategory") {
        Some(category) => category.to_string(),
        None if is_deleted => "deletedObject".to_string(),
        None => "unknown".to_string(),
    };

    let attributes = obj
        .attributes
        .iter()
        .map(|(name, attr)| (name.clone(), attr.normalized.clone()))
        .collect();

    Ok(Snapshot {
        object_guid: obj.object_guid,
        object_type,
        dn: obj.dn.clone(),
        is_deleted,
        usn_changed,
        attributes,
        timestamp: Utc::now(),
    })
}

/// Compare two attribute maps and return every difference.
///
/// Lists compare element-wise; order and length both matter. The result
/// order is unspecified.
pub fn compare_snapshots(
    old: &BTreeMap<String, Vec<String>>,
    new: &BTreeMap<String, Vec<String>>,
) -> Vec<AttributeDelta> {
    let mut changes = Vec::new();

    for (name, new_values) in new {
        match old.get(name) {
            Some(old_values) if old_values == new_values => {}
            old_values => changes.push(AttributeDelta {
                name: name.clone(),
                old: old_values.cloned(),
                new: Some(new_values.clone()),
            }),
        }
    }

    for (name, old_values) in old {
        if !new.contains_key(name) {
            changes.push(AttributeDelta {
                name: name.clone(),
                old: Some(old_values.clone()),
                new: None,
            });
        }
    }

    changes
}

/// Decode a stored attribute map, tolerating the wire forms older rows may
/// carry: a list of strings, a bare string (wrapped into a one-element
/// list) or a list of arbitrary scalars (each coerced to its string form).
pub fn decode_attribute_map(json: &serde_json::Value) -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    let Some(object) = json.as_object() else {
        return map;
    };

    for (name, value) in object {
        let values = match value {
            serde_json::Value::String(s) => vec![s.clone()],
            serde_json::Value::Array(items) => items.iter().map(coerce_to_string).collect(),
            other => vec![coerce_to_string(other)],
        };
        map.insert(name.clone(), values);
    }
    map
}

fn coerce_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encode an attribute map in the canonical stored shape: an object whose
/// values are arrays of strings.
pub fn encode_attribute_map(attributes: &BTreeMap<String, Vec<String>>) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(attributes)?)
}
