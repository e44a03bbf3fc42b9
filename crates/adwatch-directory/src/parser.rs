//! Entry parser
//!
//! Applies the schema registry to raw search entries. Per-attribute
//! failures are soft: an attribute that fails to normalize keeps an empty
//! normalized list, an attribute that fails to interpret keeps an empty
//! interpreted list, and unknown attributes are skipped entirely. Only
//! structural problems (an unusable `objectClass` or `objectGUID`) fail
//! the whole entry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::client::RawEntry;
use crate::error::{DirectoryError, Result};
use crate::object::{AttributeValue, DirectoryObject};
use crate::schema::SchemaRegistry;
use crate::sd::{SecurityDescriptor, SecurityDescriptorParser};

/// Converts raw entries into [`DirectoryObject`]s.
pub struct EntryParser {
    registry: Arc<SchemaRegistry>,
    sd_parser: Arc<dyn SecurityDescriptorParser>,
}

impl EntryParser {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        sd_parser: Arc<dyn SecurityDescriptorParser>,
    ) -> Self {
        Self {
            registry,
            sd_parser,
        }
    }

    /// Parse a batch of entries. Each entry yields its own result so the
    /// caller can drop failures without losing the rest of the page.
    pub fn parse_entries(&self, entries: &[RawEntry]) -> Vec<Result<DirectoryObject>> {
        entries.iter().map(|e| self.parse_entry(e)).collect()
    }

    /// Parse a single entry.
    pub fn parse_entry(&self, entry: &RawEntry) -> Result<DirectoryObject> {
        let mut attributes = HashMap::new();
        let mut object_guid = Uuid::nil();
        let mut primary_object_class = String::new();
        let mut security_descriptor: Option<SecurityDescriptor> = None;

        for attr in &entry.attributes {
            let Some(schema) = self.registry.attribute_schema(&attr.name) else {
                warn!(attribute = %attr.name, dn = %entry.dn, "skipping unknown attribute");
                continue;
            };

            let transformer = &schema.field_type.transformer;

            let normalized = match transformer.normalize(&attr.values) {
                Ok(values) => values,
                Err(e) => {
                    warn!(attribute = %attr.name, dn = %entry.dn, error = %e, "normalization failed");
                    Vec::new()
                }
            };

            let interpreted = match transformer.interpret(&attr.values) {
                Ok(values) => values,
                Err(e) => {
                    warn!(attribute = %attr.name, dn = %entry.dn, error = %e, "interpretation failed");
                    Vec::new()
                }
            };

            match attr.name.as_str() {
                "objectClass" => {
                    primary_object_class = normalized
                        .last()
                        .cloned()
                        .ok_or_else(|| {
                            DirectoryError::entry_parse(&entry.dn, "objectClass has no values")
                        })?;
                }
                "objectGUID" => {
                    object_guid = interpreted
                        .first()
                        .and_then(|v| v.as_uuid())
                        .ok_or_else(|| {
                            DirectoryError::entry_parse(
                                &entry.dn,
                                "objectGUID did not decode to a UUID",
                            )
                        })?;
                }
                "nTSecurityDescriptor" => {
                    if let Some(raw) = attr.values.first() {
                        match self.sd_parser.parse(raw) {
                            Ok(sd) => security_descriptor = Some(sd),
                            // The descriptor is informational here; decoding
                            // problems must not drop the entry.
                            Err(e) => {
                                warn!(dn = %entry.dn, error = %e, "failed to parse nTSecurityDescriptor")
                            }
                        }
                    }
                }
                _ => {}
            }

            attributes.insert(
                attr.name.clone(),
                AttributeValue {
                    name: attr.name.clone(),
                    schema: schema.clone(),
                    raw: attr.values.clone(),
                    normalized,
                    interpreted,
                },
            );
        }

        Ok(DirectoryObject {
            dn: entry.dn.clone(),
            object_guid,
            primary_object_class,
            security_descriptor,
            attributes,
        })
    }
}
