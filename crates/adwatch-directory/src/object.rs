//! Decoded directory objects

use std::collections::HashMap;

use uuid::Uuid;

use crate::schema::AttributeSchema;
use crate::sd::SecurityDescriptor;
use crate::value::Value;

/// One decoded attribute on one object.
///
/// `normalized` is always populated (the canonical string form);
/// `interpreted` may be empty when interpretation failed.
#[derive(Debug, Clone)]
pub struct AttributeValue {
    pub name: String,
    pub schema: AttributeSchema,
    pub raw: Vec<Vec<u8>>,
    pub normalized: Vec<String>,
    pub interpreted: Vec<Value>,
}

/// A directory object with all decoded attributes.
#[derive(Debug, Clone)]
pub struct DirectoryObject {
    pub dn: String,
    pub object_guid: Uuid,
    /// Last element of the normalized `objectClass` list; the most-derived
    /// class by AD convention.
    pub primary_object_class: String,
    pub security_descriptor: Option<SecurityDescriptor>,
    pub attributes: HashMap<String, AttributeValue>,
}

impl DirectoryObject {
    /// Normalized value of a single-valued attribute. Returns `None` when
    /// the attribute is absent, empty or multi-valued.
    pub fn normalized_one(&self, name: &str) -> Option<&str> {
        let attr = self.attributes.get(name)?;
        match attr.normalized.as_slice() {
            [value] => Some(value),
            _ => None,
        }
    }

    /// Normalized string list of an attribute.
    pub fn normalized(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(|a| a.normalized.as_slice())
    }

    /// Interpreted values of an attribute.
    pub fn interpreted(&self, name: &str) -> Option<&[Value]> {
        self.attributes.get(name).map(|a| a.interpreted.as_slice())
    }
}
