//! Schema registry
//!
//! Three mappings drive attribute decoding:
//!
//! - `type_map`: `(attributeSyntax, oMSyntax)` to a [`FieldType`]
//! - `overrides`: per-attribute field types, consulted before `type_map`
//! - `schemas`: `lDAPDisplayName` to the loaded [`AttributeSchema`]
//!
//! The registry is populated at startup (built-in syntax table, well-known
//! overrides, then the schema-partition load) and is read-only afterwards,
//! so it can be shared behind an `Arc` without locking.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{DirectoryError, Result};
use crate::sd::SecurityDescriptorParser;
use crate::transform::Transformer;
use crate::value::LogicalType;

/// How one attribute syntax is decoded.
#[derive(Debug, Clone)]
pub struct FieldType {
    /// Human label for the syntax, e.g. `Unicode String`
    pub syntax_name: String,
    pub logical_type: LogicalType,
    pub transformer: Transformer,
}

impl FieldType {
    pub fn new(
        syntax_name: impl Into<String>,
        logical_type: LogicalType,
        transformer: Transformer,
    ) -> Self {
        Self {
            syntax_name: syntax_name.into(),
            logical_type,
            transformer,
        }
    }
}

/// One attribute definition loaded from the schema partition.
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    /// `cn` of the schema entry
    pub attribute_name: String,
    /// `lDAPDisplayName`; identity within a domain
    pub ldap_display_name: String,
    /// `attributeID` OID
    pub attribute_id: String,
    /// `attributeSyntax` OID
    pub syntax_oid: String,
    pub om_syntax: String,
    pub field_type: FieldType,
    pub is_single_valued: bool,
    /// The schema entry's own `objectGUID`; referenced by persisted
    /// attribute-change rows.
    pub schema_object_guid: Uuid,
}

/// Registry of syntax mappings, attribute overrides and loaded schemas.
pub struct SchemaRegistry {
    type_map: HashMap<(String, String), FieldType>,
    overrides: HashMap<String, FieldType>,
    schemas: HashMap<String, AttributeSchema>,
}

impl SchemaRegistry {
    /// Build a registry with the built-in syntax table and the well-known
    /// attribute overrides registered.
    pub fn new(sd_parser: Arc<dyn SecurityDescriptorParser>) -> Self {
        let mut registry = Self {
            type_map: HashMap::new(),
            overrides: HashMap::new(),
            schemas: HashMap::new(),
        };
        registry.register_syntax_table(sd_parser);
        registry.register_attribute_overrides();
        registry
    }

    /// Register a `(attributeSyntax, oMSyntax)` mapping.
    pub fn register(
        &mut self,
        syntax_oid: impl Into<String>,
        om_syntax: impl Into<String>,
        field_type: FieldType,
    ) {
        self.type_map
            .insert((syntax_oid.into(), om_syntax.into()), field_type);
    }

    /// Register a per-attribute override. Overrides win over the type map.
    pub fn override_attribute(&mut self, ldap_display_name: impl Into<String>, field_type: FieldType) {
        self.overrides.insert(ldap_display_name.into(), field_type);
    }

    /// Resolve the field type for an attribute: override first, then the
    /// `(attributeSyntax, oMSyntax)` table.
    pub fn lookup(
        &self,
        syntax_oid: &str,
        om_syntax: &str,
        ldap_display_name: &str,
    ) -> Result<&FieldType> {
        if let Some(ft) = self.overrides.get(ldap_display_name) {
            return Ok(ft);
        }
        self.type_map
            .get(&(syntax_oid.to_string(), om_syntax.to_string()))
            .ok_or_else(|| DirectoryError::SchemaMapping {
                syntax_oid: syntax_oid.to_string(),
                om_syntax: om_syntax.to_string(),
                ldap_display_name: ldap_display_name.to_string(),
            })
    }

    /// Record a loaded attribute schema.
    pub fn register_attribute_schema(&mut self, schema: AttributeSchema) {
        self.schemas
            .insert(schema.ldap_display_name.clone(), schema);
    }

    /// Loaded schema for an attribute, if the schema pass saw it.
    pub fn attribute_schema(&self, ldap_display_name: &str) -> Option<&AttributeSchema> {
        self.schemas.get(ldap_display_name)
    }

    /// All loaded attribute schemas.
    pub fn attribute_schemas(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.schemas.values()
    }

    /// Number of loaded attribute schemas.
    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    /// The syntax table from the AD schema reference.
    /// <https://learn.microsoft.com/en-us/windows/win32/adschema/syntaxes>
    fn register_syntax_table(&mut self, sd_parser: Arc<dyn SecurityDescriptorParser>) {
        use LogicalType as L;
        use Transformer as T;

        self.register("2.5.5.8", "1", FieldType::new("Boolean", L::Bool, T::Simple));

        self.register("2.5.5.9", "2", FieldType::new("Integer", L::Int32, T::Int32));
        self.register("2.5.5.9", "10", FieldType::new("Enumeration", L::Int32, T::Int32));

        self.register(
            "2.5.5.16",
            "65",
            FieldType::new("Large Integer (FILETIME)", L::Time, T::Filetime),
        );

        // UTC-Time is kept in string form; Generalized-Time is parsed.
        self.register("2.5.5.11", "23", FieldType::new("UTC-Time", L::String, T::Simple));
        self.register(
            "2.5.5.11",
            "24",
            FieldType::new("Generalized-Time", L::Time, T::LdapTime),
        );

        self.register("2.5.5.10", "4", FieldType::new("Octet String", L::Bytes, T::Base64));
        self.register(
            "2.5.5.10",
            "127",
            FieldType::new("Replica-Link", L::Bytes, T::Base64),
        );

        self.register(
            "2.5.5.15",
            "66",
            FieldType::new("NT-Sec-Desc", L::SecurityDescriptor, T::Ntsd(sd_parser)),
        );
        self.register("2.5.5.17", "4", FieldType::new("SID", L::Sid, T::Sid));

        // DN-valued and plain string syntaxes.
        self.register("2.5.5.1", "127", FieldType::new("DS-DN", L::String, T::Simple));
        self.register(
            "2.5.5.13",
            "127",
            FieldType::new("Presentation Address", L::String, T::Simple),
        );
        self.register(
            "2.5.5.14",
            "127",
            FieldType::new("Access Point / DN-String", L::String, T::Simple),
        );
        self.register(
            "2.5.5.7",
            "127",
            FieldType::new("DN-Binary / OR-Name", L::String, T::Simple),
        );
        self.register(
            "2.5.5.5",
            "19",
            FieldType::new("Printable String", L::String, T::Simple),
        );
        self.register("2.5.5.5", "22", FieldType::new("IA5 String", L::String, T::Simple));
        self.register(
            "2.5.5.2",
            "6",
            FieldType::new("Object Identifier", L::String, T::Simple),
        );
        self.register(
            "2.5.5.4",
            "20",
            FieldType::new("Teletex String", L::String, T::Simple),
        );
        self.register(
            "2.5.5.6",
            "18",
            FieldType::new("Numeric String", L::String, T::Simple),
        );
        self.register(
            "2.5.5.12",
            "64",
            FieldType::new("Unicode String", L::String, T::Simple),
        );
    }

    /// Well-known attributes whose declared syntax does not match how the
    /// directory actually encodes them on the wire.
    fn register_attribute_overrides(&mut self) {
        use LogicalType as L;
        use Transformer as T;

        self.override_attribute(
            "objectGUID",
            FieldType::new("Octet String", L::Uuid, T::Guid),
        );
        self.override_attribute("objectSid", FieldType::new("SID", L::Sid, T::Sid));
        self.override_attribute("tokenGroups", FieldType::new("SID", L::Sid, T::Sid));
        self.override_attribute(
            "uSNCreated",
            FieldType::new("Large Integer", L::Int64, T::Int64),
        );
        self.override_attribute(
            "uSNChanged",
            FieldType::new("Large Integer", L::Int64, T::Int64),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::HeaderSdParser;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(Arc::new(HeaderSdParser))
    }

    #[test]
    fn test_lookup_builtin() {
        let r = registry();
        let cases = [
            ("2.5.5.8", "1", LogicalType::Bool, "Boolean"),
            ("2.5.5.9", "2", LogicalType::Int32, "Integer"),
            ("2.5.5.16", "65", LogicalType::Time, "Large Integer (FILETIME)"),
            ("2.5.5.15", "66", LogicalType::SecurityDescriptor, "NT-Sec-Desc"),
            ("2.5.5.12", "64", LogicalType::String, "Unicode String"),
        ];
        for (syntax, om, logical, name) in cases {
            let ft = r.lookup(syntax, om, "someAttribute").unwrap();
            assert_eq!(ft.logical_type, logical, "{syntax}/{om}");
            assert_eq!(ft.syntax_name, name);
        }
    }

    #[test]
    fn test_lookup_override_wins() {
        let r = registry();
        // objectGUID is declared as an octet string but decodes as a GUID.
        let ft = r.lookup("2.5.5.10", "4", "objectGUID").unwrap();
        assert_eq!(ft.logical_type, LogicalType::Uuid);
        assert!(matches!(ft.transformer, Transformer::Guid));

        // The override applies regardless of the declared syntax pair.
        let ft = r.lookup("", "", "uSNChanged").unwrap();
        assert_eq!(ft.logical_type, LogicalType::Int64);
    }

    #[test]
    fn test_lookup_unknown_mapping() {
        let r = registry();
        let err = r.lookup("2.5.5.99", "999", "nonExistent").unwrap_err();
        assert!(matches!(err, DirectoryError::SchemaMapping { .. }));
    }

    #[test]
    fn test_register_and_get_attribute_schema() {
        let mut r = registry();
        assert!(r.attribute_schema("sAMAccountName").is_none());

        let ft = r.lookup("2.5.5.12", "64", "sAMAccountName").unwrap().clone();
        r.register_attribute_schema(AttributeSchema {
            attribute_name: "SAM-Account-Name".into(),
            ldap_display_name: "sAMAccountName".into(),
            attribute_id: "1.2.840.113556.1.4.221".into(),
            syntax_oid: "2.5.5.12".into(),
            om_syntax: "64".into(),
            field_type: ft,
            is_single_valued: true,
            schema_object_guid: Uuid::new_v4(),
        });

        let fetched = r.attribute_schema("sAMAccountName").unwrap();
        assert!(fetched.is_single_valued);
        assert_eq!(r.schema_count(), 1);
    }
}
