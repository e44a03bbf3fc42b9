//! Storage contracts and the in-memory backend
//!
//! [`VersionStore`] hands out [`VersionTx`] transactions; every write the
//! versioning service performs goes through one. Backends guarantee that a
//! transaction either commits completely or leaves no trace.
//!
//! [`MemoryStore`] implements the contract over plain maps. A transaction
//! works on a copy of the state and swaps it back on commit, which gives
//! the same all-or-nothing behavior the PostgreSQL backend gets from real
//! transactions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// One domain under capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRecord {
    pub domain_id: Uuid,
    pub base_dn: String,
    pub controller_fqdn: String,
    /// Latest `highestCommittedUSN` seen on the controller
    pub highest_usn: i64,
    /// Watermark of the last committed cycle
    pub last_processed_usn: i64,
}

/// One attribute definition as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSchemaRecord {
    pub schema_object_guid: Uuid,
    pub ldap_display_name: String,
    pub attribute_name: String,
    pub attribute_id: String,
    pub syntax_oid: String,
    pub om_syntax: String,
    pub is_single_valued: bool,
}

/// One directory object row.
#[derive(Debug, Clone)]
pub struct ObjectRow {
    pub object_guid: Uuid,
    pub object_type: String,
    pub dn: String,
    pub domain_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Highest `usn_changed` ever versioned for this object
    pub last_processed_usn: Option<i64>,
}

/// One append-only version row.
#[derive(Debug, Clone)]
pub struct VersionRow {
    pub object_guid: Uuid,
    pub usn_changed: i64,
    pub timestamp: DateTime<Utc>,
    /// Full normalized attribute map at this version, not a delta
    pub attributes_snapshot: serde_json::Value,
    pub modified_by: String,
}

/// One per-attribute change row.
#[derive(Debug, Clone)]
pub struct ChangeRow {
    pub object_guid: Uuid,
    pub usn_changed: i64,
    pub attribute_schema_guid: Uuid,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A store that can version directory objects.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Begin a batch transaction.
    async fn begin(&self) -> Result<Box<dyn VersionTx>>;

    /// Insert the domain row if it does not exist yet.
    async fn init_domain(&self, domain: &DomainRecord) -> Result<()>;

    /// Fetch the domain row.
    async fn domain(&self, domain_id: Uuid) -> Result<Option<DomainRecord>>;

    /// Record the controller's highest USN and the committed watermark.
    async fn set_domain_usns(
        &self,
        domain_id: Uuid,
        highest_usn: i64,
        last_processed_usn: i64,
    ) -> Result<()>;

    /// Insert or overwrite one attribute-schema row. The schema is
    /// re-read on every startup, so overwriting is the intended behavior.
    async fn upsert_attribute_schema(
        &self,
        domain_id: Uuid,
        record: &AttributeSchemaRecord,
    ) -> Result<()>;
}

/// One batch transaction.
///
/// Dropping a transaction without calling either finisher must behave like
/// a rollback.
#[async_trait]
pub trait VersionTx: Send {
    /// Insert the object, or refresh `dn`, `object_type` and `updated_at`
    /// when it already exists. Returns the object's current
    /// `last_processed_usn`, which is `None` for a first sighting.
    async fn upsert_object(
        &mut self,
        object_guid: Uuid,
        object_type: &str,
        dn: &str,
        domain_id: Uuid,
    ) -> Result<Option<i64>>;

    /// Load the stored attribute snapshot for `(object_guid, usn_changed)`.
    async fn version_snapshot(
        &mut self,
        object_guid: Uuid,
        usn_changed: i64,
    ) -> Result<serde_json::Value>;

    /// Append a version row.
    async fn insert_version(
        &mut self,
        object_guid: Uuid,
        usn_changed: i64,
        timestamp: DateTime<Utc>,
        attributes_snapshot: &serde_json::Value,
        modified_by: &str,
    ) -> Result<()>;

    /// Point the object at its newest version.
    async fn set_last_processed_usn(&mut self, object_guid: Uuid, usn_changed: i64) -> Result<()>;

    /// Append one per-attribute change row.
    async fn insert_attribute_change(
        &mut self,
        object_guid: Uuid,
        usn_changed: i64,
        attribute_schema_guid: Uuid,
        old_value: &serde_json::Value,
        new_value: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Commit every staged write.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every staged write.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    domains: HashMap<Uuid, DomainRecord>,
    objects: HashMap<Uuid, ObjectRow>,
    versions: BTreeMap<(Uuid, i64), VersionRow>,
    changes: Vec<ChangeRow>,
    attribute_schemas: HashMap<Uuid, AttributeSchemaRecord>,
}

/// In-memory store for tests and local experiments.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object row, if the object has been sighted.
    pub fn object(&self, object_guid: Uuid) -> Option<ObjectRow> {
        self.state.lock().objects.get(&object_guid).cloned()
    }

    /// All versions of one object, ordered by `usn_changed`.
    pub fn versions_for(&self, object_guid: Uuid) -> Vec<VersionRow> {
        self.state
            .lock()
            .versions
            .range((object_guid, i64::MIN)..=(object_guid, i64::MAX))
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// All change rows of one object.
    pub fn changes_for(&self, object_guid: Uuid) -> Vec<ChangeRow> {
        self.state
            .lock()
            .changes
            .iter()
            .filter(|c| c.object_guid == object_guid)
            .cloned()
            .collect()
    }

    /// Total number of version rows across all objects.
    pub fn version_count(&self) -> usize {
        self.state.lock().versions.len()
    }

    /// Number of persisted attribute-schema rows.
    pub fn attribute_schema_count(&self) -> usize {
        self.state.lock().attribute_schemas.len()
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn VersionTx>> {
        let working = self.state.lock().clone();
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            working,
        }))
    }

    async fn init_domain(&self, domain: &DomainRecord) -> Result<()> {
        self.state
            .lock()
            .domains
            .entry(domain.domain_id)
            .or_insert_with(|| domain.clone());
        Ok(())
    }

    async fn domain(&self, domain_id: Uuid) -> Result<Option<DomainRecord>> {
        Ok(self.state.lock().domains.get(&domain_id).cloned())
    }

    async fn set_domain_usns(
        &self,
        domain_id: Uuid,
        highest_usn: i64,
        last_processed_usn: i64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let domain = state
            .domains
            .get_mut(&domain_id)
            .ok_or_else(|| StoreError::query(format!("unknown domain {domain_id}")))?;
        domain.highest_usn = highest_usn;
        domain.last_processed_usn = last_processed_usn;
        Ok(())
    }

    async fn upsert_attribute_schema(
        &self,
        _domain_id: Uuid,
        record: &AttributeSchemaRecord,
    ) -> Result<()> {
        self.state
            .lock()
            .attribute_schemas
            .insert(record.schema_object_guid, record.clone());
        Ok(())
    }
}

/// Copy-on-begin transaction over [`MemoryStore`].
struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    working: MemoryState,
}

#[async_trait]
impl VersionTx for MemoryTx {
    async fn upsert_object(
        &mut self,
        object_guid: Uuid,
        object_type: &str,
        dn: &str,
        domain_id: Uuid,
    ) -> Result<Option<i64>> {
        let now = Utc::now();
        match self.working.objects.get_mut(&object_guid) {
            Some(row) => {
                row.object_type = object_type.to_string();
                row.dn = dn.to_string();
                row.updated_at = now;
                Ok(row.last_processed_usn)
            }
            None => {
                self.working.objects.insert(
                    object_guid,
                    ObjectRow {
                        object_guid,
                        object_type: object_type.to_string(),
                        dn: dn.to_string(),
                        domain_id,
                        created_at: now,
                        updated_at: now,
                        deleted_at: None,
                        last_processed_usn: None,
                    },
                );
                Ok(None)
            }
        }
    }

    async fn version_snapshot(
        &mut self,
        object_guid: Uuid,
        usn_changed: i64,
    ) -> Result<serde_json::Value> {
        self.working
            .versions
            .get(&(object_guid, usn_changed))
            .map(|row| row.attributes_snapshot.clone())
            .ok_or_else(|| {
                StoreError::query(format!("no version ({object_guid}, {usn_changed})"))
            })
    }

    async fn insert_version(
        &mut self,
        object_guid: Uuid,
        usn_changed: i64,
        timestamp: DateTime<Utc>,
        attributes_snapshot: &serde_json::Value,
        modified_by: &str,
    ) -> Result<()> {
        let key = (object_guid, usn_changed);
        if self.working.versions.contains_key(&key) {
            return Err(StoreError::query(format!(
                "duplicate version ({object_guid}, {usn_changed})"
            )));
        }
        self.working.versions.insert(
            key,
            VersionRow {
                object_guid,
                usn_changed,
                timestamp,
                attributes_snapshot: attributes_snapshot.clone(),
                modified_by: modified_by.to_string(),
            },
        );
        Ok(())
    }

    async fn set_last_processed_usn(&mut self, object_guid: Uuid, usn_changed: i64) -> Result<()> {
        let row = self
            .working
            .objects
            .get_mut(&object_guid)
            .ok_or_else(|| StoreError::query(format!("unknown object {object_guid}")))?;
        row.last_processed_usn = Some(usn_changed);
        Ok(())
    }

    async fn insert_attribute_change(
        &mut self,
        object_guid: Uuid,
        usn_changed: i64,
        attribute_schema_guid: Uuid,
        old_value: &serde_json::Value,
        new_value: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        // Change rows must reference an existing version.
        if !self.working.versions.contains_key(&(object_guid, usn_changed)) {
            return Err(StoreError::query(format!(
                "change row references missing version ({object_guid}, {usn_changed})"
            )));
        }
        self.working.changes.push(ChangeRow {
            object_guid,
            usn_changed,
            attribute_schema_guid,
            old_value: old_value.clone(),
            new_value: new_value.clone(),
            timestamp,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        *self.state.lock() = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
