//! Versioning service
//!
//! Persists a batch of snapshots under one fail-fast transaction: the
//! whole batch commits or none of it does. Per object the service decides
//! between three paths:
//!
//! - first sighting: object row plus an initial version, no change rows
//! - re-observation with identical attributes: nothing is written
//! - attribute change: a new version plus one change row per attribute
//!
//! The version row is the source of truth. Change rows are a query-time
//! convenience, so a change whose attribute has no persisted schema is
//! skipped with a warning rather than aborting the batch.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use adwatch_directory::SchemaRegistry;

use crate::error::Result;
use crate::snapshot::{
    compare_snapshots, decode_attribute_map, encode_attribute_map, AttributeDelta, Snapshot,
    MODIFIED_BY_SYSTEM,
};
use crate::store::{VersionStore, VersionTx};

/// Transactional snapshot persistence for one domain.
pub struct VersioningService {
    store: Arc<dyn VersionStore>,
    registry: Arc<SchemaRegistry>,
    domain_id: Uuid,
}

impl VersioningService {
    pub fn new(
        store: Arc<dyn VersionStore>,
        registry: Arc<SchemaRegistry>,
        domain_id: Uuid,
    ) -> Self {
        Self {
            store,
            registry,
            domain_id,
        }
    }

    /// Persist a batch of snapshots in input order.
    ///
    /// The first failure rolls back the whole batch. An empty batch
    /// succeeds without touching the store.
    pub async fn process_snapshots(&self, snapshots: &[Snapshot]) -> Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }

        let mut tx = self.store.begin().await?;

        for (index, snap) in snapshots.iter().enumerate() {
            if let Err(e) = self.process_one(tx.as_mut(), snap).await {
                error!(
                    index,
                    dn = %snap.dn,
                    error = %e,
                    "snapshot failed, rolling back batch"
                );
                let _ = tx.rollback().await;
                return Err(e);
            }
        }

        tx.commit().await?;
        info!(count = snapshots.len(), "processed snapshot batch");
        Ok(())
    }

    async fn process_one(&self, tx: &mut dyn VersionTx, snap: &Snapshot) -> Result<()> {
        let current_usn = tx
            .upsert_object(snap.object_guid, &snap.object_type, &snap.dn, self.domain_id)
            .await?;

        match current_usn {
            None => self.create_initial_version(tx, snap).await,
            Some(prev_usn) => self.update_if_changed(tx, snap, prev_usn).await,
        }
    }

    /// First sighting: write the initial version. No change rows are
    /// emitted for it; consumers treat the first version as the creation
    /// event.
    async fn create_initial_version(&self, tx: &mut dyn VersionTx, snap: &Snapshot) -> Result<()> {
        let attributes = encode_attribute_map(&snap.attributes)?;
        tx.insert_version(
            snap.object_guid,
            snap.usn_changed,
            snap.timestamp,
            &attributes,
            MODIFIED_BY_SYSTEM,
        )
        .await?;
        tx.set_last_processed_usn(snap.object_guid, snap.usn_changed)
            .await?;

        info!(
            object_guid = %snap.object_guid,
            dn = %snap.dn,
            usn = snap.usn_changed,
            "created object"
        );
        Ok(())
    }

    /// Re-observation: only write when at least one attribute differs from
    /// the previous version. Identical re-observations leave the object
    /// untouched, including its USN pointer.
    async fn update_if_changed(
        &self,
        tx: &mut dyn VersionTx,
        snap: &Snapshot,
        prev_usn: i64,
    ) -> Result<()> {
        let previous_json = tx.version_snapshot(snap.object_guid, prev_usn).await?;
        let previous = decode_attribute_map(&previous_json);

        let changes = compare_snapshots(&previous, &snap.attributes);
        if changes.is_empty() {
            debug!(dn = %snap.dn, usn = snap.usn_changed, "no attribute changes");
            return Ok(());
        }

        let attributes = encode_attribute_map(&snap.attributes)?;
        tx.insert_version(
            snap.object_guid,
            snap.usn_changed,
            snap.timestamp,
            &attributes,
            MODIFIED_BY_SYSTEM,
        )
        .await?;
        tx.set_last_processed_usn(snap.object_guid, snap.usn_changed)
            .await?;

        for change in &changes {
            self.record_change(tx, snap, change).await?;
        }

        info!(
            object_guid = %snap.object_guid,
            dn = %snap.dn,
            usn = snap.usn_changed,
            changes = changes.len(),
            "versioned object"
        );
        Ok(())
    }

    async fn record_change(
        &self,
        tx: &mut dyn VersionTx,
        snap: &Snapshot,
        change: &AttributeDelta,
    ) -> Result<()> {
        let Some(schema) = self.registry.attribute_schema(&change.name) else {
            warn!(
                attribute = %change.name,
                dn = %snap.dn,
                "no schema for attribute, skipping change row"
            );
            return Ok(());
        };

        let old_value = serde_json::to_value(&change.old)?;
        let new_value = serde_json::to_value(&change.new)?;

        tx.insert_attribute_change(
            snap.object_guid,
            snap.usn_changed,
            schema.schema_object_guid,
            &old_value,
            &new_value,
            snap.timestamp,
        )
        .await?;

        debug!(
            attribute = %change.name,
            dn = %snap.dn,
            "recorded attribute change"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use adwatch_directory::{AttributeSchema, FieldType, HeaderSdParser, LogicalType, Transformer};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn registry_with(attributes: &[(&str, Uuid)]) -> SchemaRegistry {
        let mut registry = SchemaRegistry::new(Arc::new(HeaderSdParser));
        for (name, guid) in attributes {
            registry.register_attribute_schema(AttributeSchema {
                attribute_name: name.to_string(),
                ldap_display_name: name.to_string(),
                attribute_id: "1.2.3".into(),
                syntax_oid: "2.5.5.12".into(),
                om_syntax: "64".into(),
                field_type: FieldType::new(
                    "Unicode String",
                    LogicalType::String,
                    Transformer::Simple,
                ),
                is_single_valued: true,
                schema_object_guid: *guid,
            });
        }
        registry
    }

    fn snapshot(guid: Uuid, usn: i64, attrs: &[(&str, &[&str])]) -> Snapshot {
        let attributes: BTreeMap<String, Vec<String>> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        Snapshot {
            object_guid: guid,
            object_type: "person".into(),
            dn: "CN=Alice,DC=corp,DC=example".into(),
            is_deleted: false,
            usn_changed: usn,
            attributes,
            timestamp: Utc::now(),
        }
    }

    struct Fixture {
        store: MemoryStore,
        service: VersioningService,
        cn_guid: Uuid,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let cn_guid = Uuid::new_v4();
        let uac_guid = Uuid::new_v4();
        let registry = registry_with(&[("cn", cn_guid), ("userAccountControl", uac_guid)]);
        let service = VersioningService::new(
            Arc::new(store.clone()),
            Arc::new(registry),
            Uuid::new_v4(),
        );
        Fixture {
            store,
            service,
            cn_guid,
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let f = fixture();
        f.service.process_snapshots(&[]).await.unwrap();
        assert_eq!(f.store.version_count(), 0);
    }

    #[tokio::test]
    async fn test_first_sighting_creates_initial_version() {
        let f = fixture();
        let guid = Uuid::new_v4();
        let snap = snapshot(
            guid,
            100,
            &[("cn", &["Alice"]), ("userAccountControl", &["512"])],
        );

        f.service.process_snapshots(&[snap]).await.unwrap();

        let object = f.store.object(guid).unwrap();
        assert_eq!(object.last_processed_usn, Some(100));

        let versions = f.store.versions_for(guid);
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].usn_changed, 100);
        assert_eq!(versions[0].modified_by, "system");

        // Initial versions carry no change rows.
        assert!(f.store.changes_for(guid).is_empty());
    }

    #[tokio::test]
    async fn test_identical_reobservation_writes_nothing() {
        let f = fixture();
        let guid = Uuid::new_v4();
        f.service
            .process_snapshots(&[snapshot(guid, 100, &[("cn", &["Alice"])])])
            .await
            .unwrap();

        // Same attributes at a later USN.
        f.service
            .process_snapshots(&[snapshot(guid, 101, &[("cn", &["Alice"])])])
            .await
            .unwrap();

        assert_eq!(f.store.versions_for(guid).len(), 1);
        // The USN pointer stays where the last real version left it.
        assert_eq!(f.store.object(guid).unwrap().last_processed_usn, Some(100));
    }

    #[tokio::test]
    async fn test_attribute_change_creates_version_and_change_row() {
        let f = fixture();
        let guid = Uuid::new_v4();
        f.service
            .process_snapshots(&[snapshot(guid, 100, &[("cn", &["Alice"])])])
            .await
            .unwrap();
        f.service
            .process_snapshots(&[snapshot(guid, 105, &[("cn", &["A. Smith"])])])
            .await
            .unwrap();

        let versions = f.store.versions_for(guid);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].usn_changed, 105);
        assert_eq!(f.store.object(guid).unwrap().last_processed_usn, Some(105));

        let changes = f.store.changes_for(guid);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].attribute_schema_guid, f.cn_guid);
        assert_eq!(changes[0].old_value, serde_json::json!(["Alice"]));
        assert_eq!(changes[0].new_value, serde_json::json!(["A. Smith"]));
    }

    #[tokio::test]
    async fn test_removed_attribute_records_null_new_value() {
        let f = fixture();
        let guid = Uuid::new_v4();
        f.service
            .process_snapshots(&[snapshot(
                guid,
                100,
                &[("cn", &["Alice"]), ("userAccountControl", &["512"])],
            )])
            .await
            .unwrap();
        f.service
            .process_snapshots(&[snapshot(guid, 105, &[("cn", &["Alice"])])])
            .await
            .unwrap();

        let changes = f.store.changes_for(guid);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_value, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_attribute_schema_skips_change_row_only() {
        let f = fixture();
        let guid = Uuid::new_v4();
        // "description" has no persisted schema in this fixture.
        f.service
            .process_snapshots(&[snapshot(guid, 100, &[("description", &["a"])])])
            .await
            .unwrap();
        f.service
            .process_snapshots(&[snapshot(guid, 105, &[("description", &["b"])])])
            .await
            .unwrap();

        // Version row committed, change row skipped.
        assert_eq!(f.store.versions_for(guid).len(), 2);
        assert!(f.store.changes_for(guid).is_empty());
    }

    #[tokio::test]
    async fn test_versions_strictly_increase_per_object() {
        let f = fixture();
        let guid = Uuid::new_v4();
        for (usn, value) in [(100, "a"), (110, "b"), (120, "c")] {
            f.service
                .process_snapshots(&[snapshot(guid, usn, &[("cn", &[value])])])
                .await
                .unwrap();
        }
        let versions = f.store.versions_for(guid);
        let usns: Vec<i64> = versions.iter().map(|v| v.usn_changed).collect();
        assert_eq!(usns, vec![100, 110, 120]);
        assert_eq!(
            f.store.object(guid).unwrap().last_processed_usn,
            Some(*usns.last().unwrap())
        );
    }

    #[tokio::test]
    async fn test_batch_failure_rolls_everything_back() {
        let f = fixture();
        let good = Uuid::new_v4();
        let poisoned = Uuid::new_v4();

        // Poison the second object: its pointer references a version that
        // does not exist, so update_if_changed must fail.
        {
            let mut tx = f.store.begin().await.unwrap();
            tx.upsert_object(poisoned, "person", "CN=poison", Uuid::new_v4())
                .await
                .unwrap();
            tx.set_last_processed_usn(poisoned, 50).await.unwrap();
            tx.commit().await.unwrap();
        }

        let batch = vec![
            snapshot(good, 100, &[("cn", &["ok"])]),
            snapshot(poisoned, 105, &[("cn", &["boom"])]),
        ];
        assert!(f.service.process_snapshots(&batch).await.is_err());

        // The first snapshot's writes must not survive the rollback.
        assert!(f.store.object(good).is_none());
        assert!(f.store.versions_for(good).is_empty());
    }

    #[tokio::test]
    async fn test_rerun_after_commit_is_idempotent() {
        let f = fixture();
        let guid = Uuid::new_v4();
        let batch = vec![snapshot(guid, 100, &[("cn", &["Alice"])])];

        f.service.process_snapshots(&batch).await.unwrap();
        f.service.process_snapshots(&batch).await.unwrap();

        assert_eq!(f.store.versions_for(guid).len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_objects_in_one_batch() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let batch = vec![
            snapshot(a, 100, &[("cn", &["a"])]),
            snapshot(b, 101, &[("cn", &["b"])]),
        ];
        f.service.process_snapshots(&batch).await.unwrap();
        assert_eq!(f.store.version_count(), 2);
    }
}
