//! PostgreSQL backend
//!
//! [`PgStore`] implements the store contracts over a `deadpool-postgres`
//! pool. A batch transaction owns one pooled connection for its whole
//! lifetime and drives it with explicit `BEGIN`/`COMMIT`/`ROLLBACK`; if
//! the transaction is dropped mid-flight (a deadline fired, the future was
//! cancelled) a rollback is issued before the connection re-enters the
//! pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::{AttributeSchemaRecord, DomainRecord, VersionStore, VersionTx};

/// Idempotent schema for the capture store.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS domains (
    domain_id UUID PRIMARY KEY,
    base_dn VARCHAR(255) NOT NULL,
    domain_controller VARCHAR(255) NOT NULL,
    highest_usn BIGINT NOT NULL DEFAULT 0,
    last_processed_usn BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS attribute_schemas (
    schema_object_guid UUID PRIMARY KEY,
    domain_id UUID NOT NULL REFERENCES domains(domain_id),
    ldap_display_name VARCHAR(255) NOT NULL,
    attribute_name VARCHAR(255) NOT NULL,
    attribute_id VARCHAR(255) NOT NULL,
    syntax_oid VARCHAR(64) NOT NULL,
    om_syntax VARCHAR(16) NOT NULL,
    is_single_valued BOOLEAN NOT NULL,
    UNIQUE (domain_id, ldap_display_name)
);

CREATE TABLE IF NOT EXISTS objects (
    object_guid UUID PRIMARY KEY,
    object_type VARCHAR(255) NOT NULL,
    distinguished_name TEXT,
    domain_id UUID NOT NULL REFERENCES domains(domain_id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    deleted_at TIMESTAMPTZ,
    last_processed_usn BIGINT
);

CREATE TABLE IF NOT EXISTS object_versions (
    object_guid UUID NOT NULL REFERENCES objects(object_guid),
    usn_changed BIGINT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    attributes_snapshot JSONB NOT NULL,
    modified_by VARCHAR(255),
    PRIMARY KEY (object_guid, usn_changed)
);

CREATE TABLE IF NOT EXISTS attribute_changes (
    object_guid UUID NOT NULL,
    usn_changed BIGINT NOT NULL,
    attribute_schema_guid UUID NOT NULL REFERENCES attribute_schemas(schema_object_guid),
    old_value JSONB,
    new_value JSONB,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (object_guid, usn_changed, attribute_schema_guid),
    FOREIGN KEY (object_guid, usn_changed)
        REFERENCES object_versions(object_guid, usn_changed)
);
"#;

const UPSERT_OBJECT: &str = r#"
    INSERT INTO objects (object_guid, object_type, distinguished_name, domain_id)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (object_guid)
    DO UPDATE SET
        updated_at = now(),
        distinguished_name = EXCLUDED.distinguished_name,
        object_type = EXCLUDED.object_type
    RETURNING last_processed_usn
"#;

const GET_VERSION_SNAPSHOT: &str = r#"
    SELECT attributes_snapshot
    FROM object_versions
    WHERE object_guid = $1 AND usn_changed = $2
"#;

const INSERT_VERSION: &str = r#"
    INSERT INTO object_versions (object_guid, usn_changed, timestamp, attributes_snapshot, modified_by)
    VALUES ($1, $2, $3, $4, $5)
"#;

const SET_LAST_PROCESSED_USN: &str = r#"
    UPDATE objects
    SET last_processed_usn = $2
    WHERE object_guid = $1
"#;

const INSERT_ATTRIBUTE_CHANGE: &str = r#"
    INSERT INTO attribute_changes
        (object_guid, usn_changed, attribute_schema_guid, old_value, new_value, timestamp)
    VALUES ($1, $2, $3, $4, $5, $6)
"#;

const INIT_DOMAIN: &str = r#"
    INSERT INTO domains (domain_id, base_dn, domain_controller, highest_usn, last_processed_usn)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (domain_id) DO NOTHING
"#;

const GET_DOMAIN: &str = r#"
    SELECT domain_id, base_dn, domain_controller, highest_usn, last_processed_usn
    FROM domains
    WHERE domain_id = $1
"#;

const SET_DOMAIN_USNS: &str = r#"
    UPDATE domains
    SET highest_usn = $2, last_processed_usn = $3
    WHERE domain_id = $1
"#;

const UPSERT_ATTRIBUTE_SCHEMA: &str = r#"
    INSERT INTO attribute_schemas
        (schema_object_guid, domain_id, ldap_display_name, attribute_name,
         attribute_id, syntax_oid, om_syntax, is_single_valued)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (schema_object_guid)
    DO UPDATE SET
        ldap_display_name = EXCLUDED.ldap_display_name,
        attribute_name = EXCLUDED.attribute_name,
        attribute_id = EXCLUDED.attribute_id,
        syntax_oid = EXCLUDED.syntax_oid,
        om_syntax = EXCLUDED.om_syntax,
        is_single_valued = EXCLUDED.is_single_valued
"#;

/// PostgreSQL-backed [`VersionStore`].
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Build a pooled store from a connection string.
    pub fn connect(dsn: &str) -> Result<Self> {
        let config: tokio_postgres::Config = dsn
            .parse()
            .map_err(|e| StoreError::config(format!("invalid DSN: {e}")))?;
        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(16)
            .build()
            .map_err(|e| StoreError::pool(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Apply the idempotent schema.
    pub async fn apply_schema(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        info!("capture schema applied");
        Ok(())
    }
}

#[async_trait]
impl VersionStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn VersionTx>> {
        let conn = self.pool.get().await?;
        conn.batch_execute("BEGIN ISOLATION LEVEL READ COMMITTED")
            .await
            .map_err(|e| StoreError::transaction(e.to_string()))?;
        Ok(Box::new(PgTx { conn: Some(conn) }))
    }

    async fn init_domain(&self, domain: &DomainRecord) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            INIT_DOMAIN,
            &[
                &domain.domain_id,
                &domain.base_dn,
                &domain.controller_fqdn,
                &domain.highest_usn,
                &domain.last_processed_usn,
            ],
        )
        .await?;
        Ok(())
    }

    async fn domain(&self, domain_id: Uuid) -> Result<Option<DomainRecord>> {
        let conn = self.pool.get().await?;
        let row = conn.query_opt(GET_DOMAIN, &[&domain_id]).await?;
        Ok(row.map(|row| DomainRecord {
            domain_id: row.get(0),
            base_dn: row.get(1),
            controller_fqdn: row.get(2),
            highest_usn: row.get(3),
            last_processed_usn: row.get(4),
        }))
    }

    async fn set_domain_usns(
        &self,
        domain_id: Uuid,
        highest_usn: i64,
        last_processed_usn: i64,
    ) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(SET_DOMAIN_USNS, &[&domain_id, &highest_usn, &last_processed_usn])
            .await?;
        Ok(())
    }

    async fn upsert_attribute_schema(
        &self,
        domain_id: Uuid,
        record: &AttributeSchemaRecord,
    ) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            UPSERT_ATTRIBUTE_SCHEMA,
            &[
                &record.schema_object_guid,
                &domain_id,
                &record.ldap_display_name,
                &record.attribute_name,
                &record.attribute_id,
                &record.syntax_oid,
                &record.om_syntax,
                &record.is_single_valued,
            ],
        )
        .await?;
        Ok(())
    }
}

/// One open batch transaction on a pooled connection.
struct PgTx {
    conn: Option<Object>,
}

impl PgTx {
    fn client(&self) -> Result<&Object> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::transaction("transaction already completed"))
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> Result<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| StoreError::transaction("transaction already completed"))?;
        conn.batch_execute(statement)
            .await
            .map_err(|e| StoreError::transaction(e.to_string()))?;
        Ok(())
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        // A dropped transaction (cancellation, deadline) must not leak an
        // open transaction back into the pool.
        if let Some(conn) = self.conn.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = conn.batch_execute("ROLLBACK").await;
                });
            }
        }
    }
}

#[async_trait]
impl VersionTx for PgTx {
    async fn upsert_object(
        &mut self,
        object_guid: Uuid,
        object_type: &str,
        dn: &str,
        domain_id: Uuid,
    ) -> Result<Option<i64>> {
        let row = self
            .client()?
            .query_one(UPSERT_OBJECT, &[&object_guid, &object_type, &dn, &domain_id])
            .await?;
        Ok(row.get(0))
    }

    async fn version_snapshot(
        &mut self,
        object_guid: Uuid,
        usn_changed: i64,
    ) -> Result<serde_json::Value> {
        let row = self
            .client()?
            .query_opt(GET_VERSION_SNAPSHOT, &[&object_guid, &usn_changed])
            .await?
            .ok_or_else(|| {
                StoreError::query(format!("no version ({object_guid}, {usn_changed})"))
            })?;
        Ok(row.get(0))
    }

    async fn insert_version(
        &mut self,
        object_guid: Uuid,
        usn_changed: i64,
        timestamp: DateTime<Utc>,
        attributes_snapshot: &serde_json::Value,
        modified_by: &str,
    ) -> Result<()> {
        self.client()?
            .execute(
                INSERT_VERSION,
                &[
                    &object_guid,
                    &usn_changed,
                    &timestamp,
                    attributes_snapshot,
                    &modified_by,
                ],
            )
            .await?;
        debug!(%object_guid, usn_changed, "inserted version row");
        Ok(())
    }

    async fn set_last_processed_usn(&mut self, object_guid: Uuid, usn_changed: i64) -> Result<()> {
        self.client()?
            .execute(SET_LAST_PROCESSED_USN, &[&object_guid, &usn_changed])
            .await?;
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
        self.client()?
            .execute(
                INSERT_ATTRIBUTE_CHANGE,
                &[
                    &object_guid,
                    &usn_changed,
                    &attribute_schema_guid,
                    old_value,
                    new_value,
                    &timestamp,
                ],
            )
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

/// Drop and recreate the capture database via the management connection.
/// Destructive; meant for development resets only.
pub async fn recreate_database(management_dsn: &str, database: &str) -> Result<()> {
    if database.is_empty()
        || !database
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StoreError::config(format!(
            "refusing to recreate database with unsafe name {database:?}"
        )));
    }

    let (client, connection) = tokio_postgres::connect(management_dsn, NoTls)
        .await
        .map_err(|e| StoreError::pool(e.to_string()))?;
    let driver = tokio::spawn(connection);

    client
        .batch_execute(&format!("DROP DATABASE IF EXISTS \"{database}\""))
        .await?;
    client
        .batch_execute(&format!("CREATE DATABASE \"{database}\""))
        .await?;

    drop(client);
    let _ = driver.await;
    info!(database, "database recreated");
    Ok(())
}
