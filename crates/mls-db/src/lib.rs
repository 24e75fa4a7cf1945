//! mls-db
//!
//! Postgres implementation of [`RegistryStore`].
//!
//! Concurrency rests on the database, never on process locks:
//! - duplicate versions: `uq_strategy_versions_semver` inside one transaction
//!   that also row-locks the strategy (serializes `created_at` bumps);
//! - link take: `delete ... returning`;
//! - activation: `update ... where status = 'pending'`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

use mls_registry::{
    next_version_time, Device, DeviceStatus, Grant, LinkRecord, RegistryStore, StoreError,
    Strategy, StoredArtifact, VersionRecord,
};

pub const ENV_DB_URL: &str = "MLS_DATABASE_URL";

/// Connect to Postgres using the URL held in env var `var_name`.
pub async fn connect_from_env(var_name: &str) -> Result<PgPool> {
    let url = std::env::var(var_name).with_context(|| format!("missing env var {var_name}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    tracing::info!("registry migrations applied");
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn versions_for(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<VersionRecord>>, StoreError> {
        let rows = sqlx::query(
            r#"
            select strategy_id, semver, content_hash, validator, created_at
            from strategy_versions
            where strategy_id = any($1)
            order by seq
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("load versions"))?;

        let mut out: HashMap<Uuid, Vec<VersionRecord>> = HashMap::new();
        for row in rows {
            let sid: Uuid = row.try_get("strategy_id").map_err(backend("decode version"))?;
            out.entry(sid).or_default().push(VersionRecord {
                semver: row.try_get("semver").map_err(backend("decode version"))?,
                content_hash: row.try_get("content_hash").map_err(backend("decode version"))?,
                validator: row.try_get("validator").map_err(backend("decode version"))?,
                created_at: row.try_get("created_at").map_err(backend("decode version"))?,
            });
        }
        Ok(out)
    }
}

fn backend(ctx: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| StoreError::Backend(format!("{ctx}: {e}"))
}

/// Postgres unique_violation (23505) on the named constraint.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn strategy_from_row(row: &PgRow) -> Result<Strategy, StoreError> {
    Ok(Strategy {
        id: row.try_get("strategy_id").map_err(backend("decode strategy"))?,
        owner: row.try_get("owner").map_err(backend("decode strategy"))?,
        name: row.try_get("name").map_err(backend("decode strategy"))?,
        draft: row
            .try_get::<Option<Value>, _>("draft")
            .map_err(backend("decode strategy"))?,
        versions: Vec::new(),
        created_at: row.try_get("created_at").map_err(backend("decode strategy"))?,
        updated_at: row.try_get("updated_at").map_err(backend("decode strategy"))?,
    })
}

fn device_from_row(row: &PgRow) -> Result<Device, StoreError> {
    let status: String = row.try_get("status").map_err(backend("decode device"))?;
    Ok(Device {
        device_id: row.try_get("device_id").map_err(backend("decode device"))?,
        status: DeviceStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("unknown device status {status:?}")))?,
        user_code: row.try_get("user_code").map_err(backend("decode device"))?,
        user_code_expires_at: row
            .try_get("user_code_expires_at")
            .map_err(backend("decode device"))?,
        device_token: row.try_get("device_token").map_err(backend("decode device"))?,
        owner_user_id: row.try_get("owner_user_id").map_err(backend("decode device"))?,
        created_at: row.try_get("created_at").map_err(backend("decode device"))?,
        activated_at: row.try_get("activated_at").map_err(backend("decode device"))?,
    })
}

const DEVICE_COLUMNS: &str = "device_id, status, user_code, user_code_expires_at, device_token, \
                              owner_user_id, created_at, activated_at";

#[async_trait]
impl RegistryStore for PgStore {
    async fn insert_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into strategies (strategy_id, owner, name, draft, created_at, updated_at)
            values ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(strategy.id)
        .bind(&strategy.owner)
        .bind(&strategy.name)
        .bind(&strategy.draft)
        .bind(strategy.created_at)
        .bind(strategy.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend("insert strategy"))?;
        Ok(())
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>, StoreError> {
        let row = sqlx::query(
            r#"
            select strategy_id, owner, name, draft, created_at, updated_at
            from strategies
            where strategy_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("get strategy"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut strategy = strategy_from_row(&row)?;
        strategy.versions = self
            .versions_for(&[id])
            .await?
            .remove(&id)
            .unwrap_or_default();
        Ok(Some(strategy))
    }

    async fn list_strategies(&self, owner: &str) -> Result<Vec<Strategy>, StoreError> {
        let rows = sqlx::query(
            r#"
            select strategy_id, owner, name, draft, created_at, updated_at
            from strategies
            where owner = $1
            order by created_at, strategy_id
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("list strategies"))?;

        let mut out = rows
            .iter()
            .map(strategy_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = out.iter().map(|s| s.id).collect();
        let mut versions = self.versions_for(&ids).await?;
        for s in &mut out {
            s.versions = versions.remove(&s.id).unwrap_or_default();
        }
        Ok(out)
    }

    async fn update_draft(
        &self,
        id: Uuid,
        draft: &Value,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query("update strategies set draft = $2, updated_at = $3 where strategy_id = $1")
            .bind(id)
            .bind(draft)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(backend("update draft"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn append_version(
        &self,
        strategy_id: Uuid,
        mut record: VersionRecord,
        bytes: Vec<u8>,
    ) -> Result<VersionRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend("begin"))?;

        let locked = sqlx::query("select 1 from strategies where strategy_id = $1 for update")
            .bind(strategy_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend("lock strategy"))?;
        if locked.is_none() {
            return Err(StoreError::UnknownStrategy(strategy_id));
        }

        let (newest,): (Option<DateTime<Utc>>,) = sqlx::query_as(
            "select max(created_at) from strategy_versions where strategy_id = $1",
        )
        .bind(strategy_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend("newest version"))?;
        record.created_at = next_version_time(record.created_at, newest);

        let inserted = sqlx::query(
            r#"
            insert into strategy_versions
              (strategy_id, semver, content_hash, validator, artifact, created_at)
            values ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(strategy_id)
        .bind(&record.semver)
        .bind(&record.content_hash)
        .bind(&record.validator)
        .bind(&bytes)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_constraint_violation(&e, "uq_strategy_versions_semver") {
                return Err(StoreError::DuplicateVersion {
                    strategy_id,
                    semver: record.semver,
                });
            }
            return Err(backend("insert version")(e));
        }

        sqlx::query("update strategies set updated_at = $2 where strategy_id = $1")
            .bind(strategy_id)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(backend("touch strategy"))?;

        tx.commit().await.map_err(backend("commit version"))?;
        Ok(record)
    }

    async fn read_artifact(
        &self,
        strategy_id: Uuid,
        semver: &str,
    ) -> Result<Option<StoredArtifact>, StoreError> {
        let row: Option<(Vec<u8>, String)> = sqlx::query_as(
            "select artifact, validator from strategy_versions where strategy_id = $1 and semver = $2",
        )
        .bind(strategy_id)
        .bind(semver)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("read artifact"))?;
        Ok(row.map(|(bytes, validator)| StoredArtifact { bytes, validator }))
    }

    async fn insert_pending_device(
        &self,
        device: &Device,
        link: &LinkRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend("begin"))?;

        sqlx::query(
            r#"
            with expired as (
              delete from link_codes where expires_at <= $1 returning device_id
            )
            update devices
            set user_code = null, user_code_expires_at = null
            where device_id in (select device_id from expired)
            "#,
        )
        .bind(device.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend("sweep expired links"))?;

        sqlx::query(
            r#"
            insert into devices
              (device_id, status, user_code, user_code_expires_at, created_at)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(device.device_id)
        .bind(device.status.as_str())
        .bind(&device.user_code)
        .bind(device.user_code_expires_at)
        .bind(device.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend("insert device"))?;

        let linked = sqlx::query(
            "insert into link_codes (user_code, device_id, expires_at) values ($1, $2, $3)",
        )
        .bind(&link.user_code)
        .bind(link.device_id)
        .bind(link.expires_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = linked {
            if is_unique_constraint_violation(&e, "link_codes_pkey") {
                return Err(StoreError::CodeCollision);
            }
            return Err(backend("insert link code")(e));
        }

        tx.commit().await.map_err(backend("commit device"))?;
        Ok(())
    }

    async fn take_link(&self, user_code: &str) -> Result<Option<LinkRecord>, StoreError> {
        let row: Option<(String, Uuid, DateTime<Utc>)> = sqlx::query_as(
            "delete from link_codes where user_code = $1 returning user_code, device_id, expires_at",
        )
        .bind(user_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("take link"))?;
        Ok(row.map(|(user_code, device_id, expires_at)| LinkRecord {
            user_code,
            device_id,
            expires_at,
        }))
    }

    async fn activate_device(
        &self,
        device_id: Uuid,
        owner_user_id: &str,
        device_token: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            update devices
            set status = 'active',
                owner_user_id = $2,
                device_token = $3,
                user_code = null,
                user_code_expires_at = null,
                activated_at = $4
            where device_id = $1 and status = 'pending'
            "#,
        )
        .bind(device_id)
        .bind(owner_user_id)
        .bind(device_token)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend("activate device"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn clear_user_code(&self, device_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "update devices set user_code = null, user_code_expires_at = null where device_id = $1",
        )
        .bind(device_id)
        .execute(&self.pool)
        .await
        .map_err(backend("clear user code"))?;
        Ok(())
    }

    async fn get_device(&self, device_id: Uuid) -> Result<Option<Device>, StoreError> {
        let sql = format!("select {DEVICE_COLUMNS} from devices where device_id = $1");
        let row = sqlx::query(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("get device"))?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn device_by_token(&self, device_token: &str) -> Result<Option<Device>, StoreError> {
        let sql = format!("select {DEVICE_COLUMNS} from devices where device_token = $1");
        let row = sqlx::query(&sql)
            .bind(device_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("device by token"))?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn revoke_device(&self, device_id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend("begin"))?;
        let res = sqlx::query(
            r#"
            update devices
            set status = 'revoked', user_code = null, user_code_expires_at = null
            where device_id = $1
            "#,
        )
        .bind(device_id)
        .execute(&mut *tx)
        .await
        .map_err(backend("revoke device"))?;
        sqlx::query("delete from link_codes where device_id = $1")
            .bind(device_id)
            .execute(&mut *tx)
            .await
            .map_err(backend("revoke links"))?;
        tx.commit().await.map_err(backend("commit revoke"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn upsert_grant(&self, grant: &Grant) -> Result<(), StoreError> {
        // seq is left alone on conflict so the grant keeps its position.
        sqlx::query(
            r#"
            insert into grants (device_id, strategy_id, allow_latest, pinned_semver)
            values ($1, $2, $3, $4)
            on conflict (device_id, strategy_id) do update
              set allow_latest = excluded.allow_latest,
                  pinned_semver = excluded.pinned_semver
            "#,
        )
        .bind(grant.device_id)
        .bind(grant.strategy_id)
        .bind(grant.allow_latest)
        .bind(&grant.pinned_semver)
        .execute(&self.pool)
        .await
        .map_err(backend("upsert grant"))?;
        Ok(())
    }

    async fn grants_for_device(&self, device_id: Uuid) -> Result<Vec<Grant>, StoreError> {
        let rows: Vec<(Uuid, Uuid, bool, Option<String>)> = sqlx::query_as(
            r#"
            select device_id, strategy_id, allow_latest, pinned_semver
            from grants
            where device_id = $1
            order by seq
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("grants for device"))?;
        Ok(rows
            .into_iter()
            .map(|(device_id, strategy_id, allow_latest, pinned_semver)| Grant {
                device_id,
                strategy_id,
                allow_latest,
                pinned_semver,
            })
            .collect())
    }
}
