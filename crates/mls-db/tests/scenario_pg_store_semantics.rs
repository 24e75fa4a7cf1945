//! scenario_pg_store_semantics
//!
//! Requires a live PostgreSQL instance reachable via MLS_DATABASE_URL.
//! Every test prints SKIP and returns when that variable is absent.
//!
//! GREEN when the Postgres store upholds the same contract as the
//! in-memory store:
//! - migrations are idempotent;
//! - a second `1.0.0` is `DuplicateVersion` and the first bytes survive;
//! - a link code can be taken exactly once, even concurrently;
//! - activation only succeeds from `pending`;
//! - registering sweeps link codes that expired unredeemed;
//! - grants upsert in place and list in first-insertion order.

use std::sync::Arc;
use std::time::Duration;

use mls_artifact::ArtifactSigner;
use mls_db::PgStore;
use mls_registry::{
    DeviceAuthority, GrantResolver, PollStatus, Publisher, RegistryError, RegistryStore,
};
use serde_json::json;

async fn store_or_skip() -> anyhow::Result<Option<Arc<PgStore>>> {
    let url = match std::env::var(mls_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MLS_DATABASE_URL not set");
            return Ok(None);
        }
    };
    let pool = mls_db::connect(&url).await?;
    mls_db::migrate(&pool).await?;
    Ok(Some(Arc::new(PgStore::new(pool))))
}

fn draft(tag: &str) -> serde_json::Value {
    json!({
        "manifest": {"name": tag},
        "indicators": [],
        "rules": [{"id": tag}],
        "orders": {"type": "market"}
    })
}

#[tokio::test]
async fn migrate_is_idempotent() -> anyhow::Result<()> {
    let Some(store) = store_or_skip().await? else {
        return Ok(());
    };
    mls_db::migrate(store.pool()).await?;
    mls_db::migrate(store.pool()).await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_version_rejected_and_bytes_kept() -> anyhow::Result<()> {
    let Some(store) = store_or_skip().await? else {
        return Ok(());
    };
    let publisher = Publisher::new(store.clone(), Arc::new(ArtifactSigner::from_seed(&[1u8; 32])));
    let owner = format!("pg-{}", uuid::Uuid::new_v4());

    let s = publisher.create_strategy(&owner, "pg").await?;
    publisher.update_draft(&owner, s.id, draft("a")).await?;
    publisher.publish(&owner, s.id, "1.0.0").await?;
    let before = store.read_artifact(s.id, "1.0.0").await?.expect("stored");

    // Race two publishers past the pre-check: the constraint must decide.
    let again = mls_registry::VersionRecord {
        semver: "1.0.0".to_string(),
        content_hash: "ff".repeat(32),
        validator: "W/\"x\"".to_string(),
        created_at: chrono::Utc::now(),
    };
    let err = store
        .append_version(s.id, again, b"other".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, mls_registry::StoreError::DuplicateVersion { .. }));

    let after = store.read_artifact(s.id, "1.0.0").await?.expect("stored");
    assert_eq!(before, after);

    publisher.publish(&owner, s.id, "1.0.1").await?;
    let s = publisher.get_strategy(&owner, s.id).await?;
    assert_eq!(s.versions.len(), 2);
    assert!(s.versions[0].created_at < s.versions[1].created_at);
    assert_eq!(s.latest().map(|v| v.semver.as_str()), Some("1.0.1"));
    Ok(())
}

#[tokio::test]
async fn link_code_is_taken_once() -> anyhow::Result<()> {
    let Some(store) = store_or_skip().await? else {
        return Ok(());
    };
    let auth = Arc::new(DeviceAuthority::new(
        store.clone(),
        Duration::from_secs(600),
        "http://localhost:8000/v1/devices/activate",
    ));
    let reg = auth.register().await?;

    let (a, b) = tokio::join!(
        auth.redeem(&reg.user_code, "u1"),
        auth.redeem(&reg.user_code, "u2")
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

    match auth.poll(reg.device_id).await? {
        PollStatus::Active { device_token } => {
            let dev = auth.authenticate(Some(reg.device_id), &device_token).await?;
            assert_eq!(dev.device_id, reg.device_id);
        }
        other => panic!("expected active, got {other:?}"),
    }

    assert!(matches!(
        auth.redeem(&reg.user_code, "u3").await,
        Err(RegistryError::CodeInvalidOrExpired)
    ));
    Ok(())
}

#[tokio::test]
async fn activation_requires_pending() -> anyhow::Result<()> {
    let Some(store) = store_or_skip().await? else {
        return Ok(());
    };
    let auth = DeviceAuthority::new(store.clone(), Duration::from_secs(600), "http://x/v1/devices/activate");
    let reg = auth.register().await?;
    auth.revoke(reg.device_id).await?;
    assert!(
        !store
            .activate_device(reg.device_id, "u", "tok", chrono::Utc::now())
            .await?
    );
    assert_eq!(auth.poll(reg.device_id).await?, PollStatus::Revoked);
    Ok(())
}

#[tokio::test]
async fn grants_upsert_in_place() -> anyhow::Result<()> {
    let Some(store) = store_or_skip().await? else {
        return Ok(());
    };
    let publisher = Publisher::new(store.clone(), Arc::new(ArtifactSigner::from_seed(&[2u8; 32])));
    let auth = DeviceAuthority::new(store.clone(), Duration::from_secs(600), "http://x/v1/devices/activate");
    let grants = GrantResolver::new(store.clone());
    let owner = format!("pg-{}", uuid::Uuid::new_v4());

    let a = publisher.create_strategy(&owner, "a").await?;
    let b = publisher.create_strategy(&owner, "b").await?;
    for s in [&a, &b] {
        publisher.update_draft(&owner, s.id, draft("x")).await?;
        publisher.publish(&owner, s.id, "1.0.0").await?;
    }
    let device = auth.register().await?.device_id;

    grants.grant(&owner, device, b.id, true, None).await?;
    grants.grant(&owner, device, a.id, true, None).await?;
    grants
        .grant(&owner, device, b.id, false, Some("1.0.0".to_string()))
        .await?;

    let listed = grants.grants(device).await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].strategy_id, b.id);
    assert_eq!(listed[0].pinned_semver.as_deref(), Some("1.0.0"));
    assert_eq!(listed[1].strategy_id, a.id);
    Ok(())
}

#[tokio::test]
async fn expired_link_codes_are_swept_on_register() -> anyhow::Result<()> {
    let Some(store) = store_or_skip().await? else {
        return Ok(());
    };
    let auth = DeviceAuthority::new(
        store.clone(),
        Duration::from_secs(600),
        "http://x/v1/devices/activate",
    );
    // Issued far enough back that its code is already expired; the sweep
    // below runs at the wall clock so live codes of other tests survive.
    let now = chrono::Utc::now();
    let abandoned = auth.register_at(now - chrono::Duration::seconds(700)).await?;
    auth.register_at(now).await?;

    assert!(store.take_link(&abandoned.user_code).await?.is_none());
    let device = store
        .get_device(abandoned.device_id)
        .await?
        .expect("device row kept");
    assert!(device.user_code.is_none());
    assert!(device.user_code_expires_at.is_none());
    Ok(())
}
