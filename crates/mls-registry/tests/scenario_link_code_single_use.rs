//! scenario_link_code_single_use
//!
//! GREEN when:
//! - A redeemed code cannot be redeemed again.
//! - An expired code is rejected, purged, and stays rejected.
//! - Of two concurrent redemptions of one code exactly one succeeds.
//! - Codes that expire unredeemed are swept by the next registration.
//! - Poll reflects pending → active → revoked, and tokens stop working
//!   after revocation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mls_registry::{DeviceAuthority, MemoryStore, PollStatus, RegistryError, RegistryStore};

fn authority(store: Arc<MemoryStore>) -> DeviceAuthority {
    DeviceAuthority::new(store, Duration::from_secs(600), "http://localhost:8000/v1/devices/activate")
}

#[tokio::test]
async fn redeemed_code_is_single_use() {
    let store = Arc::new(MemoryStore::new());
    let auth = authority(store.clone());

    let reg = auth.register().await.unwrap();
    assert_eq!(reg.expires_in, 600);
    assert_eq!(reg.verification_uri, "http://localhost:8000/v1/devices/activate");
    assert_eq!(auth.poll(reg.device_id).await.unwrap(), PollStatus::Pending);

    // lower-case input with whitespace still matches
    let code_input = format!("  {}  ", reg.user_code.to_lowercase());
    let act = auth.redeem(&code_input, "u_demo").await.unwrap();
    assert_eq!(act.device_id, reg.device_id);
    assert_eq!(act.device_token.len(), 64);

    assert!(matches!(
        auth.redeem(&reg.user_code, "u_demo").await,
        Err(RegistryError::CodeInvalidOrExpired)
    ));

    let device = store.get_device(reg.device_id).await.unwrap().unwrap();
    assert!(device.user_code.is_none());
    assert_eq!(device.owner_user_id.as_deref(), Some("u_demo"));
    assert!(device.activated_at.is_some());

    assert_eq!(
        auth.poll(reg.device_id).await.unwrap(),
        PollStatus::Active {
            device_token: act.device_token
        }
    );
}

#[tokio::test]
async fn expired_code_is_rejected_and_not_resurrectable() {
    let store = Arc::new(MemoryStore::new());
    let auth = authority(store.clone());
    let t0 = Utc::now();

    let reg = auth.register_at(t0).await.unwrap();
    let late = t0 + chrono::Duration::seconds(601);
    assert!(matches!(
        auth.redeem_at(&reg.user_code, "u_demo", late).await,
        Err(RegistryError::CodeInvalidOrExpired)
    ));

    // Even with a clock that says "still valid", the code is gone.
    assert!(matches!(
        auth.redeem_at(&reg.user_code, "u_demo", t0).await,
        Err(RegistryError::CodeInvalidOrExpired)
    ));

    let device = store.get_device(reg.device_id).await.unwrap().unwrap();
    assert!(device.user_code.is_none());
    assert_eq!(auth.poll(reg.device_id).await.unwrap(), PollStatus::Pending);
}

#[tokio::test]
async fn code_at_exact_expiry_instant_is_expired() {
    let store = Arc::new(MemoryStore::new());
    let auth = authority(store);
    let t0 = Utc::now();
    let reg = auth.register_at(t0).await.unwrap();
    assert!(auth
        .redeem_at(&reg.user_code, "u", t0 + chrono::Duration::seconds(600))
        .await
        .is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redemptions_exactly_one_wins() {
    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(authority(store));
    let reg = auth.register().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let auth = auth.clone();
        let code = reg.user_code.clone();
        handles.push(tokio::spawn(async move {
            auth.redeem(&code, &format!("user{i}")).await
        }));
    }

    let mut wins = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(RegistryError::CodeInvalidOrExpired) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn authenticate_and_revoke() {
    let store = Arc::new(MemoryStore::new());
    let auth = authority(store);
    let reg = auth.register().await.unwrap();
    let act = auth.redeem(&reg.user_code, "u_demo").await.unwrap();

    assert_eq!(
        auth.authenticate(Some(reg.device_id), &act.device_token)
            .await
            .unwrap()
            .device_id,
        reg.device_id
    );
    assert!(matches!(
        auth.authenticate(Some(uuid::Uuid::new_v4()), &act.device_token)
            .await,
        Err(RegistryError::UnauthorizedDevice)
    ));
    assert!(matches!(
        auth.authenticate(None, "nope").await,
        Err(RegistryError::UnauthorizedDevice)
    ));

    auth.revoke(reg.device_id).await.unwrap();
    assert_eq!(auth.poll(reg.device_id).await.unwrap(), PollStatus::Revoked);
    assert!(matches!(
        auth.authenticate(None, &act.device_token).await,
        Err(RegistryError::UnauthorizedDevice)
    ));
}

#[tokio::test]
async fn unknown_device_is_not_found() {
    let auth = authority(Arc::new(MemoryStore::new()));
    let id = uuid::Uuid::new_v4();
    assert!(matches!(
        auth.poll(id).await,
        Err(RegistryError::DeviceNotFound(x)) if x == id
    ));
    assert!(matches!(
        auth.revoke(id).await,
        Err(RegistryError::DeviceNotFound(_))
    ));
}

#[tokio::test]
async fn revoked_pending_device_cannot_be_activated() {
    let store = Arc::new(MemoryStore::new());
    let auth = authority(store);
    let reg = auth.register().await.unwrap();
    auth.revoke(reg.device_id).await.unwrap();
    assert!(matches!(
        auth.redeem(&reg.user_code, "u").await,
        Err(RegistryError::CodeInvalidOrExpired)
    ));
}

#[tokio::test]
async fn unredeemed_expired_codes_are_swept_on_register() {
    let store = Arc::new(MemoryStore::new());
    let auth = authority(store.clone());
    let t0 = Utc::now();
    let abandoned = auth.register_at(t0).await.unwrap();

    let later = t0 + chrono::Duration::seconds(601);
    let next = auth.register_at(later).await.unwrap();

    assert!(store.take_link(&abandoned.user_code).await.unwrap().is_none());
    let device = store.get_device(abandoned.device_id).await.unwrap().unwrap();
    assert!(device.user_code.is_none());
    assert_eq!(auth.poll(abandoned.device_id).await.unwrap(), PollStatus::Pending);

    auth.redeem_at(&next.user_code, "u_demo", later).await.unwrap();
}
