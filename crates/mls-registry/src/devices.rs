//! Device authorization state machine.
//!
//! ```text
//! register ──► pending ──redeem(code, within TTL)──► active ──revoke──► revoked
//!                 │                                    │
//!                 └── code expires / consumed ─────────┘ (code cleared)
//! ```
//!
//! A link code is taken from the store with an atomic delete-and-return, so
//! of two concurrent redemptions exactly one sees the record. Activation is
//! a compare-and-swap on `pending`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::publisher::now_micros;
use crate::store::{RegistryStore, StoreError};
use crate::types::{Device, DeviceStatus, LinkRecord};

/// Attempts at drawing a link code that no pending device holds.
const MAX_CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub device_id: Uuid,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until `user_code` expires.
    pub expires_in: u64,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    pub device_id: Uuid,
    pub device_token: String,
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activation")
            .field("device_id", &self.device_id)
            .field("device_token", &"<REDACTED>")
            .finish()
    }
}

/// What a waiting device sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Active { device_token: String },
    Revoked,
}

pub struct DeviceAuthority {
    store: Arc<dyn RegistryStore>,
    code_ttl: Duration,
    verification_uri: String,
}

impl DeviceAuthority {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        code_ttl: std::time::Duration,
        verification_uri: impl Into<String>,
    ) -> Self {
        Self {
            store,
            code_ttl: Duration::from_std(code_ttl).unwrap_or(Duration::minutes(10)),
            verification_uri: verification_uri.into(),
        }
    }

    pub async fn register(&self) -> Result<Registration, RegistryError> {
        self.register_at(now_micros()).await
    }

    pub async fn register_at(&self, now: DateTime<Utc>) -> Result<Registration, RegistryError> {
        let expires_at = now + self.code_ttl;
        let device_id = Uuid::new_v4();

        for _ in 0..MAX_CODE_ATTEMPTS {
            let user_code = generate_link_code();
            let device = Device {
                device_id,
                status: DeviceStatus::Pending,
                user_code: Some(user_code.clone()),
                user_code_expires_at: Some(expires_at),
                device_token: None,
                owner_user_id: None,
                created_at: now,
                activated_at: None,
            };
            let link = LinkRecord {
                user_code: user_code.clone(),
                device_id,
                expires_at,
            };
            match self.store.insert_pending_device(&device, &link).await {
                Ok(()) => {
                    info!(%device_id, "device registered");
                    return Ok(Registration {
                        device_id,
                        user_code,
                        verification_uri: self.verification_uri.clone(),
                        expires_in: self.code_ttl.num_seconds().max(0) as u64,
                    });
                }
                Err(StoreError::CodeCollision) => {
                    warn!(%device_id, "link code collision, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RegistryError::Store(StoreError::Backend(
            "could not allocate a unique link code".to_string(),
        )))
    }

    pub async fn redeem(&self, user_code: &str, user_id: &str) -> Result<Activation, RegistryError> {
        self.redeem_at(user_code, user_id, now_micros()).await
    }

    /// Consume `user_code` and activate its device for `user_id`.
    ///
    /// The code is gone after this call whatever the outcome: an expired
    /// code is purged, never restored.
    pub async fn redeem_at(
        &self,
        user_code: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Activation, RegistryError> {
        let code = normalize_link_code(user_code);
        if code.is_empty() {
            return Err(RegistryError::CodeInvalidOrExpired);
        }
        let link = self
            .store
            .take_link(&code)
            .await?
            .ok_or(RegistryError::CodeInvalidOrExpired)?;

        if link.expires_at <= now {
            self.store.clear_user_code(link.device_id).await?;
            warn!(device_id = %link.device_id, "expired link code purged");
            return Err(RegistryError::CodeInvalidOrExpired);
        }

        let device_token = generate_device_token();
        let activated = self
            .store
            .activate_device(link.device_id, user_id, &device_token, now)
            .await?;
        if !activated {
            return Err(RegistryError::CodeInvalidOrExpired);
        }

        info!(device_id = %link.device_id, user_id, "device activated");
        Ok(Activation {
            device_id: link.device_id,
            device_token,
        })
    }

    /// Side-effect free status read.
    pub async fn poll(&self, device_id: Uuid) -> Result<PollStatus, RegistryError> {
        let device = self
            .store
            .get_device(device_id)
            .await?
            .ok_or(RegistryError::DeviceNotFound(device_id))?;
        Ok(match (device.status, device.device_token) {
            (DeviceStatus::Active, Some(device_token)) => PollStatus::Active { device_token },
            (DeviceStatus::Revoked, _) => PollStatus::Revoked,
            _ => PollStatus::Pending,
        })
    }

    /// The active device holding `token`. When `device_id` is given the token
    /// must belong to that device.
    pub async fn authenticate(
        &self,
        device_id: Option<Uuid>,
        token: &str,
    ) -> Result<Device, RegistryError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RegistryError::UnauthorizedDevice);
        }
        let device = self
            .store
            .device_by_token(token)
            .await?
            .ok_or(RegistryError::UnauthorizedDevice)?;
        if device.status != DeviceStatus::Active {
            return Err(RegistryError::UnauthorizedDevice);
        }
        if device_id.is_some_and(|id| id != device.device_id) {
            return Err(RegistryError::UnauthorizedDevice);
        }
        Ok(device)
    }

    pub async fn revoke(&self, device_id: Uuid) -> Result<(), RegistryError> {
        if !self.store.revoke_device(device_id).await? {
            return Err(RegistryError::DeviceNotFound(device_id));
        }
        info!(%device_id, "device revoked");
        Ok(())
    }
}

/// `XXXX-XXXX`, eight uppercase hex digits from the OS CSPRNG.
pub fn generate_link_code() -> String {
    let mut raw = [0u8; 4];
    OsRng.fill_bytes(&mut raw);
    let hex = hex::encode_upper(raw);
    format!("{}-{}", &hex[..4], &hex[4..])
}

/// 256-bit bearer token, lowercase hex.
pub fn generate_device_token() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Trim and upper-case user input so `abcd-1234 ` finds `ABCD-1234`.
pub fn normalize_link_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}
