//! In-process [`RegistryStore`].
//!
//! One `RwLock` guards all maps. Every mutating operation runs its whole
//! check-then-write under a single write guard, which gives the per-strategy
//! and per-device serialization the trait requires.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{next_version_time, RegistryStore, StoreError};
use crate::types::{
    Device, DeviceStatus, Grant, LinkRecord, Strategy, StoredArtifact, VersionRecord,
};

#[derive(Default)]
struct Inner {
    strategies: HashMap<Uuid, Strategy>,
    artifacts: HashMap<(Uuid, String), StoredArtifact>,
    devices: HashMap<Uuid, Device>,
    /// device_token → device_id
    tokens: HashMap<String, Uuid>,
    /// user_code → link
    links: HashMap<String, LinkRecord>,
    grants: HashMap<Uuid, Vec<Grant>>,
}

/// Drop link records expired at `now` and clear the code on their devices.
fn sweep_expired_links(g: &mut Inner, now: DateTime<Utc>) {
    let expired: Vec<String> = g
        .links
        .values()
        .filter(|link| link.expires_at <= now)
        .map(|link| link.user_code.clone())
        .collect();
    for code in expired {
        let Some(link) = g.links.remove(&code) else {
            continue;
        };
        if let Some(device) = g.devices.get_mut(&link.device_id) {
            device.user_code = None;
            device.user_code_expires_at = None;
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn insert_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        let mut g = self.inner.write().await;
        if g.strategies.contains_key(&strategy.id) {
            return Err(StoreError::Backend(format!(
                "strategy {} already exists",
                strategy.id
            )));
        }
        g.strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>, StoreError> {
        Ok(self.inner.read().await.strategies.get(&id).cloned())
    }

    async fn list_strategies(&self, owner: &str) -> Result<Vec<Strategy>, StoreError> {
        let g = self.inner.read().await;
        let mut out: Vec<Strategy> = g
            .strategies
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn update_draft(
        &self,
        id: Uuid,
        draft: &Value,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut g = self.inner.write().await;
        match g.strategies.get_mut(&id) {
            Some(s) => {
                s.draft = Some(draft.clone());
                s.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_version(
        &self,
        strategy_id: Uuid,
        mut record: VersionRecord,
        bytes: Vec<u8>,
    ) -> Result<VersionRecord, StoreError> {
        let mut g = self.inner.write().await;
        let strategy = g
            .strategies
            .get_mut(&strategy_id)
            .ok_or(StoreError::UnknownStrategy(strategy_id))?;

        if strategy.version(&record.semver).is_some() {
            return Err(StoreError::DuplicateVersion {
                strategy_id,
                semver: record.semver,
            });
        }

        let newest = strategy.versions.iter().map(|v| v.created_at).max();
        record.created_at = next_version_time(record.created_at, newest);
        strategy.versions.push(record.clone());
        strategy.updated_at = record.created_at;

        let validator = record.validator.clone();
        g.artifacts.insert(
            (strategy_id, record.semver.clone()),
            StoredArtifact { bytes, validator },
        );
        Ok(record)
    }

    async fn read_artifact(
        &self,
        strategy_id: Uuid,
        semver: &str,
    ) -> Result<Option<StoredArtifact>, StoreError> {
        let g = self.inner.read().await;
        Ok(g.artifacts.get(&(strategy_id, semver.to_string())).cloned())
    }

    async fn insert_pending_device(
        &self,
        device: &Device,
        link: &LinkRecord,
    ) -> Result<(), StoreError> {
        let mut g = self.inner.write().await;
        sweep_expired_links(&mut g, device.created_at);
        if g.links.contains_key(&link.user_code) {
            return Err(StoreError::CodeCollision);
        }
        g.devices.insert(device.device_id, device.clone());
        g.links.insert(link.user_code.clone(), link.clone());
        Ok(())
    }

    async fn take_link(&self, user_code: &str) -> Result<Option<LinkRecord>, StoreError> {
        Ok(self.inner.write().await.links.remove(user_code))
    }

    async fn activate_device(
        &self,
        device_id: Uuid,
        owner_user_id: &str,
        device_token: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut g = self.inner.write().await;
        let Some(device) = g.devices.get_mut(&device_id) else {
            return Ok(false);
        };
        if device.status != DeviceStatus::Pending {
            return Ok(false);
        }
        device.status = DeviceStatus::Active;
        device.owner_user_id = Some(owner_user_id.to_string());
        device.device_token = Some(device_token.to_string());
        device.user_code = None;
        device.user_code_expires_at = None;
        device.activated_at = Some(at);
        g.tokens.insert(device_token.to_string(), device_id);
        Ok(true)
    }

    async fn clear_user_code(&self, device_id: Uuid) -> Result<(), StoreError> {
        let mut g = self.inner.write().await;
        if let Some(device) = g.devices.get_mut(&device_id) {
            device.user_code = None;
            device.user_code_expires_at = None;
        }
        Ok(())
    }

    async fn get_device(&self, device_id: Uuid) -> Result<Option<Device>, StoreError> {
        Ok(self.inner.read().await.devices.get(&device_id).cloned())
    }

    async fn device_by_token(&self, device_token: &str) -> Result<Option<Device>, StoreError> {
        let g = self.inner.read().await;
        Ok(g
            .tokens
            .get(device_token)
            .and_then(|id| g.devices.get(id))
            .cloned())
    }

    async fn revoke_device(&self, device_id: Uuid) -> Result<bool, StoreError> {
        let mut g = self.inner.write().await;
        let Some(device) = g.devices.get_mut(&device_id) else {
            return Ok(false);
        };
        device.status = DeviceStatus::Revoked;
        device.user_code = None;
        device.user_code_expires_at = None;
        let token = device.device_token.clone();
        if let Some(token) = token {
            g.tokens.remove(&token);
        }
        g.links.retain(|_, link| link.device_id != device_id);
        Ok(true)
    }

    async fn upsert_grant(&self, grant: &Grant) -> Result<(), StoreError> {
        let mut g = self.inner.write().await;
        let grants = g.grants.entry(grant.device_id).or_default();
        match grants
            .iter_mut()
            .find(|existing| existing.strategy_id == grant.strategy_id)
        {
            Some(existing) => *existing = grant.clone(),
            None => grants.push(grant.clone()),
        }
        Ok(())
    }

    async fn grants_for_device(&self, device_id: Uuid) -> Result<Vec<Grant>, StoreError> {
        let g = self.inner.read().await;
        Ok(g.grants.get(&device_id).cloned().unwrap_or_default())
    }
}
