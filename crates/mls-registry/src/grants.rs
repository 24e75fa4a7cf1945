//! Grants and per-device artifact resolution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::semver::is_valid_semver;
use crate::store::RegistryStore;
use crate::types::{artifact_url, Grant, ResolvedArtifact, Strategy, VersionRecord};

/// One grant as the device listing shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStrategyEntry {
    pub strategy_id: Uuid,
    pub name: String,
    /// Newest version by publish time, if any.
    pub latest: Option<String>,
    pub pinned: Option<String>,
    pub allow_latest: bool,
    /// The version this grant resolves to, if any.
    pub artifact: Option<ResolvedArtifact>,
}

pub struct GrantResolver {
    store: Arc<dyn RegistryStore>,
}

impl GrantResolver {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    /// Create or replace the grant for `(device_id, strategy_id)`.
    pub async fn grant(
        &self,
        owner: &str,
        device_id: Uuid,
        strategy_id: Uuid,
        allow_latest: bool,
        pinned_semver: Option<String>,
    ) -> Result<Grant, RegistryError> {
        if self.store.get_device(device_id).await?.is_none() {
            return Err(RegistryError::DeviceNotFound(device_id));
        }
        let strategy = self
            .store
            .get_strategy(strategy_id)
            .await?
            .ok_or(RegistryError::StrategyNotFound(strategy_id))?;
        if strategy.owner != owner {
            return Err(RegistryError::Forbidden);
        }

        let pinned_semver = pinned_semver
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(pin) = &pinned_semver {
            if !is_valid_semver(pin) {
                return Err(RegistryError::InvalidSemver(pin.clone()));
            }
            if strategy.version(pin).is_none() {
                return Err(RegistryError::UnknownVersion {
                    strategy_id,
                    semver: pin.clone(),
                });
            }
        }

        let grant = Grant {
            device_id,
            strategy_id,
            allow_latest,
            pinned_semver,
        };
        self.store.upsert_grant(&grant).await?;
        info!(
            %device_id,
            %strategy_id,
            allow_latest,
            pinned = grant.pinned_semver.as_deref().unwrap_or("-"),
            "grant stored"
        );
        Ok(grant)
    }

    pub async fn grants(&self, device_id: Uuid) -> Result<Vec<Grant>, RegistryError> {
        Ok(self.store.grants_for_device(device_id).await?)
    }

    /// Every grant of `device_id` with its resolution, in grant order.
    /// Grants whose strategy no longer exists are skipped.
    pub async fn listing(&self, device_id: Uuid) -> Result<Vec<DeviceStrategyEntry>, RegistryError> {
        let grants = self.store.grants_for_device(device_id).await?;
        let mut out = Vec::with_capacity(grants.len());
        for grant in grants {
            let Some(strategy) = self.store.get_strategy(grant.strategy_id).await? else {
                continue;
            };
            let artifact = select_version(&strategy, &grant).map(|v| ResolvedArtifact {
                strategy_id: strategy.id,
                name: strategy.name.clone(),
                semver: v.semver.clone(),
                content_hash: v.content_hash.clone(),
                validator: v.validator.clone(),
                url: artifact_url(strategy.id, &v.semver),
            });
            out.push(DeviceStrategyEntry {
                strategy_id: strategy.id,
                latest: strategy.latest().map(|v| v.semver.clone()),
                name: strategy.name,
                pinned: grant.pinned_semver,
                allow_latest: grant.allow_latest,
                artifact,
            });
        }
        Ok(out)
    }

    /// The artifact set `device_id` may fetch, in grant order.
    pub async fn resolve(&self, device_id: Uuid) -> Result<Vec<ResolvedArtifact>, RegistryError> {
        Ok(self
            .listing(device_id)
            .await?
            .into_iter()
            .filter_map(|entry| entry.artifact)
            .collect())
    }
}

/// Pinned → exactly that version (none if it is gone). Otherwise latest when
/// allowed. Otherwise nothing.
pub fn select_version<'a>(strategy: &'a Strategy, grant: &Grant) -> Option<&'a VersionRecord> {
    match &grant.pinned_semver {
        Some(pin) => strategy.version(pin),
        None if grant.allow_latest => strategy.latest(),
        None => None,
    }
}
