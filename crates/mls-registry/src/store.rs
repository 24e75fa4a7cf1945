//! Storage seam.
//!
//! [`RegistryStore`] is the only way registry services touch persisted
//! state. Implementations must provide:
//! - atomic check-and-append for versions (duplicate semver is an error,
//!   never an overwrite), with `created_at` strictly increasing per strategy;
//! - atomic take (delete + return) of link records;
//! - compare-and-swap activation (`pending` → `active` only);
//! - indexed lookups for token → device and code → link.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{Device, Grant, LinkRecord, Strategy, StoredArtifact, VersionRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("version {semver} already exists for strategy {strategy_id}")]
    DuplicateVersion { strategy_id: Uuid, semver: String },
    #[error("unknown strategy {0}")]
    UnknownStrategy(Uuid),
    /// Link code already held by another pending device.
    #[error("link code collision")]
    CodeCollision,
    #[error("backend: {0}")]
    Backend(String),
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    // ---- strategies ----
    async fn insert_strategy(&self, strategy: &Strategy) -> Result<(), StoreError>;

    /// Strategy with its versions in publish order.
    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>, StoreError>;

    async fn list_strategies(&self, owner: &str) -> Result<Vec<Strategy>, StoreError>;

    /// Returns `false` when the strategy does not exist.
    async fn update_draft(
        &self,
        id: Uuid,
        draft: &Value,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Append a version and its artifact bytes in one step.
    ///
    /// If `record.created_at` is not after the strategy's newest version, the
    /// store bumps it to that value + 1µs. Returns the record as stored.
    async fn append_version(
        &self,
        strategy_id: Uuid,
        record: VersionRecord,
        bytes: Vec<u8>,
    ) -> Result<VersionRecord, StoreError>;

    async fn read_artifact(
        &self,
        strategy_id: Uuid,
        semver: &str,
    ) -> Result<Option<StoredArtifact>, StoreError>;

    // ---- devices ----
    /// Insert a pending device together with its link record.
    /// `CodeCollision` if `link.user_code` is taken.
    ///
    /// Link records expired at `device.created_at` are deleted first and
    /// their devices lose the stale code.
    async fn insert_pending_device(
        &self,
        device: &Device,
        link: &LinkRecord,
    ) -> Result<(), StoreError>;

    /// Delete the link record for `user_code` and return it. At most one
    /// caller ever receives a given record.
    async fn take_link(&self, user_code: &str) -> Result<Option<LinkRecord>, StoreError>;

    /// `pending` → `active`, setting owner/token and clearing the user code.
    /// Returns `false` if the device was not pending.
    async fn activate_device(
        &self,
        device_id: Uuid,
        owner_user_id: &str,
        device_token: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn clear_user_code(&self, device_id: Uuid) -> Result<(), StoreError>;

    async fn get_device(&self, device_id: Uuid) -> Result<Option<Device>, StoreError>;

    async fn device_by_token(&self, device_token: &str) -> Result<Option<Device>, StoreError>;

    /// Returns `false` when the device does not exist.
    async fn revoke_device(&self, device_id: Uuid) -> Result<bool, StoreError>;

    // ---- grants ----
    /// Insert, or replace in place the grant for the same (device, strategy).
    async fn upsert_grant(&self, grant: &Grant) -> Result<(), StoreError>;

    /// Grants of a device in first-insertion order.
    async fn grants_for_device(&self, device_id: Uuid) -> Result<Vec<Grant>, StoreError>;
}

/// `created_at` for a new version given the newest existing one.
pub fn next_version_time(
    proposed: DateTime<Utc>,
    newest: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match newest {
        Some(prev) if proposed <= prev => prev + chrono::Duration::microseconds(1),
        _ => proposed,
    }
}
