//! Registry records.
//!
//! These are the logical rows every store implementation persists. Field
//! names double as the JSON shape returned by the daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A strategy owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    /// Editable payload; absent until the first draft upload.
    pub draft: Option<Value>,
    /// Append-only, in publish order.
    pub versions: Vec<VersionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn version(&self, semver: &str) -> Option<&VersionRecord> {
        self.versions.iter().find(|v| v.semver == semver)
    }

    /// Most recent version by `created_at`. On a tie the later-inserted
    /// record wins (`max_by_key` keeps the last maximum).
    pub fn latest(&self) -> Option<&VersionRecord> {
        self.versions.iter().max_by_key(|v| v.created_at)
    }
}

/// Immutable metadata of one published version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub semver: String,
    /// sha256 hex of the canonical payload (equals `manifest.hash`).
    pub content_hash: String,
    /// Weak validator over the stored artifact bytes.
    pub validator: String,
    pub created_at: DateTime<Utc>,
}

/// Stored artifact bytes plus the validator they are served under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub bytes: Vec<u8>,
    pub validator: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Pending,
    Active,
    Revoked,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Active => "active",
            DeviceStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeviceStatus::Pending),
            "active" => Some(DeviceStatus::Active),
            "revoked" => Some(DeviceStatus::Revoked),
            _ => None,
        }
    }
}

/// Remote runtime identity.
///
/// `pending` → `active` (once, by code redemption) → `revoked` (terminal).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: Uuid,
    pub status: DeviceStatus,
    /// Set only while pending and not yet consumed or expired.
    pub user_code: Option<String>,
    pub user_code_expires_at: Option<DateTime<Utc>>,
    /// Set only once active.
    pub device_token: Option<String>,
    pub owner_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("device_id", &self.device_id)
            .field("status", &self.status)
            .field("user_code", &self.user_code)
            .field("user_code_expires_at", &self.user_code_expires_at)
            .field("device_token", &self.device_token.as_ref().map(|_| "<REDACTED>"))
            .field("owner_user_id", &self.owner_user_id)
            .field("created_at", &self.created_at)
            .field("activated_at", &self.activated_at)
            .finish()
    }
}

/// Pending link: one short-lived code pointing at one pending device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub user_code: String,
    pub device_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Device → strategy authorization. At most one per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub device_id: Uuid,
    pub strategy_id: Uuid,
    pub allow_latest: bool,
    pub pinned_semver: Option<String>,
}

/// One entry of a device's resolved artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    pub strategy_id: Uuid,
    pub name: String,
    pub semver: String,
    pub content_hash: String,
    pub validator: String,
    /// Server-relative download path.
    pub url: String,
}

/// Server-relative artifact path, `/v1/artifacts/{sid}/{semver}`.
pub fn artifact_url(strategy_id: Uuid, semver: &str) -> String {
    format!("/v1/artifacts/{strategy_id}/{semver}")
}
