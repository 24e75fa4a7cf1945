//! Request and response types for the mls-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests and the sync client. No business logic
//! lives here.

use mls_registry::{DeviceStrategyEntry, Grant};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// Base64 Ed25519 key consumers should verify artifacts with.
    pub public_key_b64: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine code, e.g. "DUPLICATE_VERSION".
    pub error: String,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// /v1/strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStrategyRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub semver: String,
}

// ---------------------------------------------------------------------------
// /v1/devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub user_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub device_id: Uuid,
    pub device_token: String,
    /// Always "active".
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub device_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    pub strategy_id: Uuid,
    pub allow_latest: bool,
    #[serde(default)]
    pub pinned_semver: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantResponse {
    pub ok: bool,
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub device_id: Uuid,
    pub status: String,
}

/// GET /v1/devices/{id}/strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStrategiesResponse {
    pub device_id: Uuid,
    pub items: Vec<DeviceStrategyEntry>,
}
