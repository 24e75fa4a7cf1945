//! mls-testkit
//!
//! Fixtures and an in-process daemon for end-to-end scenarios. Nothing here
//! binds a socket: [`RouterClient`] implements the sync client's transport
//! traits over the daemon router.

mod router_client;

pub use router_client::RouterClient;

use std::sync::Arc;

use anyhow::Result;
use mls_artifact::{ArtifactSigner, VerifyingKey};
use mls_config::ServerSettings;
use mls_daemon::{routes, state::AppState};
use mls_registry::{Activation, Strategy};
use serde_json::{json, Value};
use uuid::Uuid;

/// Fixed seed so bundles are reproducible across runs.
pub const TEST_SEED: [u8; 32] = [42u8; 32];

pub fn test_signer() -> ArtifactSigner {
    ArtifactSigner::from_seed(&TEST_SEED)
}

/// A complete payload with every required section.
pub fn sample_payload(name: &str) -> Value {
    json!({
        "manifest": {"name": name, "author": "testkit"},
        "indicators": [
            {"id": "ema_fast", "kind": "ema", "period": 12},
            {"id": "ema_slow", "kind": "ema", "period": 26}
        ],
        "rules": [
            {"when": "ema_fast crosses_above ema_slow", "then": "enter_long"},
            {"when": "ema_fast crosses_below ema_slow", "then": "exit"}
        ],
        "orders": {"type": "market", "size_pct": 10},
        "policy": {"max_positions": 1}
    })
}

/// Memory-backed daemon state plus operator shortcuts.
pub struct Harness {
    pub state: Arc<AppState>,
    pub router: axum::Router,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let state = Arc::new(AppState::in_memory(test_signer(), &ServerSettings::default()));
        let router = routes::build_router(Arc::clone(&state));
        Self { state, router }
    }

    pub fn client(&self) -> Arc<RouterClient> {
        Arc::new(RouterClient::new(self.router.clone()))
    }

    pub fn public_key(&self) -> VerifyingKey {
        test_signer().verifying_key()
    }

    fn operator(&self) -> &str {
        &self.state.operator_user_id
    }

    /// Create a strategy with [`sample_payload`] as draft and publish each
    /// semver in order.
    pub async fn publish_strategy(&self, name: &str, semvers: &[&str]) -> Result<Uuid> {
        let s = self
            .state
            .publisher
            .create_strategy(self.operator(), name)
            .await?;
        self.state
            .publisher
            .update_draft(self.operator(), s.id, sample_payload(name))
            .await?;
        for semver in semvers {
            self.state
                .publisher
                .publish(self.operator(), s.id, semver)
                .await?;
        }
        Ok(s.id)
    }

    /// Publish one more version of an existing strategy.
    pub async fn publish_version(&self, strategy_id: Uuid, semver: &str) -> Result<()> {
        self.state
            .publisher
            .publish(self.operator(), strategy_id, semver)
            .await?;
        Ok(())
    }

    pub async fn strategy(&self, strategy_id: Uuid) -> Result<Strategy> {
        Ok(self
            .state
            .publisher
            .get_strategy(self.operator(), strategy_id)
            .await?)
    }

    pub async fn redeem(&self, user_code: &str) -> Result<Activation> {
        Ok(self.state.devices.redeem(user_code, self.operator()).await?)
    }

    /// Register and immediately redeem. Returns the activation.
    pub async fn linked_device(&self) -> Result<Activation> {
        let reg = self.state.devices.register().await?;
        self.redeem(&reg.user_code).await
    }

    pub async fn grant(
        &self,
        device_id: Uuid,
        strategy_id: Uuid,
        allow_latest: bool,
        pinned: Option<&str>,
    ) -> Result<()> {
        self.state
            .grants
            .grant(
                self.operator(),
                device_id,
                strategy_id,
                allow_latest,
                pinned.map(str::to_string),
            )
            .await?;
        Ok(())
    }

    pub async fn revoke(&self, device_id: Uuid) -> Result<()> {
        Ok(self.state.devices.revoke(device_id).await?)
    }
}
