//! Shared runtime state for mls-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The registry services
//! share one store handle.

use std::sync::Arc;

use mls_artifact::ArtifactSigner;
use mls_config::ServerSettings;
use mls_registry::{DeviceAuthority, GrantResolver, MemoryStore, Publisher, RegistryStore};

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    /// Identity attached to operator requests until real user auth exists.
    pub operator_user_id: String,
    pub store: Arc<dyn RegistryStore>,
    pub publisher: Arc<Publisher>,
    pub devices: Arc<DeviceAuthority>,
    pub grants: Arc<GrantResolver>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        signer: ArtifactSigner,
        settings: &ServerSettings,
    ) -> Self {
        let verification_uri = settings.verification_uri();
        Self {
            build: BuildInfo {
                service: "mls-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            operator_user_id: settings.operator_user_id.clone(),
            publisher: Arc::new(Publisher::new(store.clone(), Arc::new(signer))),
            devices: Arc::new(DeviceAuthority::new(
                store.clone(),
                settings.code_ttl,
                verification_uri,
            )),
            grants: Arc::new(GrantResolver::new(store.clone())),
            store,
        }
    }

    /// Memory-backed state with the given settings.
    pub fn in_memory(signer: ArtifactSigner, settings: &ServerSettings) -> Self {
        Self::new(Arc::new(MemoryStore::new()), signer, settings)
    }
}
