//! Strategy authoring and publishing.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use mls_artifact::{check_sections, Artifact, ArtifactSigner};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::semver::is_valid_semver;
use crate::store::RegistryStore;
use crate::types::{artifact_url, Strategy, VersionRecord};

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedVersion {
    pub strategy_id: Uuid,
    pub semver: String,
    pub content_hash: String,
    pub validator: String,
    pub sig_b64: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

pub struct Publisher {
    store: Arc<dyn RegistryStore>,
    signer: Arc<ArtifactSigner>,
}

impl Publisher {
    pub fn new(store: Arc<dyn RegistryStore>, signer: Arc<ArtifactSigner>) -> Self {
        Self { store, signer }
    }

    pub async fn create_strategy(&self, owner: &str, name: &str) -> Result<Strategy, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::MalformedPayload("name is required".to_string()));
        }
        let now = now_micros();
        let strategy = Strategy {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            name: name.to_string(),
            draft: None,
            versions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_strategy(&strategy).await?;
        info!(strategy_id = %strategy.id, owner, "strategy created");
        Ok(strategy)
    }

    pub async fn list_strategies(&self, owner: &str) -> Result<Vec<Strategy>, RegistryError> {
        Ok(self.store.list_strategies(owner).await?)
    }

    /// Owner-checked read.
    pub async fn get_strategy(&self, owner: &str, id: Uuid) -> Result<Strategy, RegistryError> {
        let strategy = self
            .store
            .get_strategy(id)
            .await?
            .ok_or(RegistryError::StrategyNotFound(id))?;
        if strategy.owner != owner {
            return Err(RegistryError::Forbidden);
        }
        Ok(strategy)
    }

    /// Replace the draft. The draft must already carry every required section.
    pub async fn update_draft(
        &self,
        owner: &str,
        id: Uuid,
        draft: Value,
    ) -> Result<Strategy, RegistryError> {
        check_sections(&draft)?;
        self.get_strategy(owner, id).await?;
        if !self.store.update_draft(id, &draft, now_micros()).await? {
            return Err(RegistryError::StrategyNotFound(id));
        }
        self.get_strategy(owner, id).await
    }

    /// Sign the current draft and append it as `semver`.
    ///
    /// Fails with `DuplicateVersion` if `semver` exists; the stored bytes of
    /// the existing version are left as they were.
    pub async fn publish(
        &self,
        owner: &str,
        id: Uuid,
        semver: &str,
    ) -> Result<PublishedVersion, RegistryError> {
        if !is_valid_semver(semver) {
            return Err(RegistryError::InvalidSemver(semver.to_string()));
        }
        let strategy = self.get_strategy(owner, id).await?;
        let draft = match &strategy.draft {
            Some(d) if !is_empty_draft(d) => d,
            _ => return Err(RegistryError::DraftEmpty),
        };
        if strategy.version(semver).is_some() {
            return Err(RegistryError::DuplicateVersion {
                strategy_id: id,
                semver: semver.to_string(),
            });
        }

        let artifact = self.signer.sign(draft)?;
        let (bytes, validator) = artifact
            .to_bytes_with_validator()
            .map_err(|e| RegistryError::Signing(e.to_string()))?;
        let content_hash = artifact
            .content_hash()
            .ok_or_else(|| RegistryError::Signing("signer did not embed a hash".to_string()))?
            .to_string();

        let record = VersionRecord {
            semver: semver.to_string(),
            content_hash,
            validator,
            created_at: now_micros(),
        };
        let stored = self.store.append_version(id, record, bytes).await?;

        info!(
            strategy_id = %id,
            semver,
            content_hash = %stored.content_hash,
            validator = %stored.validator,
            "version published"
        );

        Ok(PublishedVersion {
            strategy_id: id,
            url: artifact_url(id, semver),
            semver: stored.semver,
            content_hash: stored.content_hash,
            validator: stored.validator,
            sig_b64: artifact.signature.sig_b64,
            created_at: stored.created_at,
        })
    }

    /// Sign a payload without storing anything.
    pub fn compile(&self, payload: &Value) -> Result<Artifact, RegistryError> {
        Ok(self.signer.sign(payload)?)
    }

    pub fn public_key_b64(&self) -> String {
        self.signer.public_key_b64()
    }
}

fn is_empty_draft(draft: &Value) -> bool {
    match draft {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Postgres keeps microseconds; truncate so both stores agree.
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
