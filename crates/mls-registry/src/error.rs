use uuid::Uuid;

use crate::store::StoreError;

/// Every failure a registry operation can surface.
///
/// Integrity and authorization failures are separate variants so callers
/// never have to parse messages to decide what happened.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("version {semver} already exists for strategy {strategy_id}")]
    DuplicateVersion { strategy_id: Uuid, semver: String },
    #[error("invalid semver: {0:?}")]
    InvalidSemver(String),
    #[error("version {semver} does not exist for strategy {strategy_id}")]
    UnknownVersion { strategy_id: Uuid, semver: String },
    #[error("strategy not found: {0}")]
    StrategyNotFound(Uuid),
    #[error("device not found: {0}")]
    DeviceNotFound(Uuid),
    #[error("draft is empty")]
    DraftEmpty,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid or expired code")]
    CodeInvalidOrExpired,
    #[error("unauthorized device")]
    UnauthorizedDevice,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("store: {0}")]
    Store(StoreError),
}

impl RegistryError {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            RegistryError::DuplicateVersion { .. } => "DUPLICATE_VERSION",
            RegistryError::InvalidSemver(_) => "INVALID_SEMVER",
            RegistryError::UnknownVersion { .. } => "UNKNOWN_VERSION",
            RegistryError::StrategyNotFound(_) => "STRATEGY_NOT_FOUND",
            RegistryError::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            RegistryError::DraftEmpty => "DRAFT_EMPTY",
            RegistryError::Forbidden => "FORBIDDEN",
            RegistryError::CodeInvalidOrExpired => "CODE_INVALID_OR_EXPIRED",
            RegistryError::UnauthorizedDevice => "UNAUTHORIZED_DEVICE",
            RegistryError::Signing(_) => "SIGNING_FAILED",
            RegistryError::Store(_) => "STORE_ERROR",
        }
    }
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateVersion {
                strategy_id,
                semver,
            } => RegistryError::DuplicateVersion {
                strategy_id,
                semver,
            },
            StoreError::UnknownStrategy(id) => RegistryError::StrategyNotFound(id),
            other => RegistryError::Store(other),
        }
    }
}

impl From<mls_artifact::ArtifactError> for RegistryError {
    fn from(e: mls_artifact::ArtifactError) -> Self {
        match e {
            mls_artifact::ArtifactError::MalformedPayload { reason } => {
                RegistryError::MalformedPayload(reason)
            }
            other => RegistryError::Signing(other.to_string()),
        }
    }
}
