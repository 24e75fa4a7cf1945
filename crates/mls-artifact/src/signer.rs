//! Publisher-side signing.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde_json::Value;

use crate::{
    bundle::{project_sections, Artifact, ArtifactError, SignatureBlock},
    canonical::canonical_bytes,
    sha256_hex, HASH_FIELD, MANIFEST_FIELD, SIGNATURE_ALG, SIGNATURE_ALG_FIELD,
};

/// Key material problems. These are configuration failures, never payload
/// failures, and callers should treat them as fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningKeyError {
    #[error("signing key missing: env var '{env_var}' is not set or empty")]
    Missing { env_var: String },
    #[error("key is not valid base64")]
    InvalidBase64,
    #[error("key must decode to {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("public key is not a valid ed25519 point")]
    InvalidPublicKey,
}

/// Ed25519 artifact signer.
///
/// Holds the 32-byte secret seed. `Debug` never prints it.
#[derive(Clone)]
pub struct ArtifactSigner {
    key: SigningKey,
}

impl std::fmt::Debug for ArtifactSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSigner")
            .field("public_key_b64", &self.public_key_b64())
            .field("seed", &"<REDACTED>")
            .finish()
    }
}

impl ArtifactSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Decode a base64 32-byte seed (the format stored in `*_PRIVKEY_B64`).
    pub fn from_seed_b64(b64: &str) -> Result<Self, SigningKeyError> {
        let seed = decode_32(b64)?;
        Ok(Self::from_seed(&seed))
    }

    /// Fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn public_key_b64(&self) -> String {
        STANDARD.encode(self.key.verifying_key().as_bytes())
    }

    /// Secret seed as base64. Only the CLI `keygen` command should call this.
    pub fn seed_b64(&self) -> String {
        STANDARD.encode(self.key.to_bytes())
    }

    /// Sign a payload into an [`Artifact`].
    ///
    /// The payload is reduced to its known sections, `manifest.signature_alg`
    /// is stamped, then hash and signature are both derived from the same
    /// canonical bytes (hash field excluded). The returned payload carries
    /// the hash in `manifest.hash`.
    pub fn sign(&self, payload: &Value) -> Result<Artifact, ArtifactError> {
        let mut payload = project_sections(payload)?;
        let manifest = manifest_mut(&mut payload)?;
        manifest.insert(
            SIGNATURE_ALG_FIELD.to_string(),
            Value::String(SIGNATURE_ALG.to_string()),
        );

        let raw = canonical_bytes(&payload)?;
        let content_hash = sha256_hex(&raw);
        let signature = self.key.sign(&raw);

        manifest_mut(&mut payload)?.insert(HASH_FIELD.to_string(), Value::String(content_hash));

        Ok(Artifact {
            payload,
            signature: SignatureBlock {
                alg: SIGNATURE_ALG.to_string(),
                sig_b64: STANDARD.encode(signature.to_bytes()),
            },
        })
    }
}

fn manifest_mut(payload: &mut Value) -> Result<&mut serde_json::Map<String, Value>, ArtifactError> {
    payload
        .get_mut(MANIFEST_FIELD)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| ArtifactError::MalformedPayload {
            reason: "manifest must be a JSON object".to_string(),
        })
}

/// Decode a base64 ed25519 public key.
pub fn parse_public_key_b64(b64: &str) -> Result<VerifyingKey, SigningKeyError> {
    let bytes = decode_32(b64)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| SigningKeyError::InvalidPublicKey)
}

fn decode_32(b64: &str) -> Result<[u8; 32], SigningKeyError> {
    let raw = STANDARD
        .decode(b64.trim())
        .map_err(|_| SigningKeyError::InvalidBase64)?;
    let got = raw.len();
    raw.try_into()
        .map_err(|_| SigningKeyError::InvalidLength { expected: 32, got })
}
