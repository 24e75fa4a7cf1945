//! Consumer-side verification.
//!
//! # Validation steps
//! 1. Bundle has `payload` and a `signature` block with string `alg`/`sig_b64`.
//! 2. `signature.alg` is `ed25519`.
//! 3. `raw = canonical_bytes(payload)` (manifest hash excluded).
//! 4. `sha256_hex(raw)` equals `payload.manifest.hash`.
//! 5. Strict Ed25519 verification of the signature over `raw`.
//!
//! Any failure rejects the whole artifact.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, VerifyingKey};
use serde_json::Value;

use crate::{
    bundle::{Artifact, SignatureBlock},
    canonical::canonical_bytes,
    sha256_hex, HASH_FIELD, MANIFEST_FIELD, SIGNATURE_ALG,
};

/// Why an artifact was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Structure is wrong: not JSON, missing payload/signature, bad encoding.
    #[error("malformed bundle: {0}")]
    MalformedBundle(String),
    #[error("unsupported signature alg: {0:?}")]
    UnsupportedAlgorithm(String),
    /// Embedded hash does not match the recomputed one (tamper or corruption).
    #[error("hash mismatch: computed={computed}, manifest={claimed:?}")]
    HashMismatch {
        computed: String,
        claimed: Option<String>,
    },
    #[error("signature does not verify under the configured public key")]
    SignatureMismatch,
}

/// Proof that a bundle passed both the hash and the signature check.
///
/// Only [`verify_bundle`] (and the helpers that call it) can build one.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedArtifact {
    artifact: Artifact,
    content_hash: String,
}

impl VerifiedArtifact {
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn into_artifact(self) -> Artifact {
        self.artifact
    }
}

/// Decode raw bundle bytes and verify them.
pub fn verify_bundle_bytes(
    bytes: &[u8],
    public_key: &VerifyingKey,
) -> Result<VerifiedArtifact, VerifyError> {
    let bundle: Value = serde_json::from_slice(bytes)
        .map_err(|e| VerifyError::MalformedBundle(format!("not valid JSON: {e}")))?;
    verify_bundle(&bundle, public_key)
}

/// Verify a decoded bundle value.
pub fn verify_bundle(
    bundle: &Value,
    public_key: &VerifyingKey,
) -> Result<VerifiedArtifact, VerifyError> {
    // 1. structure
    let payload = bundle
        .get("payload")
        .ok_or_else(|| VerifyError::MalformedBundle("missing payload".to_string()))?;
    let signature_v = bundle
        .get("signature")
        .ok_or_else(|| VerifyError::MalformedBundle("missing signature".to_string()))?;
    let signature: SignatureBlock = serde_json::from_value(signature_v.clone())
        .map_err(|e| VerifyError::MalformedBundle(format!("signature block: {e}")))?;

    // 2. algorithm
    if signature.alg != SIGNATURE_ALG {
        return Err(VerifyError::UnsupportedAlgorithm(signature.alg));
    }

    // 3. canonical bytes, hash field excluded
    let raw = canonical_bytes(payload)
        .map_err(|e| VerifyError::MalformedBundle(format!("canonical encoding: {e}")))?;

    // 4. hash binding
    let computed = sha256_hex(&raw);
    let claimed = payload
        .get(MANIFEST_FIELD)
        .and_then(|m| m.get(HASH_FIELD))
        .and_then(Value::as_str);
    if claimed != Some(computed.as_str()) {
        return Err(VerifyError::HashMismatch {
            computed,
            claimed: claimed.map(str::to_string),
        });
    }

    // 5. signature over the same bytes
    let sig_bytes = STANDARD
        .decode(signature.sig_b64.trim())
        .map_err(|_| VerifyError::MalformedBundle("sig_b64 is not base64".to_string()))?;
    let sig = Signature::from_slice(&sig_bytes).map_err(|_| {
        VerifyError::MalformedBundle(format!(
            "signature must be 64 bytes, got {}",
            sig_bytes.len()
        ))
    })?;
    public_key
        .verify_strict(&raw, &sig)
        .map_err(|_| VerifyError::SignatureMismatch)?;

    Ok(VerifiedArtifact {
        artifact: Artifact {
            payload: payload.clone(),
            signature,
        },
        content_hash: computed,
    })
}

impl Artifact {
    /// Verify this artifact in memory.
    pub fn verify(&self, public_key: &VerifyingKey) -> Result<VerifiedArtifact, VerifyError> {
        let bundle = serde_json::to_value(self)
            .map_err(|e| VerifyError::MalformedBundle(e.to_string()))?;
        verify_bundle(&bundle, public_key)
    }
}
