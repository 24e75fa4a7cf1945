//! mls-artifact
//!
//! Integrity core for strategy artifacts: canonical bytes, content hash,
//! Ed25519 signing and verification, and the weak validators used for
//! conditional fetch.
//!
//! # Contract
//! The publisher and every consumer must derive the same bytes from the same
//! payload. All three steps below run over ONE canonical snapshot:
//!
//! 1. `raw = canonical_bytes(payload)`  (sorted keys, compact, `manifest.hash` omitted)
//! 2. `content_hash = sha256_hex(raw)`  (embedded as `manifest.hash`)
//! 3. `signature = ed25519(raw)`        (pre-hash-embedding bytes)
//!
//! The verifier strips nothing from the caller's value; it re-derives `raw`
//! with [`canonical_bytes`], which never looks at `manifest.hash`.

pub mod bundle;
pub mod canonical;
pub mod signer;
pub mod validator;
pub mod verify;

use sha2::{Digest, Sha256};

pub use ed25519_dalek::VerifyingKey;

pub use bundle::{
    check_sections, project_sections, Artifact, ArtifactError, SignatureBlock, OPTIONAL_SECTIONS,
    REQUIRED_SECTIONS,
};
pub use canonical::{canonical_bytes, canonical_json_bytes, canonical_value};
pub use signer::{parse_public_key_b64, ArtifactSigner, SigningKeyError};
pub use validator::{if_none_match_satisfied, weak_validator};
pub use verify::{verify_bundle, verify_bundle_bytes, VerifiedArtifact, VerifyError};

/// The only signature algorithm produced or accepted.
pub const SIGNATURE_ALG: &str = "ed25519";

/// Top-level payload section holding the manifest.
pub const MANIFEST_FIELD: &str = "manifest";

/// Manifest field carrying the embedded content hash.
pub const HASH_FIELD: &str = "hash";

/// Manifest field declaring the signature algorithm.
pub const SIGNATURE_ALG_FIELD: &str = "signature_alg";

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
