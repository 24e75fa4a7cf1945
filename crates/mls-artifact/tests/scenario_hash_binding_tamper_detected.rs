//! Hash binding: touching `manifest.hash` alone is always caught.
//!
//! GREEN when:
//! - Replacing the embedded hash with any other value yields `HashMismatch`.
//! - Flipping one byte of the stored bundle never verifies.

use mls_artifact::{verify_bundle, verify_bundle_bytes, ArtifactSigner, VerifyError};
use serde_json::json;

fn signed_bundle(signer: &ArtifactSigner) -> serde_json::Value {
    let art = signer
        .sign(&json!({
            "manifest": {"name": "carry"},
            "indicators": [{"id": "fx_rate_diff"}],
            "rules": [],
            "orders": {"notional": 1000}
        }))
        .unwrap();
    serde_json::to_value(art).unwrap()
}

#[test]
fn replaced_hash_is_hash_mismatch() {
    let signer = ArtifactSigner::generate();
    for fake in ["", "00", &"f".repeat(64)] {
        let mut bundle = signed_bundle(&signer);
        let original = bundle["payload"]["manifest"]["hash"].clone();
        bundle["payload"]["manifest"]["hash"] = json!(fake);

        match verify_bundle(&bundle, &signer.verifying_key()) {
            Err(VerifyError::HashMismatch { computed, claimed }) => {
                assert_eq!(json!(computed), original);
                assert_eq!(claimed.as_deref(), Some(fake));
            }
            other => panic!("expected HashMismatch, got {other:?}"),
        }
    }
}

#[test]
fn non_string_hash_is_hash_mismatch() {
    let signer = ArtifactSigner::generate();
    let mut bundle = signed_bundle(&signer);
    bundle["payload"]["manifest"]["hash"] = json!(42);
    assert!(matches!(
        verify_bundle(&bundle, &signer.verifying_key()),
        Err(VerifyError::HashMismatch { claimed: None, .. })
    ));
}

#[test]
fn single_byte_flip_never_verifies() {
    let signer = ArtifactSigner::generate();
    let bytes = serde_json::to_vec(&signed_bundle(&signer)).unwrap();

    for i in (0..bytes.len()).step_by(7) {
        let mut tampered = bytes.clone();
        tampered[i] ^= 0x01;
        assert!(
            verify_bundle_bytes(&tampered, &signer.verifying_key()).is_err(),
            "flip at byte {i} verified"
        );
    }
}
