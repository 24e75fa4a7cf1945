//! Artifact bundle shape and payload section rules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{canonical::canonical_json_bytes, validator::weak_validator, HASH_FIELD, MANIFEST_FIELD};

/// Sections every publishable payload must carry.
pub const REQUIRED_SECTIONS: [&str; 4] = ["manifest", "indicators", "rules", "orders"];

/// Sections carried over when present and not null.
pub const OPTIONAL_SECTIONS: [&str; 1] = ["policy"];

/// Errors raised while turning a payload into a signed artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Required sections missing, or the payload/manifest is not a JSON object.
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },
    /// Canonical serialization failed.
    #[error("canonical encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ArtifactError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }
}

/// Signature block of a bundle.
///
/// The wire name `sig_b64` is what deployed engines read; the longer
/// `signature_bytes_b64` spelling is accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub alg: String,
    #[serde(alias = "signature_bytes_b64")]
    pub sig_b64: String,
}

/// A signed strategy artifact: payload (with embedded hash) plus signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub payload: Value,
    pub signature: SignatureBlock,
}

impl Artifact {
    /// The `manifest.hash` embedded by the signer, if any.
    pub fn content_hash(&self) -> Option<&str> {
        self.payload
            .get(MANIFEST_FIELD)
            .and_then(|m| m.get(HASH_FIELD))
            .and_then(Value::as_str)
    }

    /// Stored form: canonical JSON of the whole bundle.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        canonical_json_bytes(self)
    }

    /// Stored bytes together with their weak validator.
    pub fn to_bytes_with_validator(&self) -> Result<(Vec<u8>, String), serde_json::Error> {
        let bytes = self.to_bytes()?;
        let validator = weak_validator(&bytes);
        Ok((bytes, validator))
    }
}

/// Check that `payload` is an object carrying every required section and an
/// object-valued manifest.
pub fn check_sections(payload: &Value) -> Result<(), ArtifactError> {
    let Some(root) = payload.as_object() else {
        return Err(ArtifactError::malformed("payload must be a JSON object"));
    };

    let missing: Vec<&str> = REQUIRED_SECTIONS
        .iter()
        .copied()
        .filter(|k| !root.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(ArtifactError::malformed(format!(
            "missing top-level sections: {}",
            missing.join(", ")
        )));
    }

    if !root[MANIFEST_FIELD].is_object() {
        return Err(ArtifactError::malformed("manifest must be a JSON object"));
    }
    Ok(())
}

/// Copy of `payload` reduced to the known sections (`policy` only when non-null).
pub fn project_sections(payload: &Value) -> Result<Value, ArtifactError> {
    check_sections(payload)?;
    let root = payload
        .as_object()
        .ok_or_else(|| ArtifactError::malformed("payload must be a JSON object"))?;

    let mut out = Map::new();
    for key in REQUIRED_SECTIONS {
        out.insert(key.to_string(), root[key].clone());
    }
    for key in OPTIONAL_SECTIONS {
        match root.get(key) {
            Some(Value::Null) | None => {}
            Some(v) => {
                out.insert(key.to_string(), v.clone());
            }
        }
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_sections_are_listed_in_order() {
        let err = check_sections(&json!({"manifest": {}, "indicators": []})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed payload: missing top-level sections: rules, orders"
        );
    }

    #[test]
    fn non_object_manifest_is_rejected() {
        let p = json!({"manifest": [], "indicators": [], "rules": [], "orders": {}});
        assert!(matches!(
            check_sections(&p),
            Err(ArtifactError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn projection_drops_unknown_sections_and_null_policy() {
        let p = json!({
            "manifest": {"name": "x"},
            "indicators": [],
            "rules": [],
            "orders": {},
            "policy": null,
            "notes": "draft only"
        });
        let out = project_sections(&p).unwrap();
        let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
        assert!(out.get("notes").is_none());
        assert!(out.get("policy").is_none());
    }

    #[test]
    fn signature_block_accepts_long_field_name() {
        let s: SignatureBlock =
            serde_json::from_value(json!({"alg": "ed25519", "signature_bytes_b64": "AA=="}))
                .unwrap();
        assert_eq!(s.sig_b64, "AA==");
    }
}
