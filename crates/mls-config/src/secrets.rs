//! Runtime key resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** under `/keys_env/*`.
//! - Callers invoke [`resolve_keys_for_mode`] once at startup and pass the
//!   result into constructors.
//! - `Debug` redacts the signing seed.
//! - Error messages reference the env var **NAME**, never the value.
//!
//! # Mode-aware enforcement
//! - `Server`: signing key (base64 32-byte seed) is **required**.
//! - `Client`: verification public key (base64) is **required**.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::ConfigMode;

pub const DEFAULT_SIGNING_KEY_ENV: &str = "MLS_ED25519_PRIVKEY_B64";
pub const DEFAULT_PUBLIC_KEY_ENV: &str = "MLS_ED25519_PUBKEY_B64";

/// Key material resolved from the environment. Still base64; decoding into
/// dalek keys happens in `mls-artifact`.
#[derive(Clone)]
pub struct ResolvedKeys {
    pub signing_key_b64: Option<String>,
    pub public_key_b64: Option<String>,
    /// Env var names, kept for error messages downstream.
    pub signing_key_var: String,
    pub public_key_var: String,
}

impl std::fmt::Debug for ResolvedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKeys")
            .field(
                "signing_key_b64",
                &self.signing_key_b64.as_ref().map(|_| "<REDACTED>"),
            )
            .field("public_key_b64", &self.public_key_b64)
            .field("signing_key_var", &self.signing_key_var)
            .field("public_key_var", &self.public_key_var)
            .finish()
    }
}

impl ResolvedKeys {
    /// Decode the signing seed. Errors name the env var only.
    pub fn signer(&self) -> Result<mls_artifact::ArtifactSigner> {
        let Some(b64) = self.signing_key_b64.as_deref() else {
            bail!(mls_artifact::SigningKeyError::Missing {
                env_var: self.signing_key_var.clone(),
            });
        };
        mls_artifact::ArtifactSigner::from_seed_b64(b64).map_err(|e| {
            anyhow::anyhow!("SIGNING_KEY_INVALID env var '{}': {e}", self.signing_key_var)
        })
    }

    pub fn verifying_key(&self) -> Result<mls_artifact::VerifyingKey> {
        let Some(b64) = self.public_key_b64.as_deref() else {
            bail!(
                "PUBLIC_KEY_MISSING: env var '{}' is not set or empty",
                self.public_key_var
            );
        };
        mls_artifact::parse_public_key_b64(b64).map_err(|e| {
            anyhow::anyhow!("PUBLIC_KEY_INVALID env var '{}': {e}", self.public_key_var)
        })
    }
}

/// Read a non-empty string value at `pointer` from a JSON config.
pub(crate) fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Unset and blank both count as missing.
pub(crate) fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Resolve key material for `mode`, failing on the first missing required
/// variable.
pub fn resolve_keys_for_mode(config_json: &Value, mode: ConfigMode) -> Result<ResolvedKeys> {
    let signing_key_var = read_str_at(config_json, "/keys_env/signing_key")
        .unwrap_or_else(|| DEFAULT_SIGNING_KEY_ENV.to_string());
    let public_key_var = read_str_at(config_json, "/keys_env/public_key")
        .unwrap_or_else(|| DEFAULT_PUBLIC_KEY_ENV.to_string());

    let signing_key_b64 = match mode {
        ConfigMode::Server => resolve_env(&signing_key_var),
        ConfigMode::Client => None,
    };
    let public_key_b64 = match mode {
        ConfigMode::Server => None,
        ConfigMode::Client => resolve_env(&public_key_var),
    };

    match mode {
        ConfigMode::Server if signing_key_b64.is_none() => bail!(
            "SECRETS_MISSING mode=SERVER: required env var '{}' \
             (ed25519 signing key) is not set or empty",
            signing_key_var,
        ),
        ConfigMode::Client if public_key_b64.is_none() => bail!(
            "SECRETS_MISSING mode=CLIENT: required env var '{}' \
             (ed25519 public key) is not set or empty",
            public_key_var,
        ),
        _ => {}
    }

    Ok(ResolvedKeys {
        signing_key_b64,
        public_key_b64,
        signing_key_var,
        public_key_var,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_seed() {
        let keys = ResolvedKeys {
            signing_key_b64: Some("c2VjcmV0LXNlZWQ=".to_string()),
            public_key_b64: None,
            signing_key_var: DEFAULT_SIGNING_KEY_ENV.to_string(),
            public_key_var: DEFAULT_PUBLIC_KEY_ENV.to_string(),
        };
        let dbg = format!("{keys:?}");
        assert!(dbg.contains("<REDACTED>"));
        assert!(!dbg.contains("c2VjcmV0LXNlZWQ="));
    }

    #[test]
    fn missing_signing_key_names_the_var() {
        let keys = ResolvedKeys {
            signing_key_b64: None,
            public_key_b64: None,
            signing_key_var: "MLS_TEST_UNSET_SIGNING_KEY".to_string(),
            public_key_var: DEFAULT_PUBLIC_KEY_ENV.to_string(),
        };
        let msg = keys.signer().unwrap_err().to_string();
        assert!(msg.contains("MLS_TEST_UNSET_SIGNING_KEY"), "{msg}");
    }

    #[test]
    fn seed_decodes_into_signer() {
        let fresh = mls_artifact::ArtifactSigner::generate();
        let keys = ResolvedKeys {
            signing_key_b64: Some(fresh.seed_b64()),
            public_key_b64: Some(fresh.public_key_b64()),
            signing_key_var: DEFAULT_SIGNING_KEY_ENV.to_string(),
            public_key_var: DEFAULT_PUBLIC_KEY_ENV.to_string(),
        };
        assert_eq!(keys.signer().unwrap().public_key_b64(), fresh.public_key_b64());
        assert_eq!(keys.verifying_key().unwrap(), fresh.verifying_key());
    }
}
