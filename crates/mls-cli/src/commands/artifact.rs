//! Offline artifact commands: keygen, compile, verify.

use anyhow::{Context, Result};
use mls_artifact::{parse_public_key_b64, verify_bundle_bytes, ArtifactSigner};
use mls_config::{
    secrets::{resolve_keys_for_mode, DEFAULT_PUBLIC_KEY_ENV, DEFAULT_SIGNING_KEY_ENV},
    ConfigMode,
};

use super::{emit, load_config, read_json_file};

const SERVER_CONFIG: &str = "config/server.yaml";
const CLIENT_CONFIG: &str = "config/client.yaml";

/// Print a fresh key pair as env assignments.
pub fn keygen() {
    let signer = ArtifactSigner::generate();
    println!("{DEFAULT_SIGNING_KEY_ENV}={}", signer.seed_b64());
    println!("{DEFAULT_PUBLIC_KEY_ENV}={}", signer.public_key_b64());
}

/// Sign a payload file with the configured signing key.
pub fn compile(payload_file: &str, out: Option<&str>, config: &[String]) -> Result<()> {
    let loaded = load_config(config, SERVER_CONFIG)?;
    let signer = resolve_keys_for_mode(&loaded.config_json, ConfigMode::Server)?.signer()?;

    let payload = read_json_file(payload_file)?;
    let artifact = signer.sign(&payload).context("compile failed")?;
    let (bytes, validator) = artifact
        .to_bytes_with_validator()
        .context("bundle encode failed")?;

    emit(out, &bytes)?;
    if out.is_some() {
        println!("content_hash={}", artifact.content_hash().unwrap_or_default());
        println!("validator={validator}");
    }
    Ok(())
}

/// Verify a bundle file. A failure is an error, so the exit code is non-zero.
pub fn verify(bundle_file: &str, public_key: Option<&str>, config: &[String]) -> Result<()> {
    let key = match public_key {
        Some(b64) => parse_public_key_b64(b64).context("--public-key")?,
        None => {
            let loaded = load_config(config, CLIENT_CONFIG)?;
            resolve_keys_for_mode(&loaded.config_json, ConfigMode::Client)?.verifying_key()?
        }
    };

    let bytes = std::fs::read(bundle_file).with_context(|| format!("read failed: {bundle_file}"))?;
    let verified = verify_bundle_bytes(&bytes, &key)
        .with_context(|| format!("VERIFY_FAILED {bundle_file}"))?;
    println!("verified=true");
    println!("content_hash={}", verified.content_hash());
    Ok(())
}
