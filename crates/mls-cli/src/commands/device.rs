//! Device commands: link and sync.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mls_config::{
    report_unused_keys, secrets::resolve_keys_for_mode, ClientSettings, ConfigMode,
    UnusedKeyPolicy,
};
use mls_sync::{
    link_device, DeviceFile, HttpClient, LinkOptions, LocalState, RetryPolicy, Syncer,
};
use tracing::warn;

use super::load_config;

const CLIENT_CONFIG: &str = "config/client.yaml";

fn client_settings(config: &[String]) -> Result<(ClientSettings, serde_json::Value)> {
    let loaded = load_config(config, CLIENT_CONFIG)?;
    let report = report_unused_keys(ConfigMode::Client, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "config keys not read by mls");
    }
    let settings = ClientSettings::from_config_json(&loaded.config_json)?;
    Ok((settings, loaded.config_json))
}

pub async fn link(config: &[String]) -> Result<()> {
    let (settings, _) = client_settings(config)?;
    let state = LocalState::new(&settings.state_dir);
    let client = HttpClient::new(settings.base_url.clone());

    let opts = LinkOptions {
        timeout: settings.link_timeout,
        poll_interval: settings.poll_interval,
    };
    let linked = link_device(&client, opts, |reg| {
        println!("device_id={}", reg.device_id);
        println!("user_code={}", reg.user_code);
        println!("verification_uri={}", reg.verification_uri);
        println!("Waiting for activation...");
    })
    .await?;

    state.save_device(&DeviceFile {
        device_id: linked.device_id,
        device_token: linked.device_token,
        base_url: settings.base_url,
    })?;
    println!("linked=true device_file={}", state.device_path().display());
    Ok(())
}

pub async fn sync(config: &[String]) -> Result<()> {
    let (settings, config_json) = client_settings(config)?;
    let state = LocalState::new(&settings.state_dir);
    let Some(device) = state.load_device()? else {
        bail!(
            "device is not linked (no {}): run `mls link` first",
            state.device_path().display()
        );
    };
    let public_key = resolve_keys_for_mode(&config_json, ConfigMode::Client)?.verifying_key()?;

    // The daemon the device was linked against wins over the current config.
    let base_url = if device.base_url.is_empty() {
        settings.base_url.clone()
    } else {
        device.base_url.clone()
    };
    let syncer = Syncer::new(
        Arc::new(HttpClient::new(base_url)),
        state,
        public_key,
        RetryPolicy {
            attempts: settings.fetch_attempts,
            backoff: settings.retry_backoff,
        },
    );

    let report = syncer.sync_once(&device).await?;
    for item in &report.items {
        println!(
            "{}",
            serde_json::to_string(item).context("report encode failed")?
        );
    }
    println!(
        "updated={} unchanged={} rejected={} failed={}",
        report.updated(),
        report.unchanged(),
        report.rejected(),
        report.failed()
    );
    if !report.is_clean() {
        bail!("SYNC_INCOMPLETE: some artifacts were rejected or not fetched");
    }
    Ok(())
}
