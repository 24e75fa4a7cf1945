//! Command handler modules for the `mls` CLI.
//!
//! Shared helpers live here; command logic lives in the submodules.

pub mod artifact;
pub mod device;

use anyhow::{Context, Result};
use mls_config::LoadedConfig;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load layered config from explicit paths, else `default_path` when it
/// exists, else an empty config.
pub fn load_config(paths: &[String], default_path: &str) -> Result<LoadedConfig> {
    if !paths.is_empty() {
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        return mls_config::load_layered_yaml(&refs);
    }
    if Path::new(default_path).exists() {
        return mls_config::load_layered_yaml(&[default_path]);
    }
    LoadedConfig::empty()
}

/// Read a JSON file, tolerating a UTF-8 BOM.
pub fn read_json_file(path: &str) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("read failed: {path}"))?;
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    serde_json::from_slice(bytes).with_context(|| format!("{path} must contain valid JSON"))
}

/// Write to `out` or stdout.
pub fn emit(out: Option<&str>, bytes: &[u8]) -> Result<()> {
    match out {
        Some(p) => fs::write(p, bytes).with_context(|| format!("write failed: {p}")),
        None => {
            println!("{}", String::from_utf8_lossy(bytes));
            Ok(())
        }
    }
}
