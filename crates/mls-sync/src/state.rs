//! On-device state under one root directory.
//!
//! ```text
//! <root>/device.json                              device id, token, base url
//! <root>/cache.json                               "<sid>/<semver>" -> validator
//! <root>/strategies/<sid>/<semver>.bundle.json    verified bundle bytes
//! ```
//!
//! Every file is written to a sibling temp file and renamed into place, so a
//! crash leaves either the old or the new content.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

const DEVICE_FILE: &str = "device.json";
const CACHE_FILE: &str = "cache.json";
const STRATEGIES_DIR: &str = "strategies";

/// Credentials written by `mls link`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFile {
    pub device_id: Uuid,
    pub device_token: String,
    pub base_url: String,
}

impl std::fmt::Debug for DeviceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceFile")
            .field("device_id", &self.device_id)
            .field("device_token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub validator: String,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

/// Validator cache keyed by [`cache_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cache {
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Cache {
    pub fn get(&self, strategy_id: Uuid, semver: &str) -> Option<&CacheEntry> {
        self.entries.get(&cache_key(strategy_id, semver))
    }

    pub fn insert(&mut self, strategy_id: Uuid, semver: &str, entry: CacheEntry) {
        self.entries.insert(cache_key(strategy_id, semver), entry);
    }
}

pub fn cache_key(strategy_id: Uuid, semver: &str) -> String {
    format!("{strategy_id}/{semver}")
}

#[derive(Debug, Clone)]
pub struct LocalState {
    root: PathBuf,
}

impl LocalState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn device_path(&self) -> PathBuf {
        self.root.join(DEVICE_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    pub fn bundle_path(&self, strategy_id: Uuid, semver: &str) -> PathBuf {
        self.root
            .join(STRATEGIES_DIR)
            .join(strategy_id.to_string())
            .join(format!("{semver}.bundle.json"))
    }

    /// `None` when the device was never linked.
    pub fn load_device(&self) -> Result<Option<DeviceFile>, SyncError> {
        read_json(&self.device_path())
    }

    pub fn save_device(&self, device: &DeviceFile) -> Result<(), SyncError> {
        let path = self.device_path();
        write_json(&path, device)?;
        restrict_to_owner(&path)?;
        Ok(())
    }

    /// A missing cache file is an empty cache.
    pub fn load_cache(&self) -> Result<Cache, SyncError> {
        Ok(read_json(&self.cache_path())?.unwrap_or_default())
    }

    pub fn save_cache(&self, cache: &Cache) -> Result<(), SyncError> {
        write_json(&self.cache_path(), cache)
    }

    pub fn write_bundle(
        &self,
        strategy_id: Uuid,
        semver: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, SyncError> {
        let path = self.bundle_path(strategy_id, semver);
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    pub fn read_bundle(&self, strategy_id: Uuid, semver: &str) -> Result<Option<Vec<u8>>, SyncError> {
        match fs::read(self.bundle_path(strategy_id, semver)) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, SyncError> {
    let raw = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| SyncError::Decode(format!("{}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SyncError> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|e| SyncError::Decode(e.to_string()))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Write to `.<name>.tmp` next to `path`, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = dir.join(format!(".{}.tmp", name.to_string_lossy()));

    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    drop(f);
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<(), SyncError> {
    Ok(())
}
