//! Typed settings read from the merged config tree.
//!
//! Every pointer read here is listed in
//! [`consumed_pointers_for_mode`](crate::consumed_pointers_for_mode).
//! A few env vars override the YAML value so a deployment can move the bind
//! address or state directory without editing files.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::secrets::{read_str_at, resolve_env};

pub const ENV_DAEMON_ADDR: &str = "MLS_DAEMON_ADDR";
pub const ENV_BASE_URL: &str = "MLS_BASE_URL";
pub const ENV_STATE_DIR: &str = "MLS_STATE_DIR";
pub const DEFAULT_DATABASE_URL_ENV: &str = "MLS_DATABASE_URL";

/// Daemon route that redeems link codes.
pub const ACTIVATE_PATH: &str = "/v1/devices/activate";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_OPERATOR_USER: &str = "u_demo";
const DEFAULT_CODE_TTL_SECS: u64 = 600;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_STATE_DIR_NAME: &str = ".melissa";
const DEFAULT_LINK_TIMEOUT_SECS: u64 = 180;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind_addr: String,
    /// Base for the `verification_uri` handed to devices and the artifact
    /// URLs in resolved lists. `None` means "derive from bind_addr".
    pub public_base_url: Option<String>,
    /// Where an operator redeems link codes. `None` means the daemon's own
    /// activate endpoint under `public_base_url`.
    pub verification_uri: Option<String>,
    /// Identity attached to operator requests (publish, grant, redeem).
    pub operator_user_id: String,
    pub code_ttl: Duration,
    /// NAME of the env var holding the Postgres URL.
    pub database_url_env: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            public_base_url: None,
            verification_uri: None,
            operator_user_id: DEFAULT_OPERATOR_USER.to_string(),
            code_ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECS),
            database_url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
        }
    }
}

impl ServerSettings {
    pub fn from_config_json(config: &Value) -> Result<Self> {
        Self::from_config_json_with_env(config, resolve_env)
    }

    /// Same as [`ServerSettings::from_config_json`] with an injectable env
    /// lookup, so tests never touch process env.
    pub fn from_config_json_with_env(
        config: &Value,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let bind_addr = env(ENV_DAEMON_ADDR)
            .or_else(|| read_str_at(config, "/server/bind_addr"))
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let operator_user_id = read_str_at(config, "/server/operator_user_id")
            .unwrap_or_else(|| DEFAULT_OPERATOR_USER.to_string());
        let code_ttl_secs =
            read_u64_at(config, "/linking/code_ttl_secs")?.unwrap_or(DEFAULT_CODE_TTL_SECS);
        if code_ttl_secs == 0 {
            bail!("CONFIG_INVALID /linking/code_ttl_secs must be > 0");
        }

        Ok(Self {
            bind_addr,
            public_base_url: read_str_at(config, "/server/public_base_url")
                .map(|s| s.trim_end_matches('/').to_string()),
            verification_uri: read_str_at(config, "/server/verification_uri"),
            operator_user_id,
            code_ttl: Duration::from_secs(code_ttl_secs),
            database_url_env: read_str_at(config, "/database/url_env")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL_ENV.to_string()),
        })
    }

    pub fn public_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.clone(),
            None => format!("http://{}", self.bind_addr),
        }
    }

    pub fn verification_uri(&self) -> String {
        match &self.verification_uri {
            Some(uri) => uri.clone(),
            None => format!("{}{}", self.public_base_url(), ACTIVATE_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: String,
    pub state_dir: PathBuf,
    pub link_timeout: Duration,
    pub poll_interval: Duration,
    pub fetch_attempts: u32,
    pub retry_backoff: Duration,
}

impl ClientSettings {
    pub fn from_config_json(config: &Value) -> Result<Self> {
        Self::from_config_json_with_env(config, resolve_env)
    }

    pub fn from_config_json_with_env(
        config: &Value,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let base_url = env(ENV_BASE_URL)
            .or_else(|| read_str_at(config, "/client/base_url"))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let state_dir = match env(ENV_STATE_DIR).or_else(|| read_str_at(config, "/client/state_dir"))
        {
            Some(dir) => expand_home(&dir, &env)?,
            None => home_dir(&env)?.join(DEFAULT_STATE_DIR_NAME),
        };

        let fetch_attempts = match read_u64_at(config, "/client/fetch_attempts")? {
            Some(0) => bail!("CONFIG_INVALID /client/fetch_attempts must be >= 1"),
            Some(n) => u32::try_from(n).context("/client/fetch_attempts out of range")?,
            None => DEFAULT_FETCH_ATTEMPTS,
        };

        Ok(Self {
            base_url,
            state_dir,
            link_timeout: Duration::from_secs(
                read_u64_at(config, "/client/link_timeout_secs")?
                    .unwrap_or(DEFAULT_LINK_TIMEOUT_SECS),
            ),
            poll_interval: Duration::from_millis(
                read_u64_at(config, "/client/poll_interval_ms")?
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            fetch_attempts,
            retry_backoff: Duration::from_millis(
                read_u64_at(config, "/client/retry_backoff_ms")?
                    .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
        })
    }
}

/// Absent → `None`; present but not a non-negative integer → error.
fn read_u64_at(config: &Value, pointer: &str) -> Result<Option<u64>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) => Ok(Some(n)),
            None => bail!("CONFIG_INVALID {pointer} must be a non-negative integer, got {v}"),
        },
    }
}

fn home_dir(env: &impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    env("HOME")
        .or_else(|| env("USERPROFILE"))
        .map(PathBuf::from)
        .context("cannot locate home directory (HOME / USERPROFILE unset); set MLS_STATE_DIR")
}

fn expand_home(dir: &str, env: &impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if dir == "~" {
        return home_dir(env);
    }
    match dir.strip_prefix("~/") {
        Some(rest) => Ok(home_dir(env)?.join(rest)),
        None => Ok(PathBuf::from(dir)),
    }
}
