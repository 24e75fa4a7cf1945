//! mls-daemon entry point.
//!
//! Thin on purpose: load config and keys, pick a store, wire middleware and
//! serve. Handlers live in `routes.rs`; shared state in `state.rs`.

use std::{path::Path, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use mls_config::{
    report_unused_keys, secrets::resolve_keys_for_mode, ConfigMode, LoadedConfig, ServerSettings,
    UnusedKeyPolicy,
};
use mls_daemon::{routes, state::AppState};
use mls_registry::{MemoryStore, RegistryStore};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Comma-separated list of YAML files, merged left to right.
const ENV_CONFIG_PATHS: &str = "MLS_DAEMON_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/server.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience. Silent when the file is absent.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let report = report_unused_keys(ConfigMode::Server, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "config keys not read by mls-daemon");
    }

    let settings = ServerSettings::from_config_json(&loaded.config_json)?;
    let signer = resolve_keys_for_mode(&loaded.config_json, ConfigMode::Server)?.signer()?;
    info!(public_key_b64 = %signer.public_key_b64(), "signing key loaded");

    let store = open_store(&settings).await?;
    let shared = Arc::new(AppState::new(store, signer, &settings));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("bind {}", settings.bind_addr))?;
    info!("mls-daemon listening on http://{}", settings.bind_addr);

    axum::serve(listener, app).await.context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config() -> anyhow::Result<LoadedConfig> {
    if let Ok(raw) = std::env::var(ENV_CONFIG_PATHS) {
        let paths: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if !paths.is_empty() {
            return mls_config::load_layered_yaml(&paths);
        }
    }
    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        return mls_config::load_layered_yaml(&[DEFAULT_CONFIG_PATH]);
    }
    LoadedConfig::empty()
}

/// Postgres when the configured URL var is set, otherwise an in-process
/// store that forgets everything on exit.
async fn open_store(settings: &ServerSettings) -> anyhow::Result<Arc<dyn RegistryStore>> {
    match std::env::var(&settings.database_url_env) {
        Ok(url) if !url.trim().is_empty() => {
            let pool = mls_db::connect(url.trim()).await?;
            mls_db::migrate(&pool).await?;
            info!(env = %settings.database_url_env, "using postgres store");
            Ok(Arc::new(mls_db::PgStore::new(pool)))
        }
        _ => {
            warn!(
                env = %settings.database_url_env,
                "database url not set; using in-memory store"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(tower_http::cors::Any)
}
