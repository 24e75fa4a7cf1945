//! Axum router and all HTTP handlers for mls-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Operator routes act as `AppState::operator_user_id`.
//! Device routes require `Authorization: Device <token>`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use mls_artifact::if_none_match_satisfied;
use mls_registry::{is_valid_semver, Device, RegistryError};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    api_types::{
        ActivateRequest, ActivateResponse, CreateStrategyRequest, DeviceStrategiesResponse,
        GrantRequest, GrantResponse, HealthResponse, PollRequest, PublishRequest, RevokeResponse,
    },
    error::ApiError,
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/strategies", get(list_strategies).post(create_strategy))
        .route("/v1/strategies/:sid", get(get_strategy))
        .route("/v1/strategies/:sid/draft", put(put_draft))
        .route("/v1/strategies/:sid/publish", post(publish))
        .route("/v1/compile", post(compile))
        .route("/v1/artifacts/:sid/:semver", get(get_artifact))
        .route("/v1/devices/register", post(register_device))
        .route("/v1/devices/activate", post(activate_device))
        .route("/v1/devices/poll", post(poll_device))
        .route("/v1/devices/:device_id/grants", post(set_grant))
        .route("/v1/devices/:device_id/revoke", post(revoke_device))
        .route("/v1/devices/:device_id/strategies", get(device_strategies))
        .with_state(state)
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Unprocessable(format!("invalid {what}: {raw:?}")))
}

/// Token from `Authorization: Device <token>`. Scheme match is
/// case-insensitive.
pub fn device_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("device") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

async fn authenticate(
    st: &AppState,
    headers: &HeaderMap,
    device_id: Option<Uuid>,
) -> Result<Device, ApiError> {
    let token = device_token_from_headers(headers).ok_or(RegistryError::UnauthorizedDevice)?;
    Ok(st.devices.authenticate(device_id, token).await?)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            public_key_b64: st.publisher.public_key_b64(),
        }),
    )
}

// ---------------------------------------------------------------------------
// /v1/strategies
// ---------------------------------------------------------------------------

pub(crate) async fn list_strategies(
    State(st): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let list = st.publisher.list_strategies(&st.operator_user_id).await?;
    Ok(Json(list))
}

pub(crate) async fn create_strategy(
    State(st): State<Arc<AppState>>,
    body: Result<Json<CreateStrategyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let s = st
        .publisher
        .create_strategy(&st.operator_user_id, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(s)))
}

pub(crate) async fn get_strategy(
    State(st): State<Arc<AppState>>,
    Path(sid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = parse_id(&sid, "strategy_id")?;
    let s = st.publisher.get_strategy(&st.operator_user_id, sid).await?;
    Ok(Json(s))
}

pub(crate) async fn put_draft(
    State(st): State<Arc<AppState>>,
    Path(sid): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = parse_id(&sid, "strategy_id")?;
    let Json(draft) = body?;
    let s = st
        .publisher
        .update_draft(&st.operator_user_id, sid, draft)
        .await?;
    Ok(Json(s))
}

pub(crate) async fn publish(
    State(st): State<Arc<AppState>>,
    Path(sid): Path<String>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = parse_id(&sid, "strategy_id")?;
    let Json(req) = body?;
    let published = st
        .publisher
        .publish(&st.operator_user_id, sid, req.semver.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(published)))
}

// ---------------------------------------------------------------------------
// POST /v1/compile
// ---------------------------------------------------------------------------

/// Sign a submitted payload and return the bundle. Nothing is stored.
pub(crate) async fn compile(
    State(st): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = body?;
    let artifact = st.publisher.compile(&payload)?;
    Ok(Json(artifact))
}

// ---------------------------------------------------------------------------
// GET /v1/artifacts/{sid}/{semver}
// ---------------------------------------------------------------------------

/// Serve stored artifact bytes under their weak validator.
///
/// The caller must be an active device whose resolved set contains exactly
/// this `(sid, semver)`. A matching `If-None-Match` yields `304` with no body.
pub(crate) async fn get_artifact(
    State(st): State<Arc<AppState>>,
    Path((sid, semver)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let sid = parse_id(&sid, "strategy_id")?;
    if !is_valid_semver(&semver) {
        return Err(RegistryError::InvalidSemver(semver).into());
    }

    let device = authenticate(&st, &headers, None).await?;
    let granted = st
        .grants
        .resolve(device.device_id)
        .await?
        .iter()
        .any(|r| r.strategy_id == sid && r.semver == semver);
    if !granted {
        return Err(RegistryError::Forbidden.into());
    }

    let artifact = st
        .store
        .read_artifact(sid, &semver)
        .await
        .map_err(RegistryError::from)?
        .ok_or(RegistryError::UnknownVersion {
            strategy_id: sid,
            semver: semver.clone(),
        })?;

    let etag = HeaderValue::from_str(&artifact.validator)
        .map_err(|e| RegistryError::Signing(format!("validator is not a header value: {e}")))?;

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|inm| if_none_match_satisfied(inm, &artifact.validator));

    if not_modified {
        debug!(device_id = %device.device_id, strategy_id = %sid, semver, "artifact not modified");
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    info!(device_id = %device.device_id, strategy_id = %sid, semver, "artifact served");
    Ok((
        StatusCode::OK,
        [
            (header::ETAG, etag),
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            ),
        ],
        artifact.bytes,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// /v1/devices
// ---------------------------------------------------------------------------

pub(crate) async fn register_device(
    State(st): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let reg = st.devices.register().await?;
    Ok(Json(reg))
}

pub(crate) async fn activate_device(
    State(st): State<Arc<AppState>>,
    body: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let act = st
        .devices
        .redeem(&req.user_code, &st.operator_user_id)
        .await?;
    Ok(Json(ActivateResponse {
        device_id: act.device_id,
        device_token: act.device_token,
        status: "active".to_string(),
    }))
}

pub(crate) async fn poll_device(
    State(st): State<Arc<AppState>>,
    body: Result<Json<PollRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let status = st.devices.poll(req.device_id).await?;
    Ok(Json(status))
}

pub(crate) async fn set_grant(
    State(st): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    body: Result<Json<GrantRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let device_id = parse_id(&device_id, "device_id")?;
    let Json(req) = body?;
    st.grants
        .grant(
            &st.operator_user_id,
            device_id,
            req.strategy_id,
            req.allow_latest,
            req.pinned_semver,
        )
        .await?;
    let grants = st.grants.grants(device_id).await?;
    Ok(Json(GrantResponse { ok: true, grants }))
}

pub(crate) async fn revoke_device(
    State(st): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let device_id = parse_id(&device_id, "device_id")?;
    st.devices.revoke(device_id).await?;
    Ok(Json(RevokeResponse {
        device_id,
        status: "revoked".to_string(),
    }))
}

/// Grants of the calling device with their resolution. The token must
/// belong to the device named in the path.
pub(crate) async fn device_strategies(
    State(st): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let device_id = parse_id(&device_id, "device_id")?;
    authenticate(&st, &headers, Some(device_id)).await?;
    let items = st.grants.listing(device_id).await?;
    Ok(Json(DeviceStrategiesResponse { device_id, items }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        h
    }

    #[test]
    fn device_scheme_is_parsed() {
        assert_eq!(device_token_from_headers(&headers("Device abc")), Some("abc"));
        assert_eq!(device_token_from_headers(&headers("device  abc ")), Some("abc"));
        assert_eq!(device_token_from_headers(&headers("Bearer abc")), None);
        assert_eq!(device_token_from_headers(&headers("Device ")), None);
        assert_eq!(device_token_from_headers(&HeaderMap::new()), None);
    }
}
