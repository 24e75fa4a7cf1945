//! In-process scenario tests for mls-daemon HTTP endpoints.
//!
//! The router is driven via `tower::ServiceExt::oneshot` without binding a
//! socket. Each test builds one memory-backed state and clones the router
//! per request so state carries across calls.

use std::sync::Arc;

use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use mls_artifact::{verify_bundle_bytes, ArtifactSigner};
use mls_config::ServerSettings;
use mls_daemon::{routes, state};
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SEED: [u8; 32] = [21u8; 32];

fn make_router() -> axum::Router {
    let st = Arc::new(state::AppState::in_memory(
        ArtifactSigner::from_seed(&SEED),
        &ServerSettings::default(),
    ));
    routes::build_router(st)
}

async fn call(
    router: &axum::Router,
    req: Request<axum::body::Body>,
) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
    let resp = router.clone().oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, headers, body)
}

fn parse_json(b: &bytes::Bytes) -> Value {
    serde_json::from_slice(b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn get_as_device(uri: &str, token: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Device {token}"))
        .body(axum::body::Body::empty())
        .unwrap()
}

fn send_json(method: &str, uri: &str, body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn draft(name: &str) -> Value {
    json!({
        "manifest": {"name": name},
        "indicators": [{"id": "rsi14", "kind": "rsi", "period": 14}],
        "rules": [{"when": "rsi14 < 30", "then": "buy"}],
        "orders": {"type": "limit", "offset_bps": 5}
    })
}

/// Create a strategy, upload a draft and publish each semver in order.
async fn publish_strategy(router: &axum::Router, name: &str, semvers: &[&str]) -> String {
    let (status, _, body) = call(router, send_json("POST", "/v1/strategies", json!({"name": name}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let sid = parse_json(&body)["id"].as_str().unwrap().to_string();

    let (status, _, _) = call(
        router,
        send_json("PUT", &format!("/v1/strategies/{sid}/draft"), draft(name)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for semver in semvers {
        let (status, _, body) = call(
            router,
            send_json(
                "POST",
                &format!("/v1/strategies/{sid}/publish"),
                json!({"semver": semver}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&body));
    }
    sid
}

/// Register and redeem a device. Returns (device_id, device_token).
async fn linked_device(router: &axum::Router) -> (String, String) {
    let (status, _, body) = call(router, send_json("POST", "/v1/devices/register", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let reg = parse_json(&body);
    let device_id = reg["device_id"].as_str().unwrap().to_string();
    let code = reg["user_code"].as_str().unwrap().to_string();

    let (status, _, body) = call(
        router,
        send_json("POST", "/v1/devices/activate", json!({"user_code": code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let act = parse_json(&body);
    assert_eq!(act["status"], "active");
    (device_id, act["device_token"].as_str().unwrap().to_string())
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_service_and_public_key() {
    let router = make_router();
    let (status, _, body) = call(&router, get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(&body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "mls-daemon");
    assert_eq!(
        json["public_key_b64"],
        ArtifactSigner::from_seed(&SEED).public_key_b64()
    );
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_publish_is_409_with_stable_code() {
    let router = make_router();
    let sid = publish_strategy(&router, "dup", &["1.0.0"]).await;

    let (status, _, body) = call(
        &router,
        send_json(
            "POST",
            &format!("/v1/strategies/{sid}/publish"),
            json!({"semver": "1.0.0"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse_json(&body)["error"], "DUPLICATE_VERSION");
}

#[tokio::test]
async fn publish_without_draft_is_400() {
    let router = make_router();
    let (_, _, body) = call(&router, send_json("POST", "/v1/strategies", json!({"name": "empty"}))).await;
    let sid = parse_json(&body)["id"].as_str().unwrap().to_string();

    let (status, _, body) = call(
        &router,
        send_json(
            "POST",
            &format!("/v1/strategies/{sid}/publish"),
            json!({"semver": "1.0.0"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(&body)["error"], "DRAFT_EMPTY");
}

#[tokio::test]
async fn invalid_semver_and_malformed_draft_are_422() {
    let router = make_router();
    let sid = publish_strategy(&router, "v", &[]).await;

    let (status, _, body) = call(
        &router,
        send_json(
            "POST",
            &format!("/v1/strategies/{sid}/publish"),
            json!({"semver": "1.0"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(parse_json(&body)["error"], "INVALID_SEMVER");

    let (status, _, body) = call(
        &router,
        send_json(
            "PUT",
            &format!("/v1/strategies/{sid}/draft"),
            json!({"manifest": {"name": "v"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(parse_json(&body)["error"], "MALFORMED_PAYLOAD");
}

#[tokio::test]
async fn unknown_strategy_is_404_and_bad_id_is_422() {
    let router = make_router();
    let (status, _, body) = call(
        &router,
        get("/v1/strategies/00000000-0000-0000-0000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(&body)["error"], "STRATEGY_NOT_FOUND");

    let (status, _, body) = call(&router, get("/v1/strategies/not-a-uuid")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(parse_json(&body)["error"], "INVALID_REQUEST");
}

#[tokio::test]
async fn compile_returns_verifiable_bundle() {
    let router = make_router();
    let (status, _, body) = call(&router, send_json("POST", "/v1/compile", draft("c"))).await;
    assert_eq!(status, StatusCode::OK);

    let key = ArtifactSigner::from_seed(&SEED).verifying_key();
    let verified = verify_bundle_bytes(&body, &key).expect("compiled bundle verifies");
    assert_eq!(
        verified.artifact().payload["manifest"]["signature_alg"],
        "ed25519"
    );
}

// ---------------------------------------------------------------------------
// Device link flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn link_flow_poll_reflects_each_state() {
    let router = make_router();
    let (_, _, body) = call(&router, send_json("POST", "/v1/devices/register", json!({}))).await;
    let reg = parse_json(&body);
    let device_id = reg["device_id"].as_str().unwrap().to_string();
    assert_eq!(
        reg["verification_uri"],
        "http://127.0.0.1:8000/v1/devices/activate"
    );
    assert_eq!(reg["expires_in"], 600);

    let (_, _, body) = call(
        &router,
        send_json("POST", "/v1/devices/poll", json!({"device_id": device_id})),
    )
    .await;
    assert_eq!(parse_json(&body), json!({"status": "pending"}));

    // Codes are accepted regardless of case.
    let code = reg["user_code"].as_str().unwrap().to_lowercase();
    let (status, _, body) = call(
        &router,
        send_json("POST", "/v1/devices/activate", json!({"user_code": code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = parse_json(&body)["device_token"].as_str().unwrap().to_string();

    let (_, _, body) = call(
        &router,
        send_json("POST", "/v1/devices/poll", json!({"device_id": device_id})),
    )
    .await;
    assert_eq!(
        parse_json(&body),
        json!({"status": "active", "device_token": token})
    );

    // Second redemption of the same code fails.
    let (status, _, body) = call(
        &router,
        send_json("POST", "/v1/devices/activate", json!({"user_code": code})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(&body)["error"], "CODE_INVALID_OR_EXPIRED");

    let (status, _, _) = call(
        &router,
        send_json("POST", &format!("/v1/devices/{device_id}/revoke"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = call(
        &router,
        send_json("POST", "/v1/devices/poll", json!({"device_id": device_id})),
    )
    .await;
    assert_eq!(parse_json(&body), json!({"status": "revoked"}));
}

#[tokio::test]
async fn verification_uri_is_a_served_route() {
    let router = make_router();
    let (_, _, body) = call(&router, send_json("POST", "/v1/devices/register", json!({}))).await;
    let reg = parse_json(&body);

    let uri = reg["verification_uri"].as_str().unwrap();
    let after_scheme = uri.split_once("://").unwrap().1;
    let path = &after_scheme[after_scheme.find('/').unwrap()..];

    let (status, _, body) = call(
        &router,
        send_json("POST", path, json!({"user_code": reg["user_code"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    assert_eq!(parse_json(&body)["status"], "active");
}

#[tokio::test]
async fn device_listing_requires_own_token() {
    let router = make_router();
    let (device_a, token_a) = linked_device(&router).await;
    let (device_b, _) = linked_device(&router).await;

    let (status, _, body) = call(
        &router,
        get_as_device(&format!("/v1/devices/{device_a}/strategies"), &token_a),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(&body)["items"], json!([]));

    let (status, _, _) = call(
        &router,
        get_as_device(&format!("/v1/devices/{device_b}/strategies"), &token_a),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = call(&router, get(&format!("/v1/devices/{device_a}/strategies"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Grants and artifact fetch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn grant_to_unpublished_pin_is_404() {
    let router = make_router();
    let sid = publish_strategy(&router, "pin", &["1.0.0"]).await;
    let (device_id, _) = linked_device(&router).await;

    let (status, _, body) = call(
        &router,
        send_json(
            "POST",
            &format!("/v1/devices/{device_id}/grants"),
            json!({"strategy_id": sid, "allow_latest": false, "pinned_semver": "9.9.9"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(&body)["error"], "UNKNOWN_VERSION");
}

#[tokio::test]
async fn artifact_fetch_honors_validator_and_grants() {
    let router = make_router();
    let sid = publish_strategy(&router, "etag", &["1.0.0", "1.1.0"]).await;
    let (device_id, token) = linked_device(&router).await;

    let (status, _, body) = call(
        &router,
        send_json(
            "POST",
            &format!("/v1/devices/{device_id}/grants"),
            json!({"strategy_id": sid, "allow_latest": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(&body)["grants"].as_array().unwrap().len(), 1);

    let (_, _, body) = call(
        &router,
        get_as_device(&format!("/v1/devices/{device_id}/strategies"), &token),
    )
    .await;
    let item = &parse_json(&body)["items"][0];
    assert_eq!(item["latest"], "1.1.0");
    let url = item["artifact"]["url"].as_str().unwrap().to_string();
    assert_eq!(url, format!("/v1/artifacts/{sid}/1.1.0"));
    let listed_validator = item["artifact"]["validator"].as_str().unwrap().to_string();

    // No token: 401.
    let (status, _, _) = call(&router, get(&url)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Full fetch: 200 with the listed validator.
    let (status, headers, body) = call(&router, get_as_device(&url, &token)).await;
    assert_eq!(status, StatusCode::OK);
    let etag = headers[header::ETAG].to_str().unwrap().to_string();
    assert_eq!(etag, listed_validator);
    assert_eq!(etag, mls_artifact::weak_validator(&body));
    let key = ArtifactSigner::from_seed(&SEED).verifying_key();
    verify_bundle_bytes(&body, &key).expect("served bundle verifies");

    // Conditional fetch: 304, no body, same validator.
    let req = Request::builder()
        .method("GET")
        .uri(&url)
        .header(header::AUTHORIZATION, format!("Device {token}"))
        .header(header::IF_NONE_MATCH, &etag)
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, headers, body) = call(&router, req).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
    assert_eq!(headers[header::ETAG].to_str().unwrap(), etag);

    // Older version is outside the resolved set: 403.
    let (status, _, body) = call(
        &router,
        get_as_device(&format!("/v1/artifacts/{sid}/1.0.0"), &token),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(parse_json(&body)["error"], "FORBIDDEN");
}

#[tokio::test]
async fn revoked_device_token_stops_working() {
    let router = make_router();
    let sid = publish_strategy(&router, "rv", &["1.0.0"]).await;
    let (device_id, token) = linked_device(&router).await;
    call(
        &router,
        send_json(
            "POST",
            &format!("/v1/devices/{device_id}/grants"),
            json!({"strategy_id": sid, "allow_latest": false, "pinned_semver": "1.0.0"}),
        ),
    )
    .await;

    let url = format!("/v1/artifacts/{sid}/1.0.0");
    let (status, _, _) = call(&router, get_as_device(&url, &token)).await;
    assert_eq!(status, StatusCode::OK);

    call(
        &router,
        send_json("POST", &format!("/v1/devices/{device_id}/revoke"), json!({})),
    )
    .await;

    let (status, _, body) = call(&router, get_as_device(&url, &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(parse_json(&body)["error"], "UNAUTHORIZED_DEVICE");
}

#[tokio::test]
async fn bad_json_body_is_422_invalid_request() {
    let router = make_router();
    let req = Request::builder()
        .method("POST")
        .uri("/v1/devices/activate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let (status, _, body) = call(&router, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(parse_json(&body)["error"], "INVALID_REQUEST");
}
