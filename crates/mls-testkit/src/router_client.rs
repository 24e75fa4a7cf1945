use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use mls_daemon::api_types::{DeviceStrategiesResponse, ErrorResponse};
use mls_registry::{Registration, ResolvedArtifact};
use mls_sync::{ArtifactSource, Fetched, LinkApi, PollResponse, SyncError};
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot
use uuid::Uuid;

/// Sync transport backed by the daemon router, with counters and a tamper
/// hook for scenarios.
pub struct RouterClient {
    router: axum::Router,
    bodies_served: AtomicUsize,
    not_modified: AtomicUsize,
    tampered_urls: Mutex<HashSet<String>>,
}

impl RouterClient {
    pub fn new(router: axum::Router) -> Self {
        Self {
            router,
            bodies_served: AtomicUsize::new(0),
            not_modified: AtomicUsize::new(0),
            tampered_urls: Mutex::new(HashSet::new()),
        }
    }

    /// Number of 200 artifact responses so far.
    pub fn bodies_served(&self) -> usize {
        self.bodies_served.load(Ordering::SeqCst)
    }

    /// Number of 304 artifact responses so far.
    pub fn not_modified(&self) -> usize {
        self.not_modified.load(Ordering::SeqCst)
    }

    /// Corrupt the payload of every future 200 for `url` after it leaves the
    /// daemon, as a hostile network hop would.
    pub fn tamper_with(&self, url: &str) {
        if let Ok(mut set) = self.tampered_urls.lock() {
            set.insert(url.to_string());
        }
    }

    fn is_tampered(&self, url: &str) -> bool {
        self.tampered_urls
            .lock()
            .map(|set| set.contains(url))
            .unwrap_or(false)
    }

    async fn send(&self, req: Request<Body>) -> Result<(StatusCode, HeaderMap, bytes::Bytes), SyncError> {
        let resp = self
            .router
            .clone()
            .oneshot(req)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?
            .to_bytes();
        Ok((status, headers, body))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(&self, uri: &str, body: Value) -> Result<T, SyncError> {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let (status, _, body) = self.send(req).await?;
        decode(status, &body)
    }
}

fn error_for(status: StatusCode, body: &[u8]) -> SyncError {
    if status == StatusCode::UNAUTHORIZED {
        return SyncError::Unauthorized;
    }
    let (code, detail) = match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(e) => (e.error, e.detail),
        Err(_) => ("HTTP_ERROR".to_string(), String::from_utf8_lossy(body).into_owned()),
    };
    SyncError::Status {
        status: status.as_u16(),
        code,
        detail,
    }
}

fn decode<T: serde::de::DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, SyncError> {
    if !status.is_success() {
        return Err(error_for(status, body));
    }
    serde_json::from_slice(body).map_err(|e| SyncError::Decode(e.to_string()))
}

fn tamper(bytes: &[u8]) -> Vec<u8> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(mut v) => {
            v["payload"]["orders"]["size_pct"] = json!(100);
            serde_json::to_vec(&v).unwrap_or_else(|_| bytes.to_vec())
        }
        Err(_) => bytes.to_vec(),
    }
}

#[async_trait::async_trait]
impl LinkApi for RouterClient {
    async fn register(&self) -> Result<Registration, SyncError> {
        self.post_json("/v1/devices/register", json!({})).await
    }

    async fn poll(&self, device_id: Uuid) -> Result<PollResponse, SyncError> {
        self.post_json("/v1/devices/poll", json!({ "device_id": device_id }))
            .await
    }
}

#[async_trait::async_trait]
impl ArtifactSource for RouterClient {
    async fn resolve(
        &self,
        device_id: Uuid,
        token: &str,
    ) -> Result<Vec<ResolvedArtifact>, SyncError> {
        let req = Request::builder()
            .method("GET")
            .uri(format!("/v1/devices/{device_id}/strategies"))
            .header(header::AUTHORIZATION, format!("Device {token}"))
            .body(Body::empty())
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let (status, _, body) = self.send(req).await?;
        let listing: DeviceStrategiesResponse = decode(status, &body)?;
        Ok(listing.items.into_iter().filter_map(|i| i.artifact).collect())
    }

    async fn fetch(
        &self,
        token: &str,
        url: &str,
        if_none_match: Option<&str>,
    ) -> Result<Fetched, SyncError> {
        let mut req = Request::builder()
            .method("GET")
            .uri(url)
            .header(header::AUTHORIZATION, format!("Device {token}"));
        if let Some(v) = if_none_match {
            req = req.header(header::IF_NONE_MATCH, v);
        }
        let req = req
            .body(Body::empty())
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let (status, headers, body) = self.send(req).await?;

        if status == StatusCode::NOT_MODIFIED {
            self.not_modified.fetch_add(1, Ordering::SeqCst);
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            return Err(error_for(status, &body));
        }
        self.bodies_served.fetch_add(1, Ordering::SeqCst);

        let bytes = if self.is_tampered(url) {
            tamper(&body)
        } else {
            body.to_vec()
        };
        Ok(Fetched::Body {
            bytes,
            validator: headers
                .get(header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }
}
