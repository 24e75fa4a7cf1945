//! reqwest-backed transport.

use mls_registry::{DeviceStrategyEntry, Registration, ResolvedArtifact};
use reqwest::{header, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::SyncError;
use crate::transport::{ArtifactSource, Fetched, LinkApi, PollResponse};

/// HTTP client for one daemon. Device tokens are passed per call and never
/// logged.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Deserialize)]
struct StrategiesBody {
    items: Vec<DeviceStrategyEntry>,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Server-relative paths are joined to the base; absolute URLs pass through.
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, SyncError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }
}

fn transport(e: reqwest::Error) -> SyncError {
    SyncError::Transport(e.to_string())
}

async fn error_for(resp: reqwest::Response) -> SyncError {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return SyncError::Unauthorized;
    }
    let text = resp.text().await.unwrap_or_default();
    let (code, detail) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(b) => (b.error, b.detail),
        Err(_) => ("HTTP_ERROR".to_string(), text),
    };
    SyncError::Status {
        status: status.as_u16(),
        code,
        detail,
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, SyncError> {
    if !resp.status().is_success() {
        return Err(error_for(resp).await);
    }
    let bytes = resp.bytes().await.map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| SyncError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl LinkApi for HttpClient {
    async fn register(&self) -> Result<Registration, SyncError> {
        self.post_json("/v1/devices/register", json!({})).await
    }

    async fn poll(&self, device_id: Uuid) -> Result<PollResponse, SyncError> {
        self.post_json("/v1/devices/poll", json!({ "device_id": device_id }))
            .await
    }
}

#[async_trait::async_trait]
impl ArtifactSource for HttpClient {
    async fn resolve(
        &self,
        device_id: Uuid,
        token: &str,
    ) -> Result<Vec<ResolvedArtifact>, SyncError> {
        let resp = self
            .http
            .get(self.url(&format!("/v1/devices/{device_id}/strategies")))
            .header(header::AUTHORIZATION, format!("Device {token}"))
            .send()
            .await
            .map_err(transport)?;
        let body: StrategiesBody = decode(resp).await?;
        Ok(body.items.into_iter().filter_map(|i| i.artifact).collect())
    }

    async fn fetch(
        &self,
        token: &str,
        url: &str,
        if_none_match: Option<&str>,
    ) -> Result<Fetched, SyncError> {
        let mut req = self
            .http
            .get(self.url(url))
            .header(header::AUTHORIZATION, format!("Device {token}"));
        if let Some(v) = if_none_match {
            req = req.header(header::IF_NONE_MATCH, v);
        }
        let resp = req.send().await.map_err(transport)?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }
        let validator = resp
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await.map_err(transport)?;
        Ok(Fetched::Body {
            bytes: bytes.to_vec(),
            validator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls_join_base() {
        let c = HttpClient::new("http://h:8000/");
        assert_eq!(c.url("/v1/health"), "http://h:8000/v1/health");
        assert_eq!(c.url("v1/health"), "http://h:8000/v1/health");
        assert_eq!(c.url("https://cdn/x"), "https://cdn/x");
    }
}
