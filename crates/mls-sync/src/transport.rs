//! Client-side view of the daemon API.
//!
//! The sync engine and the link loop only talk to these traits. [`HttpClient`]
//! is the network implementation; tests drive the daemon router in-process.
//!
//! [`HttpClient`]: crate::HttpClient

use mls_registry::{Registration, ResolvedArtifact};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

/// Raw poll answer. `status` is kept as a string so older daemons that say
/// "linked" instead of "active" still work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub status: String,
    #[serde(default)]
    pub device_token: Option<String>,
}

impl PollResponse {
    /// The issued token, once the device is active.
    pub fn token(&self) -> Option<&str> {
        match self.status.as_str() {
            "active" | "linked" => self.device_token.as_deref().filter(|t| !t.is_empty()),
            _ => None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.status == "revoked"
    }
}

/// Result of one conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// 304: the presented validator is current.
    NotModified,
    /// 200 with the served bytes and the `ETag`, if the server sent one.
    Body {
        bytes: Vec<u8>,
        validator: Option<String>,
    },
}

#[async_trait::async_trait]
pub trait LinkApi: Send + Sync {
    async fn register(&self) -> Result<Registration, SyncError>;

    async fn poll(&self, device_id: Uuid) -> Result<PollResponse, SyncError>;
}

#[async_trait::async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Artifacts the device may fetch, in grant order.
    async fn resolve(&self, device_id: Uuid, token: &str)
        -> Result<Vec<ResolvedArtifact>, SyncError>;

    /// `url` is what [`ResolvedArtifact::url`] carries (server-relative).
    async fn fetch(
        &self,
        token: &str,
        url: &str,
        if_none_match: Option<&str>,
    ) -> Result<Fetched, SyncError>;
}
