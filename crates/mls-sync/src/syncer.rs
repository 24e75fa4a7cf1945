//! One sync cycle: resolve, conditional fetch, verify, persist.
//!
//! Per artifact:
//! - cached validator and bundle file present → sent as `If-None-Match`;
//! - `304` → unchanged, nothing is read, verified or written;
//! - `200` → verify against the configured key, then write the bundle and
//!   record the validator;
//! - verification failure → rejected, nothing written, batch continues;
//! - transient transport failure → retried with exponential backoff, then
//!   reported as failed.
//!
//! The cache file is written once, after the whole batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mls_artifact::{verify_bundle_bytes, weak_validator, VerifyError, VerifyingKey};
use mls_registry::{is_valid_semver, ResolvedArtifact};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::state::{Cache, CacheEntry, DeviceFile, LocalState};
use crate::transport::{ArtifactSource, Fetched};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `n` (1-based).
    pub fn delay_after(&self, n: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(n.saturating_sub(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Unchanged,
    Updated { validator: String },
    /// Failed verification. Nothing was written.
    Rejected { reason: String },
    /// Could not be fetched or stored.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub strategy_id: Uuid,
    pub semver: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub items: Vec<ItemReport>,
}

impl SyncReport {
    fn count(&self, f: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| f(&i.outcome)).count()
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Updated { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Unchanged))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Rejected { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    /// Every item is either unchanged or updated.
    pub fn is_clean(&self) -> bool {
        self.rejected() == 0 && self.failed() == 0
    }
}

pub struct Syncer {
    source: Arc<dyn ArtifactSource>,
    state: LocalState,
    public_key: VerifyingKey,
    retry: RetryPolicy,
}

impl Syncer {
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        state: LocalState,
        public_key: VerifyingKey,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            state,
            public_key,
            retry,
        }
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    /// Sync using the linked device from `device.json`.
    pub async fn sync_linked(&self) -> Result<SyncReport, SyncError> {
        let device = self.state.load_device()?.ok_or(SyncError::NotLinked)?;
        self.sync_once(&device).await
    }

    /// Run one cycle. Only failures that stop the whole batch (listing the
    /// grants, reading or writing the cache) are errors; per-item problems
    /// land in the report.
    pub async fn sync_once(&self, device: &DeviceFile) -> Result<SyncReport, SyncError> {
        let resolved = self
            .with_retry(|| self.source.resolve(device.device_id, &device.device_token))
            .await?;
        debug!(device_id = %device.device_id, count = resolved.len(), "resolved artifact set");

        let mut cache = self.state.load_cache()?;
        let mut report = SyncReport::default();
        for item in &resolved {
            let outcome = self.sync_item(device, item, &mut cache).await;
            report.items.push(ItemReport {
                strategy_id: item.strategy_id,
                semver: item.semver.clone(),
                outcome,
            });
        }
        self.state.save_cache(&cache)?;

        info!(
            device_id = %device.device_id,
            updated = report.updated(),
            unchanged = report.unchanged(),
            rejected = report.rejected(),
            failed = report.failed(),
            "sync finished"
        );
        Ok(report)
    }

    async fn sync_item(
        &self,
        device: &DeviceFile,
        item: &ResolvedArtifact,
        cache: &mut Cache,
    ) -> ItemOutcome {
        let sid = item.strategy_id;
        let semver = item.semver.as_str();
        if !is_valid_semver(semver) {
            return ItemOutcome::Failed {
                error: format!("server listed an invalid semver {semver:?}"),
            };
        }

        let presented = cache
            .get(sid, semver)
            .filter(|_| self.state.bundle_path(sid, semver).is_file())
            .map(|e| e.validator.clone());

        let fetched = self
            .with_retry(|| {
                self.source
                    .fetch(&device.device_token, &item.url, presented.as_deref())
            })
            .await;

        let (bytes, served_validator) = match fetched {
            Ok(Fetched::NotModified) if presented.is_some() => {
                debug!(strategy_id = %sid, semver, "not modified");
                return ItemOutcome::Unchanged;
            }
            Ok(Fetched::NotModified) => {
                return ItemOutcome::Failed {
                    error: "304 without a cached validator".to_string(),
                };
            }
            Ok(Fetched::Body { bytes, validator }) => (bytes, validator),
            Err(e) => {
                warn!(strategy_id = %sid, semver, error = %e, "fetch failed");
                return ItemOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let verified = match verify_bundle_bytes(&bytes, &self.public_key) {
            Ok(v) => v,
            Err(e) => return reject(sid, semver, e),
        };
        if verified.content_hash() != item.content_hash {
            return reject(
                sid,
                semver,
                VerifyError::HashMismatch {
                    computed: verified.content_hash().to_string(),
                    claimed: Some(item.content_hash.clone()),
                },
            );
        }

        if let Err(e) = self.state.write_bundle(sid, semver, &bytes) {
            warn!(strategy_id = %sid, semver, error = %e, "bundle write failed");
            return ItemOutcome::Failed {
                error: e.to_string(),
            };
        }

        let validator = served_validator.unwrap_or_else(|| weak_validator(&bytes));
        cache.insert(
            sid,
            semver,
            CacheEntry {
                validator: validator.clone(),
                content_hash: verified.content_hash().to_string(),
                fetched_at: Utc::now(),
            },
        );
        info!(strategy_id = %sid, semver, validator = %validator, "artifact updated");
        ItemOutcome::Updated { validator }
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SyncError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut n = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && n < attempts => {
                    let delay = self.retry.delay_after(n);
                    debug!(attempt = n, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                    n += 1;
                }
                other => return other,
            }
        }
    }
}

fn reject(strategy_id: Uuid, semver: &str, e: VerifyError) -> ItemOutcome {
    warn!(%strategy_id, semver, error = %e, "artifact rejected");
    ItemOutcome::Rejected {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            attempts: 4,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn report_counts() {
        let sid = Uuid::new_v4();
        let item = |outcome| ItemReport {
            strategy_id: sid,
            semver: "1.0.0".to_string(),
            outcome,
        };
        let r = SyncReport {
            items: vec![
                item(ItemOutcome::Unchanged),
                item(ItemOutcome::Updated {
                    validator: "W/\"a\"".to_string(),
                }),
                item(ItemOutcome::Rejected {
                    reason: "bad".to_string(),
                }),
            ],
        };
        assert_eq!((r.unchanged(), r.updated(), r.rejected(), r.failed()), (1, 1, 1, 0));
        assert!(!r.is_clean());
    }
}
