//! Device linking wait loop.

use std::time::Duration;

use mls_registry::Registration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::transport::LinkApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Overall wait budget after registration.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Outcome of a successful link.
#[derive(Clone, PartialEq, Eq)]
pub struct Linked {
    pub device_id: Uuid,
    pub device_token: String,
}

impl std::fmt::Debug for Linked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linked")
            .field("device_id", &self.device_id)
            .field("device_token", &"<REDACTED>")
            .finish()
    }
}

/// Register a new device, hand the code to `show`, then poll until the code
/// is redeemed.
///
/// Transport errors while polling are logged and retried after the interval.
/// Any other poll error ends the loop.
pub async fn link_device(
    api: &dyn LinkApi,
    opts: LinkOptions,
    show: impl FnOnce(&Registration),
) -> Result<Linked, SyncError> {
    let reg = api.register().await?;
    info!(device_id = %reg.device_id, expires_in = reg.expires_in, "device registered, waiting for activation");
    show(&reg);
    wait_for_activation(api, reg.device_id, opts).await
}

pub async fn wait_for_activation(
    api: &dyn LinkApi,
    device_id: Uuid,
    opts: LinkOptions,
) -> Result<Linked, SyncError> {
    let started = Instant::now();
    let deadline = started + opts.timeout;

    loop {
        match api.poll(device_id).await {
            Ok(resp) => {
                if let Some(token) = resp.token() {
                    info!(%device_id, "device activated");
                    return Ok(Linked {
                        device_id,
                        device_token: token.to_string(),
                    });
                }
                if resp.is_revoked() {
                    return Err(SyncError::DeviceRevoked(device_id));
                }
                debug!(%device_id, status = %resp.status, "still waiting");
            }
            Err(e) if e.is_transient() => {
                warn!(%device_id, error = %e, "poll failed, retrying");
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(opts.poll_interval.min(deadline - now)).await;
    }

    Err(SyncError::ActivationTimedOut {
        device_id,
        waited_secs: started.elapsed().as_secs(),
    })
}
