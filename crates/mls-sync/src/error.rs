use mls_artifact::VerifyError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Connection, timeout or body read failure. Retried.
    #[error("transport: {0}")]
    Transport(String),
    /// Non-success status other than 401. 5xx and 429 are retried.
    #[error("http {status}: {code} {detail}")]
    Status {
        status: u16,
        code: String,
        detail: String,
    },
    /// Token missing, unknown or revoked.
    #[error("device is not authorized (token rejected)")]
    Unauthorized,
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("device {device_id} was not activated within {waited_secs}s")]
    ActivationTimedOut { device_id: Uuid, waited_secs: u64 },
    #[error("device {0} was revoked before activation")]
    DeviceRevoked(Uuid),
    #[error("device is not linked: run `mls link` first")]
    NotLinked,
    #[error("local state: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
