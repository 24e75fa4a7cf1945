//! mls-sync
//!
//! Device side of strategy distribution: link a device with a one-time code,
//! then keep a local directory of verified strategy bundles in step with the
//! device's grants using conditional fetches.

pub mod error;
pub mod http;
pub mod link;
pub mod state;
pub mod syncer;
pub mod transport;

pub use error::SyncError;
pub use http::HttpClient;
pub use link::{link_device, wait_for_activation, LinkOptions, Linked};
pub use state::{cache_key, Cache, CacheEntry, DeviceFile, LocalState};
pub use syncer::{ItemOutcome, ItemReport, RetryPolicy, SyncReport, Syncer};
pub use transport::{ArtifactSource, Fetched, LinkApi, PollResponse};
