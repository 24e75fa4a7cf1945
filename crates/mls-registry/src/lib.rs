//! mls-registry
//!
//! Server-side domain of strategy distribution:
//! - [`Publisher`]: strategy drafts, signing and append-only versions
//! - [`DeviceAuthority`]: link codes, redemption, tokens, revocation
//! - [`GrantResolver`]: device grants and the artifact set they resolve to
//!
//! All persisted state goes through [`RegistryStore`]. [`MemoryStore`] is the
//! in-process implementation; `mls-db` provides Postgres.

pub mod devices;
pub mod error;
pub mod grants;
pub mod memory;
pub mod publisher;
pub mod semver;
pub mod store;
pub mod types;

pub use devices::{
    generate_device_token, generate_link_code, normalize_link_code, Activation, DeviceAuthority,
    PollStatus, Registration,
};
pub use error::RegistryError;
pub use grants::{select_version, DeviceStrategyEntry, GrantResolver};
pub use memory::MemoryStore;
pub use publisher::{PublishedVersion, Publisher};
pub use semver::is_valid_semver;
pub use store::{next_version_time, RegistryStore, StoreError};
pub use types::{
    artifact_url, Device, DeviceStatus, Grant, LinkRecord, ResolvedArtifact, Strategy,
    StoredArtifact, VersionRecord,
};
