//! Assistive Store Cart - offline-capable cart state manager.
//!
//! Keeps a client-side cart eventually consistent with the server-held
//! cart while tolerating intermittent connectivity:
//!
//! - optimistic mutations, rolled back precisely when the server refuses
//! - stock ceilings enforced before anything is sent
//! - a FIFO queue of offline mutations replayed on reconnect
//! - a size-capped snapshot in a local key-value store
//!
//! # Modules
//!
//! - [`engine`] - [`CartStore`], the reconciliation engine
//! - [`guard`] - stock checks
//! - [`queue`] - pending-action queue
//! - [`persist`] - snapshot read/write with the size cap
//! - [`storage`] - [`LocalStore`] trait, memory and file stores
//! - [`remote`] - [`RemoteCart`] trait and its HTTP client
//! - [`connectivity`] - online signal and `/health` probe
//! - [`config`] - environment configuration
//! - [`error`] - error types

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod guard;
pub mod persist;
pub mod queue;
pub mod remote;
pub mod storage;

pub use config::{CartConfig, ConfigError, StoreOptions};
pub use connectivity::{Connectivity, HealthProbe, NetworkStatus};
pub use engine::{CartNotice, CartSnapshot, CartStore, FetchOutcome, NoticeLevel};
pub use error::{CartError, MutationOutcome, Result};
pub use queue::{DrainReport, PendingQueue};
pub use remote::{HttpRemoteCart, RemoteCart, RemoteError};
pub use storage::{FileStore, LocalStore, MemoryStore, StorageError};
