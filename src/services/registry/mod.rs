//! Registry module
//!
//! Service registration, TTL heartbeats, discovery and key-value configuration:
//! - `client`: the capability interface every registry satisfies
//! - `backend`: wire-level operations, implemented by `consul` and `memory`
//! - `adapter`: registration lifecycle and heartbeat supervision
//! - `kv`: cached configuration reads and change watches
//! - `settings`: decoding of the stored bootstrap document

pub mod adapter;
pub mod backend;
pub mod client;
pub mod consul;
pub mod error;
mod heartbeat;
mod kv;
pub mod memory;
pub mod settings;
pub mod types;

pub use adapter::{DEFAULT_MAX_HEARTBEAT_FAILURES, RegistryAdapter};
pub use backend::RegistryBackend;
pub use client::RegistryClient;
pub use consul::ConsulBackend;
pub use error::RegistryError;
pub use memory::MemoryBackend;
pub use settings::RemoteSettings;
pub use types::{
    ConfigCacheEntry, ConfigCallback, DiscoveredNode, HeartbeatStats, MIN_HEARTBEAT_INTERVAL, Protocol,
    RegistrationState, ServiceRegistration, WatchId, format_duration, parse_duration,
};
