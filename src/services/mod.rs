pub mod catalog;
pub mod client;
pub mod connection;
pub mod registry;
pub mod supervisor;

pub use catalog::ServiceKind;
pub use client::{User, UserServiceClient};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ServiceStub};
pub use registry::{
    ConsulBackend, DiscoveredNode, MemoryBackend, RegistryAdapter, RegistryClient, RegistryError,
    ServiceRegistration,
};
pub use supervisor::LoopSupervisor;
