//! Service discovery: registry clients, instance pools and endpoint sets.

pub mod balancer;
pub mod config;
pub mod consul;
pub mod endpointer;
pub mod instance;
pub mod instancer;
pub mod memory;
pub mod registry;

pub use balancer::{Balancer, RoundRobin};
pub use config::DiscoveryConfig;
pub use consul::ConsulRegistry;
pub use endpointer::{Endpoint, EndpointFactory, EndpointSet, EndpointSource, Endpointer, Release};
pub use instance::{HealthCheck, Instance, Registration};
pub use instancer::{InstanceReceiver, InstanceSet, Instancer};
pub use memory::MemoryRegistry;
pub use registry::{RegistryClient, RegistryError, WatchResult};
