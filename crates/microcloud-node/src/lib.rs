pub mod allocator;
pub mod api;
pub mod docker;
pub mod launcher;
pub mod metrics;
pub mod provision;
pub mod public_ip;
pub mod runtime;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use allocator::{AllocationError, AllocatorConfig, PortAllocator, PortLease, PortProbe, TcpProbe};
pub use docker::DockerCli;
pub use launcher::{LaunchError, LaunchedWorkload, Launcher, LauncherConfig};
pub use metrics::{Collector, CollectorConfig, CollectorStatus, SharedCollectorStatus};
pub use provision::{ProvisionError, ProvisionOutcome, ProvisionRequest, Provisioner};
pub use runtime::{ContainerRuntime, RuntimeError};
