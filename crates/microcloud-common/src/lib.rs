pub mod instance;
pub mod metric_sample;
pub mod node;
pub mod plan;
pub mod ssh_details;
pub mod subscription;

pub use instance::{
    Instance, InstanceStatus, IpMapping, PortMapping, PortPlan, PortPlanError, INTERNAL_PORTS,
    PORTS_PER_INSTANCE,
};
pub use metric_sample::MetricSample;
pub use node::Node;
pub use plan::{Plan, Vcpu, VcpuError};
pub use ssh_details::SshDetails;
pub use subscription::{DeployTarget, Subscription, SubscriptionStatus, UserLog};

pub mod auth;
pub mod telemetry;
