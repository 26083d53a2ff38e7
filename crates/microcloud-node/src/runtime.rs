//! Container runtime boundary.
//!
//! The launcher and the metrics collector only talk to the runtime through
//! [`ContainerRuntime`]; [`crate::docker::DockerCli`] is the production
//! implementation.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use microcloud_common::{PortPlan, Vcpu};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected runtime output: {0}")]
    Decode(String),
}

/// Parameters for starting one workload container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Container name, so a failed start can still be cleaned up.
    pub name: String,
    pub image: String,
    pub vcpu: Vcpu,
    pub memory_mib: u32,
    pub port_plan: PortPlan,
}

/// One network a container is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    /// Empty networks (e.g. `host`) carry no address.
    pub address: Option<String>,
}

/// Raw per-container usage snapshot, one line of `docker stats --format '{{json .}}'`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    #[serde(rename = "Container")]
    pub container: String,
    #[serde(rename = "CPUPerc")]
    pub cpu_percent: String,
    /// `"<used> / <limit>"`, e.g. `"512MiB / 1GiB"`.
    #[serde(rename = "MemUsage")]
    pub mem_usage: String,
    #[serde(rename = "MemPerc")]
    pub mem_percent: String,
    #[serde(rename = "NetIO")]
    pub net_io: String,
    #[serde(rename = "BlockIO")]
    pub block_io: String,
    #[serde(rename = "PIDs")]
    pub pids: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build the image described by `context_dir/Dockerfile` and tag it.
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError>;

    /// Start a detached container and return its handle.
    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError>;

    async fn network_attachments(&self, handle: &str)
        -> Result<Vec<NetworkAttachment>, RuntimeError>;

    /// Force-remove a container, by handle or name.
    async fn remove(&self, handle: &str) -> Result<(), RuntimeError>;

    /// Remove an image tag. Fails while a container still uses the image.
    async fn remove_image(&self, tag: &str) -> Result<(), RuntimeError>;

    /// Usage snapshot of every running container.
    async fn stats(&self) -> Result<Vec<StatsSnapshot>, RuntimeError>;
}
