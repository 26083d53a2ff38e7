//! Builds and starts one SSH-reachable workload container.

use std::sync::Arc;
use std::time::{Duration, Instant};

use microcloud_common::{PortPlan, Vcpu, INTERNAL_PORTS};

use crate::runtime::{ContainerRuntime, RunSpec, RuntimeError};

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub base_image: String,
    /// Repository part of the per-launch image tag.
    pub image_repository: String,
    pub network_timeout: Duration,
    pub network_poll_interval: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            base_image: "ubuntu:latest".to_string(),
            image_repository: "microcloud-workload".to_string(),
            network_timeout: Duration::from_secs(30),
            network_poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("credential must be non-empty and alphanumeric")]
    InvalidCredential,

    #[error("failed to prepare build context: {0}")]
    Context(#[from] std::io::Error),

    #[error("image build failed: {0}")]
    Build(#[source] RuntimeError),

    #[error("container start failed: {0}")]
    Start(#[source] RuntimeError),

    #[error("container {handle} has no network attachment after {waited:?}")]
    NoNetwork { handle: String, waited: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedWorkload {
    pub handle: String,
    /// Per-launch image tag the container runs from.
    pub image: String,
    /// Address on the first attached network, if that network hands out one.
    pub internal_address: Option<String>,
}

pub struct Launcher {
    cfg: LauncherConfig,
    runtime: Arc<dyn ContainerRuntime>,
}

pub(crate) fn render_dockerfile(base_image: &str, credential: &str) -> String {
    let exposed = INTERNAL_PORTS
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        r#"FROM {base_image}
RUN apt-get update && apt-get install -y openssh-server && \
    echo 'root:{credential}' | chpasswd && \
    sed -i 's/#PermitRootLogin prohibit-password/PermitRootLogin yes/' /etc/ssh/sshd_config && \
    sed -i 's/PasswordAuthentication no/PasswordAuthentication yes/' /etc/ssh/sshd_config && \
    mkdir -p /var/run/sshd
EXPOSE {exposed}
CMD ["/usr/sbin/sshd", "-D"]
"#
    )
}

impl Launcher {
    pub fn new(cfg: LauncherConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { cfg, runtime }
    }

    pub async fn launch(
        &self,
        vcpu: Vcpu,
        memory_mib: u32,
        port_plan: PortPlan,
        credential: &str,
    ) -> Result<LaunchedWorkload, LaunchError> {
        // The credential is spliced into a shell line inside the image definition.
        if credential.is_empty() || !credential.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LaunchError::InvalidCredential);
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let tag = format!("{}:{id}", self.cfg.image_repository);
        let name = format!("{}-{id}", self.cfg.image_repository);

        // Removed when `context` drops, on every path out of this block.
        let context = tempfile::Builder::new().prefix("microcloud-build-").tempdir()?;
        tokio::fs::write(
            context.path().join("Dockerfile"),
            render_dockerfile(&self.cfg.base_image, credential),
        )
        .await?;

        self.runtime
            .build_image(context.path(), &tag)
            .await
            .map_err(LaunchError::Build)?;
        drop(context);

        let run = self
            .runtime
            .run(&RunSpec {
                name: name.clone(),
                image: tag.clone(),
                vcpu,
                memory_mib,
                port_plan,
            })
            .await;
        let handle = match run {
            Ok(handle) => handle,
            Err(e) => {
                // A failed start can leave a created container behind.
                if let Err(rm) = self.discard(&name, &tag).await {
                    tracing::debug!(error=%rm, %name, "no container to remove after failed start");
                }
                return Err(LaunchError::Start(e));
            }
        };
        tracing::info!(%handle, ports = ?port_plan.external_ports(), "workload started");

        let internal_address = match self.wait_for_network(&handle).await {
            Ok(addr) => addr,
            Err(e) => {
                if let Err(rm) = self.discard(&handle, &tag).await {
                    tracing::error!(error=%rm, %handle, "failed to remove unreachable workload");
                }
                return Err(e);
            }
        };
        Ok(LaunchedWorkload {
            handle,
            image: tag,
            internal_address,
        })
    }

    /// Remove a container and then the image it was started from.
    ///
    /// Only a failed container removal is returned; the image is left behind
    /// with a warning if it cannot be removed.
    pub async fn discard(&self, container: &str, image: &str) -> Result<(), RuntimeError> {
        let removed = self.runtime.remove(container).await;
        if let Err(e) = self.runtime.remove_image(image).await {
            tracing::warn!(error=%e, %image, "failed to remove workload image");
        }
        removed
    }

    /// Poll until the first network attachment carries an address.
    ///
    /// Attached networks that never report an address resolve to `None` once
    /// the timeout passes; a container with no attachment at all is an error.
    async fn wait_for_network(&self, handle: &str) -> Result<Option<String>, LaunchError> {
        let started = Instant::now();
        let mut attached = false;

        loop {
            match self.runtime.network_attachments(handle).await {
                Ok(attachments) => {
                    if let Some(first) = attachments.first() {
                        attached = true;
                        if let Some(addr) = &first.address {
                            return Ok(Some(addr.clone()));
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error=%e, %handle, "inspect failed, retrying");
                }
            }

            if started.elapsed() >= self.cfg.network_timeout {
                break;
            }
            tokio::time::sleep(self.cfg.network_poll_interval).await;
        }

        if attached {
            tracing::warn!(%handle, "network attached without an address");
            return Ok(None);
        }

        Err(LaunchError::NoNetwork {
            handle: handle.to_string(),
            waited: started.elapsed(),
        })
    }
}
