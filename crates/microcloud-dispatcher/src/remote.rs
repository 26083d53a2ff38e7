//! Runs the provisioning command on a fleet node and hands back its stdout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use microcloud_common::Node;

use crate::profiles::{ConnectionProfile, ProfileDirectory, ProfileError, DEFAULT_SSH_PORT};

pub const DEFAULT_COMMAND_TEMPLATE: &str =
    "sudo microcloud-node provision {plan_id} {subscription_id} {node_id}";
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// `{plan_id}`, `{subscription_id}` and `{node_id}` are substituted.
    pub command_template: String,
    pub exec_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_template: DEFAULT_COMMAND_TEMPLATE.to_string(),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

/// Resolved connection target for one exec call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub profile: ConnectionProfile,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to load identity {path}: {reason}")]
    Identity { path: String, reason: String },

    #[error("connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("host key for {host} does not match the pinned fingerprint")]
    HostKeyMismatch { host: String },

    #[error("public key authentication rejected for {user}@{host}")]
    AuthRejected { user: String, host: String },

    #[error("channel error: {0}")]
    Channel(String),
}

/// One remote command execution over some transport.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn exec(&self, target: &SshTarget, command: &str) -> Result<ExecOutput, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no connection profile registered for node {0}")]
    UnknownNode(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("remote command error: {0}")]
    RemoteExecution(String),

    #[error("remote command did not finish within {0:?}")]
    Timeout(Duration),
}

pub fn render_command(template: &str, plan_id: i64, subscription_id: i64, node_id: i64) -> String {
    template
        .replace("{plan_id}", &plan_id.to_string())
        .replace("{subscription_id}", &subscription_id.to_string())
        .replace("{node_id}", &node_id.to_string())
}

pub struct RemoteDispatcher {
    cfg: DispatchConfig,
    profiles: Arc<ProfileDirectory>,
    transport: Arc<dyn RemoteTransport>,
}

impl RemoteDispatcher {
    pub fn new(
        cfg: DispatchConfig,
        profiles: Arc<ProfileDirectory>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            cfg,
            profiles,
            transport,
        }
    }

    fn target(&self, node: &Node) -> Result<SshTarget, DispatchError> {
        let profile = self
            .profiles
            .resolve(&node.ip)?
            .ok_or_else(|| DispatchError::UnknownNode(node.ip.clone()))?;
        Ok(SshTarget {
            port: profile.port.or(node.ssh_port).unwrap_or(DEFAULT_SSH_PORT),
            profile: profile.clone(),
        })
    }

    /// Run the provisioning command on `node` and return its stdout verbatim.
    ///
    /// Any non-whitespace output on stderr fails the call, whatever the exit
    /// status.
    pub async fn dispatch(
        &self,
        node: &Node,
        plan_id: i64,
        subscription_id: i64,
        node_id: i64,
    ) -> Result<String, DispatchError> {
        let target = self.target(node)?;
        let command = render_command(&self.cfg.command_template, plan_id, subscription_id, node_id);
        tracing::info!(
            node_id,
            alias = %target.profile.alias,
            host = %target.profile.hostname,
            port = target.port,
            %command,
            "dispatching remote provisioning"
        );

        let out = tokio::time::timeout(self.cfg.exec_timeout, self.transport.exec(&target, &command))
            .await
            .map_err(|_| DispatchError::Timeout(self.cfg.exec_timeout))??;

        let stderr = out.stderr.trim();
        if !stderr.is_empty() {
            tracing::warn!(node_id, exit_status = ?out.exit_status, %stderr, "remote command reported an error");
            return Err(DispatchError::RemoteExecution(stderr.to_string()));
        }
        tracing::debug!(node_id, exit_status = ?out.exit_status, "remote command finished");
        Ok(out.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{directory, node, FakeTransport};

    fn dispatcher(transport: &FakeTransport, cfg: DispatchConfig) -> RemoteDispatcher {
        RemoteDispatcher::new(cfg, Arc::new(directory()), Arc::new(transport.clone()))
    }

    #[test]
    fn test_render_command() {
        assert_eq!(
            render_command(DEFAULT_COMMAND_TEMPLATE, 2, 41, 5),
            "sudo microcloud-node provision 2 41 5"
        );
    }

    #[tokio::test]
    async fn test_dispatch_returns_stdout_verbatim() {
        let t = FakeTransport::replying(ExecOutput {
            stdout: "line one\nSSH Command: ssh root@1.2.3.4 -p 10001\n".into(),
            stderr: "  \n".into(),
            exit_status: Some(0),
        });
        let out = dispatcher(&t, DispatchConfig::default())
            .dispatch(&node(5, "129.151.137.147"), 2, 41, 5)
            .await
            .unwrap();
        assert_eq!(out, "line one\nSSH Command: ssh root@1.2.3.4 -p 10001\n");

        let calls = t.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "sudo microcloud-node provision 2 41 5");
        assert_eq!(calls[0].0.profile.alias, "oracle1");
    }

    #[tokio::test]
    async fn test_stderr_fails_even_with_zero_exit() {
        let t = FakeTransport::replying(ExecOutput {
            stdout: "SSH Command: ssh root@1.2.3.4 -p 10001\nPassword: x\n".into(),
            stderr: "warning: something\n".into(),
            exit_status: Some(0),
        });
        let err = dispatcher(&t, DispatchConfig::default())
            .dispatch(&node(5, "129.151.137.147"), 1, 1, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::RemoteExecution(ref m) if m == "warning: something"));
    }

    #[tokio::test]
    async fn test_unknown_node_never_connects() {
        let t = FakeTransport::default();
        let err = dispatcher(&t, DispatchConfig::default())
            .dispatch(&node(9, "10.9.9.9"), 1, 1, 9)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownNode(ref ip) if ip == "10.9.9.9"));
        assert!(t.calls().is_empty());
    }

    #[tokio::test]
    async fn test_port_precedence() {
        let t = FakeTransport::default();
        let d = dispatcher(&t, DispatchConfig::default());

        // profile port wins
        d.dispatch(&node(5, "129.151.137.147"), 1, 1, 5).await.unwrap();
        // node port when the profile has none
        let mut n = node(6, "15.206.149.72");
        n.ssh_port = Some(2200);
        d.dispatch(&n, 1, 1, 6).await.unwrap();
        // default otherwise
        d.dispatch(&node(6, "15.206.149.72"), 1, 1, 6).await.unwrap();

        let ports: Vec<u16> = t.calls().iter().map(|(target, _)| target.port).collect();
        assert_eq!(ports, vec![2222, 2200, 22]);
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let t = FakeTransport::hanging();
        let err = dispatcher(
            &t,
            DispatchConfig {
                exec_timeout: Duration::from_millis(20),
                ..DispatchConfig::default()
            },
        )
        .dispatch(&node(5, "129.151.137.147"), 1, 1, 5)
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
    }
}
