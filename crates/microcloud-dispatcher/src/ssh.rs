use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;

use crate::remote::{ExecOutput, RemoteTransport, SshTarget, TransportError};

/// `SHA256:` is optional on both sides.
fn fingerprints_match(pinned: &str, actual: &str) -> bool {
    let strip = |s: &str| s.trim().trim_start_matches("SHA256:").trim_end_matches('=').to_string();
    strip(pinned) == strip(actual)
}

struct HostKeyCheck {
    host: String,
    pinned: Option<String>,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let actual = server_public_key.fingerprint();
        match &self.pinned {
            None => {
                tracing::debug!(host=%self.host, fingerprint=%actual, "accepting host key on first use");
                Ok(true)
            }
            Some(pinned) if fingerprints_match(pinned, &actual) => Ok(true),
            Some(_) => {
                tracing::error!(host=%self.host, fingerprint=%actual, "host key does not match pinned fingerprint");
                Ok(false)
            }
        }
    }
}

/// Public-key authenticated SSH sessions, one per exec.
#[derive(Clone)]
pub struct RusshTransport {
    config: Arc<client::Config>,
}

impl Default for RusshTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl RusshTransport {
    pub fn new(keepalive: Duration) -> Self {
        let config = client::Config {
            keepalive_interval: Some(keepalive),
            ..client::Config::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl RemoteTransport for RusshTransport {
    async fn exec(&self, target: &SshTarget, command: &str) -> Result<ExecOutput, TransportError> {
        let profile = &target.profile;
        let host = profile.hostname.clone();

        let key_pair = russh_keys::load_secret_key(&profile.identity_file, None).map_err(|e| {
            TransportError::Identity {
                path: profile.identity_file.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let handler = HostKeyCheck {
            host: host.clone(),
            pinned: profile.host_key.clone(),
        };
        // A rejected host key surfaces as `UnknownKey`.
        let mut session = client::connect(self.config.clone(), (host.as_str(), target.port), handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey if profile.host_key.is_some() => {
                    TransportError::HostKeyMismatch { host: host.clone() }
                }
                other => TransportError::Connect {
                    host: host.clone(),
                    port: target.port,
                    reason: other.to_string(),
                },
            })?;

        let authenticated = session
            .authenticate_publickey(&profile.user, Arc::new(key_pair))
            .await
            .map_err(|e| TransportError::Connect {
                host: host.clone(),
                port: target.port,
                reason: e.to_string(),
            })?;
        if !authenticated {
            return Err(TransportError::AuthRejected {
                user: profile.user.clone(),
                host,
            });
        }

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            tracing::debug!(error=%e, %host, "ssh disconnect failed");
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }
}
