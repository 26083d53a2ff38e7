use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use microcloud_common::Node;

use crate::profiles::ProfileDirectory;
use crate::remote::{ExecOutput, RemoteTransport, SshTarget, TransportError};

pub const GOOD_OUTPUT: &str = "Docker instance has been created successfully.\n\
SSH Command: ssh root@203.0.113.5 -p 10423\n\
Password: Ab3xT9pL2q0Z\n";

pub fn directory() -> ProfileDirectory {
    ProfileDirectory::from_toml_str(
        r#"
[nodes]
"129.151.137.147" = "oracle1"
"15.206.149.72" = "aws1"
"4.213.178.67" = "azure1-1"
"4.240.98.248" = "azure1-3"

[profiles.oracle1]
hostname = "129.151.137.147"
identity_file = "/keys/oracle1.pem"
port = 2222

[profiles.aws1]
identity_file = "/keys/aws1.pem"

[profiles.azure1-1]
identity_file = "/keys/azure.pem"

[profiles.azure1-3]
identity_file = "/keys/azure.pem"
"#,
    )
    .unwrap()
}

pub fn node(id: i64, ip: &str) -> Node {
    Node {
        id,
        ip: ip.to_string(),
        region: 1,
        ssh_port: None,
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Output(ExecOutput),
    Hang,
    Fail,
}

/// Records `(target, command)` for every exec and answers with a canned reply.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    reply: Reply,
    calls: Arc<Mutex<Vec<(SshTarget, String)>>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::replying(ExecOutput {
            stdout: GOOD_OUTPUT.to_string(),
            stderr: String::new(),
            exit_status: Some(0),
        })
    }
}

impl FakeTransport {
    pub fn replying(out: ExecOutput) -> Self {
        Self {
            reply: Reply::Output(out),
            calls: Arc::default(),
        }
    }

    pub fn stdout(stdout: &str) -> Self {
        Self::replying(ExecOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_status: Some(0),
        })
    }

    pub fn hanging() -> Self {
        Self {
            reply: Reply::Hang,
            calls: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Reply::Fail,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<(SshTarget, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    async fn exec(&self, target: &SshTarget, command: &str) -> Result<ExecOutput, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((target.clone(), command.to_string()));
        match &self.reply {
            Reply::Output(out) => Ok(out.clone()),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ExecOutput::default())
            }
            Reply::Fail => Err(TransportError::Connect {
                host: target.profile.hostname.clone(),
                port: target.port,
                reason: "connection refused".into(),
            }),
        }
    }
}
