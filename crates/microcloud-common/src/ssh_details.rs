use serde::{Deserialize, Serialize};

/// Connection details reported back by a remote provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshDetails {
    pub address: String,
    pub port: u16,
    pub credential: String,
}

impl SshDetails {
    pub fn ssh_command(&self) -> String {
        format!("ssh root@{} -p {}", self.address, self.port)
    }
}
