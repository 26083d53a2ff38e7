use serde::{Deserialize, Serialize};

/// A fleet member that can host workloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: i64,
    pub ip: String,
    pub region: i64,

    #[serde(default)]
    pub ssh_port: Option<u16>,
}
