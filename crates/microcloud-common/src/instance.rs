use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of externally reachable ports bound for every instance.
pub const PORTS_PER_INSTANCE: usize = 5;

/// Internal service ports, in the order external ports are paired with them.
pub const INTERNAL_PORTS: [u16; PORTS_PER_INSTANCE] = [80, 443, 22, 23, 8083];

/// Index of the SSH port inside [`INTERNAL_PORTS`].
const SSH_SLOT: usize = 2;

/// An ordered assignment of external ports to [`INTERNAL_PORTS`].
/// External ports are guaranteed mutually distinct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<u16>", into = "Vec<u16>")]
pub struct PortPlan([u16; PORTS_PER_INSTANCE]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortPlanError {
    #[error("port plan needs exactly {PORTS_PER_INSTANCE} ports, got {0}")]
    WrongLength(usize),
    #[error("port {0} appears more than once in the port plan")]
    Duplicate(u16),
}

impl PortPlan {
    pub fn new(external: [u16; PORTS_PER_INSTANCE]) -> Result<Self, PortPlanError> {
        for (i, port) in external.iter().enumerate() {
            if external[i + 1..].contains(port) {
                return Err(PortPlanError::Duplicate(*port));
            }
        }
        Ok(Self(external))
    }

    pub fn external_ports(&self) -> [u16; PORTS_PER_INSTANCE] {
        self.0
    }

    /// External port bound to the workload's SSH daemon.
    pub fn ssh_port(&self) -> u16 {
        self.0[SSH_SLOT]
    }

    /// `(external, internal)` pairs in the fixed internal-port order.
    pub fn pairs(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.0.iter().copied().zip(INTERNAL_PORTS)
    }
}

impl TryFrom<Vec<u16>> for PortPlan {
    type Error = PortPlanError;

    fn try_from(ports: Vec<u16>) -> Result<Self, Self::Error> {
        let len = ports.len();
        let arr: [u16; PORTS_PER_INSTANCE] = ports
            .try_into()
            .map_err(|_| PortPlanError::WrongLength(len))?;
        Self::new(arr)
    }
}

impl From<PortPlan> for Vec<u16> {
    fn from(plan: PortPlan) -> Self {
        plan.0.to_vec()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceStatus {
    Running,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "Running",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provisioned workload. Created once, never updated by this core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: i64,
    pub plan_id: i64,
    pub subscription_id: i64,
    pub node_id: i64,
    pub status: InstanceStatus,
    /// Opaque runtime identifier (full container id).
    pub workload_handle: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    pub external_port: u16,
    pub internal_port: u16,
    pub instance_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpMapping {
    pub external_address: String,
    /// Absent when the runtime reported no network attachment.
    pub internal_address: Option<String>,
    pub instance_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_plan_rejects_duplicates() {
        assert_eq!(
            PortPlan::new([10001, 10002, 10003, 10002, 10005]),
            Err(PortPlanError::Duplicate(10002))
        );
    }

    #[test]
    fn test_port_plan_pairs_follow_internal_order() {
        let plan = PortPlan::new([10001, 10002, 10003, 10004, 10005]).unwrap();
        let pairs: Vec<_> = plan.pairs().collect();
        assert_eq!(
            pairs,
            vec![(10001, 80), (10002, 443), (10003, 22), (10004, 23), (10005, 8083)]
        );
        assert_eq!(plan.ssh_port(), 10003);
    }

    #[test]
    fn test_port_plan_serde() {
        let plan: PortPlan = serde_json::from_str("[1,2,3,4,5]").unwrap();
        assert_eq!(plan.external_ports(), [1, 2, 3, 4, 5]);
        assert!(serde_json::from_str::<PortPlan>("[1,2,3]").is_err());
        assert_eq!(serde_json::to_string(&plan).unwrap(), "[1,2,3,4,5]");
    }
}
