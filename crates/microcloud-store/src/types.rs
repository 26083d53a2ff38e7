use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use microcloud_common::{
    DeployTarget, Instance, IpMapping, MetricSample, Node, Plan, PortMapping, PortPlan, SshDetails,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("malformed {table} row: {reason}")]
    InvalidRow { table: &'static str, reason: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

/// Everything needed to record one locally provisioned workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewInstance {
    pub plan_id: i64,
    pub subscription_id: i64,
    pub node_id: i64,
    pub workload_handle: String,
    pub port_plan: PortPlan,
    pub external_address: String,
    pub internal_address: Option<String>,
}

/// The six rows written for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRecord {
    pub instance: Instance,
    pub port_mappings: Vec<PortMapping>,
    pub ip_mapping: IpMapping,
}

/// Result of a successful remote provisioning run, to be committed for a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentGrant {
    pub subscription_id: i64,
    pub ssh: SshDetails,
}

/// The relational store boundary.
///
/// `record_instance` and `record_deployment` are the transactional units:
/// either every row they describe is committed, or none is.
#[async_trait]
pub trait Store: Send + Sync {
    async fn plan(&self, plan_id: i64) -> Result<Option<Plan>, StoreError>;

    async fn deploy_target(&self, email: &str) -> Result<Option<DeployTarget>, StoreError>;

    async fn nodes_in_region(&self, region_id: i64) -> Result<Vec<Node>, StoreError>;

    /// Insert the instance (status Running), its five port mappings and its IP
    /// mapping in one transaction.
    async fn record_instance(&self, new: &NewInstance) -> Result<InstanceRecord, StoreError>;

    /// Insert the SSH details, activate the subscription and append the
    /// customer's "Got Instance" log row in one transaction. Returns the
    /// customer id.
    async fn record_deployment(&self, grant: &DeploymentGrant) -> Result<i64, StoreError>;

    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError>;

    /// Append samples for one poll tick. Returns the number of rows written.
    async fn append_metrics(&self, samples: &[MetricSample]) -> Result<u64, StoreError>;
}
