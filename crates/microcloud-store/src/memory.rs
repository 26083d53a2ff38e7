use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use microcloud_common::{
    DeployTarget, Instance, InstanceStatus, IpMapping, MetricSample, Node, Plan, PortMapping,
    SshDetails, Subscription, SubscriptionStatus, UserLog,
};

use crate::types::{DeploymentGrant, InstanceRecord, NewInstance, Store, StoreError};

/// Tables that can be told to reject writes, for exercising rollback paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Instances,
    PortMappings,
    IpMappings,
    SshDetails,
    Subscriptions,
    UserLogs,
    InstanceMetrics,
}

/// In-process store with the same all-or-nothing semantics as [`crate::PgStore`].
///
/// Each transactional method stages its rows while holding the write lock and
/// applies them only when every step succeeded.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_instance_id: i64,
    plans: BTreeMap<i64, Plan>,
    nodes: Vec<Node>,
    deploy_view: HashMap<String, DeployTarget>,
    subscriptions: BTreeMap<i64, Subscription>,
    instances: Vec<Instance>,
    port_mappings: Vec<PortMapping>,
    ip_mappings: Vec<IpMapping>,
    ssh_details: Vec<SshDetails>,
    user_logs: Vec<UserLog>,
    metrics: Vec<MetricSample>,
    failing: HashSet<Table>,
}

impl Inner {
    fn check(&self, table: Table) -> Result<(), StoreError> {
        if self.failing.contains(&table) {
            return Err(StoreError::Constraint(format!("writes to {table:?} rejected")));
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- seeding --

    pub async fn insert_plan(&self, plan: Plan) {
        self.inner.write().await.plans.insert(plan.id, plan);
    }

    pub async fn insert_node(&self, node: Node) {
        self.inner.write().await.nodes.push(node);
    }

    pub async fn insert_subscription(&self, sub: Subscription) {
        self.inner.write().await.subscriptions.insert(sub.id, sub);
    }

    pub async fn insert_deploy_target(&self, email: &str, target: DeployTarget) {
        self.inner
            .write()
            .await
            .deploy_view
            .insert(email.to_string(), target);
    }

    pub async fn fail_writes_to(&self, table: Table) {
        self.inner.write().await.failing.insert(table);
    }

    // -- inspection --

    pub async fn instances(&self) -> Vec<Instance> {
        self.inner.read().await.instances.clone()
    }

    pub async fn port_mappings(&self) -> Vec<PortMapping> {
        self.inner.read().await.port_mappings.clone()
    }

    pub async fn ip_mappings(&self) -> Vec<IpMapping> {
        self.inner.read().await.ip_mappings.clone()
    }

    pub async fn ssh_details(&self) -> Vec<SshDetails> {
        self.inner.read().await.ssh_details.clone()
    }

    pub async fn user_logs(&self) -> Vec<UserLog> {
        self.inner.read().await.user_logs.clone()
    }

    pub async fn metrics(&self) -> Vec<MetricSample> {
        self.inner.read().await.metrics.clone()
    }

    pub async fn subscription(&self, id: i64) -> Option<Subscription> {
        self.inner.read().await.subscriptions.get(&id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn plan(&self, plan_id: i64) -> Result<Option<Plan>, StoreError> {
        Ok(self.inner.read().await.plans.get(&plan_id).cloned())
    }

    async fn deploy_target(&self, email: &str) -> Result<Option<DeployTarget>, StoreError> {
        Ok(self.inner.read().await.deploy_view.get(email).copied())
    }

    async fn nodes_in_region(&self, region_id: i64) -> Result<Vec<Node>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .iter()
            .filter(|n| n.region == region_id)
            .cloned()
            .collect())
    }

    async fn record_instance(&self, new: &NewInstance) -> Result<InstanceRecord, StoreError> {
        let mut inner = self.inner.write().await;

        inner.check(Table::Instances)?;
        if inner
            .instances
            .iter()
            .any(|i| i.workload_handle == new.workload_handle)
        {
            return Err(StoreError::Constraint(format!(
                "duplicate container_id {}",
                new.workload_handle
            )));
        }
        let instance_id = inner.next_instance_id + 1;
        let instance = Instance {
            id: instance_id,
            plan_id: new.plan_id,
            subscription_id: new.subscription_id,
            node_id: new.node_id,
            status: InstanceStatus::Running,
            workload_handle: new.workload_handle.clone(),
        };

        inner.check(Table::PortMappings)?;
        let port_mappings: Vec<PortMapping> = new
            .port_plan
            .pairs()
            .map(|(external_port, internal_port)| PortMapping {
                external_port,
                internal_port,
                instance_id,
            })
            .collect();

        inner.check(Table::IpMappings)?;
        let ip_mapping = IpMapping {
            external_address: new.external_address.clone(),
            internal_address: new.internal_address.clone(),
            instance_id,
        };

        // commit
        inner.next_instance_id = instance_id;
        inner.instances.push(instance.clone());
        inner.port_mappings.extend_from_slice(&port_mappings);
        inner.ip_mappings.push(ip_mapping.clone());

        Ok(InstanceRecord {
            instance,
            port_mappings,
            ip_mapping,
        })
    }

    async fn record_deployment(&self, grant: &DeploymentGrant) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;

        inner.check(Table::SshDetails)?;
        inner.check(Table::Subscriptions)?;
        let customer_id = inner
            .subscriptions
            .get(&grant.subscription_id)
            .map(|s| s.customer_id)
            .ok_or_else(|| StoreError::not_found("subscription", grant.subscription_id))?;
        inner.check(Table::UserLogs)?;

        // commit
        inner.ssh_details.push(grant.ssh.clone());
        if let Some(sub) = inner.subscriptions.get_mut(&grant.subscription_id) {
            sub.status = SubscriptionStatus::Active;
        }
        inner.user_logs.push(UserLog {
            event_type: UserLog::INSTANCE_GRANTED.to_string(),
            customer_id,
            timestamp: Utc::now(),
        });
        Ok(customer_id)
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self.inner.read().await.instances.clone())
    }

    async fn append_metrics(&self, samples: &[MetricSample]) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        if samples.is_empty() {
            return Ok(0);
        }
        inner.check(Table::InstanceMetrics)?;
        inner.metrics.extend_from_slice(samples);
        Ok(samples.len() as u64)
    }
}
