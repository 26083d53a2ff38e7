//! Subscriber-facing deployment: pick a node, provision remotely, commit.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use microcloud_common::{Node, SshDetails};
use microcloud_store::{DeploymentGrant, Store, StoreError};

use crate::parser::{parse_output, ParseError};
use crate::remote::{DispatchError, RemoteDispatcher};

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("no deployment found for {0}")]
    NotFound(String),

    #[error("no nodes available in region {0}")]
    NoCapacity(i64),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("malformed provisioning output: {0}")]
    MalformedOutput(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub node_id: i64,
    pub customer_id: i64,
    pub ssh: SshDetails,
}

/// Uniform choice among eligible nodes.
pub fn select_node<'a, R: Rng + ?Sized>(nodes: &'a [Node], rng: &mut R) -> Option<&'a Node> {
    nodes.choose(rng)
}

pub struct FleetDispatcher {
    store: Arc<dyn Store>,
    remote: RemoteDispatcher,
}

impl FleetDispatcher {
    pub fn new(store: Arc<dyn Store>, remote: RemoteDispatcher) -> Self {
        Self { store, remote }
    }

    pub async fn deploy_for_subscriber(&self, email: &str) -> Result<DeployOutcome, DeployError> {
        let target = self
            .store
            .deploy_target(email)
            .await?
            .ok_or_else(|| DeployError::NotFound(email.to_string()))?;

        let nodes = self.store.nodes_in_region(target.region_id).await?;
        let node = select_node(&nodes, &mut rand::thread_rng())
            .cloned()
            .ok_or(DeployError::NoCapacity(target.region_id))?;
        tracing::info!(
            subscription_id = target.subscription_id,
            plan_id = target.plan_id,
            region_id = target.region_id,
            node_id = node.id,
            candidates = nodes.len(),
            "selected node"
        );

        let raw = self
            .remote
            .dispatch(&node, target.plan_id, target.subscription_id, node.id)
            .await?;
        let ssh = match parse_output(&raw) {
            Ok(ssh) => ssh,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    node_id = node.id,
                    subscription_id = target.subscription_id,
                    output = %raw,
                    "provisioning output unreadable; remote workload may be orphaned"
                );
                return Err(e.into());
            }
        };

        let grant = DeploymentGrant {
            subscription_id: target.subscription_id,
            ssh,
        };
        let customer_id = match self.store.record_deployment(&grant).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    node_id = node.id,
                    subscription_id = target.subscription_id,
                    address = %grant.ssh.address,
                    port = grant.ssh.port,
                    "deployment not recorded; remote workload is orphaned"
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            subscription_id = target.subscription_id,
            customer_id,
            node_id = node.id,
            "deployment committed"
        );
        Ok(DeployOutcome {
            node_id: node.id,
            customer_id,
            ssh: grant.ssh,
        })
    }
}
