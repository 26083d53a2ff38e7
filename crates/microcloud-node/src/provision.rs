//! Local provisioning: allocate, launch, record.
//!
//! Shared by the one-shot `provision` command and `POST /spawn_instance`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use microcloud_common::{PortPlan, PortPlanError, SshDetails, INTERNAL_PORTS, PORTS_PER_INSTANCE};
use microcloud_store::{NewInstance, Store, StoreError};

use crate::allocator::{generate_credential, AllocationError, PortAllocator};
use crate::launcher::{LaunchError, Launcher};
use crate::public_ip::AddressResolver;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub plan_id: i64,
    pub subscription_id: i64,
    pub node_id: i64,
}

/// What the caller gets back. The credential appears here once and is not stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub instance_id: i64,
    pub workload_handle: String,
    pub credential: String,
    pub external_address: String,
    pub internal_address: Option<String>,
    pub external_ports: Vec<u16>,
    pub internal_ports: Vec<u16>,
    pub ssh_command: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("plan {0} not found")]
    PlanNotFound(i64),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("allocated ports do not form a port plan: {0}")]
    PortPlan(#[from] PortPlanError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Provisioner {
    store: Arc<dyn Store>,
    allocator: PortAllocator,
    launcher: Launcher,
    resolver: Arc<dyn AddressResolver>,
    credential_length: usize,
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn Store>,
        allocator: PortAllocator,
        launcher: Launcher,
        resolver: Arc<dyn AddressResolver>,
        credential_length: usize,
    ) -> Self {
        Self {
            store,
            allocator,
            launcher,
            resolver,
            credential_length,
        }
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    #[tracing::instrument(skip(self), fields(plan_id = req.plan_id, subscription_id = req.subscription_id, node_id = req.node_id))]
    pub async fn provision(&self, req: ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError> {
        let plan = self
            .store
            .plan(req.plan_id)
            .await?
            .ok_or(ProvisionError::PlanNotFound(req.plan_id))?;

        let lease = self.allocator.allocate(PORTS_PER_INSTANCE).await?;
        let mut external = [0u16; PORTS_PER_INSTANCE];
        external.copy_from_slice(lease.ports());
        let port_plan = PortPlan::new(external)?;
        let credential = generate_credential(self.credential_length);

        let workload = self
            .launcher
            .launch(plan.vcpu, plan.ram_mib, port_plan, &credential)
            .await?;
        // Ports are bound by the runtime now.
        drop(lease);

        let external_address = self.resolver.external_address().await;

        let new = NewInstance {
            plan_id: req.plan_id,
            subscription_id: req.subscription_id,
            node_id: req.node_id,
            workload_handle: workload.handle.clone(),
            port_plan,
            external_address: external_address.clone(),
            internal_address: workload.internal_address.clone(),
        };

        let record = match self.store.record_instance(&new).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error=%e, handle=%workload.handle, "failed to record instance, removing workload");
                if let Err(rm) = self.launcher.discard(&workload.handle, &workload.image).await {
                    tracing::error!(error=%rm, handle=%workload.handle, "orphaned workload left running");
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            instance_id = record.instance.id,
            handle = %workload.handle,
            %external_address,
            ssh_port = port_plan.ssh_port(),
            "instance provisioned"
        );

        let ssh = SshDetails {
            address: external_address.clone(),
            port: port_plan.ssh_port(),
            credential: credential.clone(),
        };
        Ok(ProvisionOutcome {
            instance_id: record.instance.id,
            workload_handle: workload.handle,
            credential,
            external_address,
            internal_address: workload.internal_address,
            external_ports: port_plan.external_ports().to_vec(),
            internal_ports: INTERNAL_PORTS.to_vec(),
            ssh_command: ssh.ssh_command(),
        })
    }
}
