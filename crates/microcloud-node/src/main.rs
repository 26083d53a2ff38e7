mod args;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use microcloud_common::auth::parse_auth_from_env;
use microcloud_common::telemetry::{init_tracing, shutdown_tracing, TelemetryConfig};
use microcloud_node::api::{self, CREATED_MESSAGE};
use microcloud_node::public_ip::{AddressResolver, FixedAddress, HttpAddressResolver};
use microcloud_node::state::AppState;
use microcloud_node::{
    AllocatorConfig, Collector, CollectorConfig, ContainerRuntime, DockerCli, Launcher,
    LauncherConfig, PortAllocator, ProvisionRequest, Provisioner, TcpProbe,
};
use microcloud_store::{PgStore, PgStoreConfig, Store};

use crate::args::{Args, CollectorArgs, Command, ProvisionArgs};

fn build_provisioner(
    a: &ProvisionArgs,
    store: Arc<dyn Store>,
    runtime: Arc<dyn ContainerRuntime>,
) -> anyhow::Result<Provisioner> {
    let allocator = PortAllocator::new(
        AllocatorConfig {
            range: a.port_range_start..=a.port_range_end,
            max_attempts: a.port_max_attempts,
        },
        Arc::new(TcpProbe::default()),
    );
    let launcher = Launcher::new(
        LauncherConfig {
            base_image: a.base_image.clone(),
            network_timeout: Duration::from_secs(a.network_timeout_secs),
            network_poll_interval: Duration::from_millis(a.network_poll_ms),
            ..LauncherConfig::default()
        },
        runtime,
    );
    let resolver: Arc<dyn AddressResolver> = match &a.external_address {
        Some(addr) => Arc::new(FixedAddress(addr.clone())),
        None => Arc::new(HttpAddressResolver::new(
            a.ip_echo_url.clone(),
            Duration::from_secs(a.ip_echo_timeout_secs),
        )?),
    };
    Ok(Provisioner::new(
        store,
        allocator,
        launcher,
        resolver,
        a.credential_length,
    ))
}

fn build_collector(
    a: &CollectorArgs,
    store: Arc<dyn Store>,
    runtime: Arc<dyn ContainerRuntime>,
) -> Collector {
    Collector::new(
        CollectorConfig {
            interval: Duration::from_millis(a.metrics_interval_ms),
        },
        runtime,
        store,
    )
}

async fn run(args: Args) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(
        PgStore::connect(&PgStoreConfig {
            database_url: args.database_url.clone(),
            max_connections: args.db_max_connections,
            ..PgStoreConfig::default()
        })
        .await?,
    );
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(args.docker_bin.clone()));

    match args.command {
        Command::Provision {
            plan_id,
            subscription_id,
            node_id,
            provision,
        } => {
            let provisioner = build_provisioner(&provision, store, runtime)?;
            let outcome = provisioner
                .provision(ProvisionRequest {
                    plan_id,
                    subscription_id,
                    node_id,
                })
                .await?;

            // Consumed line by line by the fleet dispatcher.
            println!("{CREATED_MESSAGE}");
            println!("SSH Command: {}", outcome.ssh_command);
            println!("Password: {}", outcome.credential);
        }
        Command::Serve {
            listen_addr,
            no_collector,
            provision,
            collector,
        } => {
            let provisioner = build_provisioner(&provision, store.clone(), runtime.clone())?;

            let collector_status = if no_collector {
                None
            } else {
                let c = build_collector(&collector, store, runtime);
                let status = c.status();
                tokio::spawn(c.run());
                Some(status)
            };

            let st = AppState {
                provisioner: Arc::new(provisioner),
                collector: collector_status,
                auth: parse_auth_from_env(),
            };

            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            tracing::info!(%listen_addr, "microcloud-node listening");
            axum::serve(listener, api::router(st)).await?;
        }
        Command::Collect { collector } => {
            build_collector(&collector, store, runtime).run().await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let provider = init_tracing(&TelemetryConfig::from_env("microcloud-node"));

    let result = run(args).await;
    shutdown_tracing(provider);
    result
}
