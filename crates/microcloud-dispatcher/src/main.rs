mod args;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use microcloud_common::auth::parse_auth_from_env;
use microcloud_common::telemetry::{init_tracing, shutdown_tracing, TelemetryConfig};
use microcloud_dispatcher::api;
use microcloud_dispatcher::state::AppState;
use microcloud_dispatcher::{
    DispatchConfig, FleetDispatcher, ProfileDirectory, RemoteDispatcher, RusshTransport,
};
use microcloud_store::{PgStore, PgStoreConfig};

use crate::args::Args;

async fn run(args: Args) -> anyhow::Result<()> {
    let profiles = ProfileDirectory::load(&args.profiles)?;

    let store = PgStore::connect(&PgStoreConfig {
        database_url: args.database_url.clone(),
        max_connections: args.db_max_connections,
        ..PgStoreConfig::default()
    })
    .await?;

    let remote = RemoteDispatcher::new(
        DispatchConfig {
            command_template: args.remote_command.clone(),
            exec_timeout: Duration::from_secs(args.exec_timeout_secs),
        },
        Arc::new(profiles),
        Arc::new(RusshTransport::new(Duration::from_secs(args.ssh_keepalive_secs))),
    );

    let st = AppState {
        fleet: Arc::new(FleetDispatcher::new(Arc::new(store), remote)),
        auth: parse_auth_from_env(),
    };

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(listen_addr = %args.listen_addr, "microcloud-dispatcher listening");
    axum::serve(listener, api::router(st)).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let provider = init_tracing(&TelemetryConfig::from_env("microcloud-dispatcher"));

    let result = run(args).await;
    shutdown_tracing(provider);
    result
}
