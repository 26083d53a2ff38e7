use clap::{Parser, Subcommand};

use microcloud_node::allocator::{DEFAULT_CREDENTIAL_LENGTH, DEFAULT_MAX_ATTEMPTS, DEFAULT_PORT_RANGE};
use microcloud_node::metrics::DEFAULT_INTERVAL;
use microcloud_node::public_ip::DEFAULT_ECHO_URL;

#[derive(Debug, Parser)]
#[command(name = "microcloud-node")]
#[command(about = "Provision and monitor workloads on a microcloud node", long_about = None)]
pub struct Args {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "MICROCLOUD_DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// Container runtime CLI.
    #[arg(long, env = "MICROCLOUD_DOCKER_BIN", default_value = "docker")]
    pub docker_bin: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision one instance and print its SSH command and password
    Provision {
        plan_id: i64,
        subscription_id: i64,
        node_id: i64,

        #[command(flatten)]
        provision: ProvisionArgs,
    },
    /// Serve the node HTTP API and run the metrics collector
    Serve {
        #[arg(long, env = "MICROCLOUD_NODE_ADDR", default_value = "0.0.0.0:5000")]
        listen_addr: String,

        /// Do not start the metrics collector in this process.
        #[arg(long, default_value_t = false)]
        no_collector: bool,

        #[command(flatten)]
        provision: ProvisionArgs,

        #[command(flatten)]
        collector: CollectorArgs,
    },
    /// Run only the metrics collector
    Collect {
        #[command(flatten)]
        collector: CollectorArgs,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct ProvisionArgs {
    #[arg(long, default_value_t = *DEFAULT_PORT_RANGE.start())]
    pub port_range_start: u16,

    #[arg(long, default_value_t = *DEFAULT_PORT_RANGE.end())]
    pub port_range_end: u16,

    /// Give up allocating ports after this many probes.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub port_max_attempts: u32,

    #[arg(long, default_value_t = DEFAULT_CREDENTIAL_LENGTH)]
    pub credential_length: usize,

    #[arg(long, default_value = "ubuntu:latest")]
    pub base_image: String,

    #[arg(long, default_value_t = 30)]
    pub network_timeout_secs: u64,

    #[arg(long, default_value_t = 500)]
    pub network_poll_ms: u64,

    /// Plain-text IP echo service used to learn this node's public address.
    #[arg(long, env = "MICROCLOUD_IP_ECHO_URL", default_value = DEFAULT_ECHO_URL)]
    pub ip_echo_url: String,

    /// Skip the lookup and record this address instead.
    #[arg(long, env = "MICROCLOUD_EXTERNAL_ADDRESS")]
    pub external_address: Option<String>,

    #[arg(long, default_value_t = 10)]
    pub ip_echo_timeout_secs: u64,
}

#[derive(Debug, Clone, clap::Args)]
pub struct CollectorArgs {
    #[arg(long, env = "MICROCLOUD_METRICS_INTERVAL_MS", default_value_t = DEFAULT_INTERVAL.as_millis() as u64)]
    pub metrics_interval_ms: u64,
}
