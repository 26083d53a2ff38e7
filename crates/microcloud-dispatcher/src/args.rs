use std::path::PathBuf;

use clap::Parser;

use microcloud_dispatcher::remote::{DEFAULT_COMMAND_TEMPLATE, DEFAULT_EXEC_TIMEOUT};

#[derive(Debug, Parser)]
#[command(author, version, about = "Deploy subscriber workloads across the microcloud fleet")]
pub struct Args {
    #[arg(long, env = "MICROCLOUD_DISPATCHER_ADDR", default_value = "0.0.0.0:9999")]
    pub listen_addr: String,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "MICROCLOUD_DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// TOML file mapping node addresses to SSH connection profiles.
    #[arg(long, env = "MICROCLOUD_PROFILES", default_value = "/etc/microcloud/profiles.toml")]
    pub profiles: PathBuf,

    /// Remote command; `{plan_id}`, `{subscription_id}` and `{node_id}` are substituted.
    #[arg(
        long,
        env = "MICROCLOUD_REMOTE_COMMAND",
        default_value = DEFAULT_COMMAND_TEMPLATE
    )]
    pub remote_command: String,

    #[arg(long, default_value_t = DEFAULT_EXEC_TIMEOUT.as_secs())]
    pub exec_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub ssh_keepalive_secs: u64,
}
