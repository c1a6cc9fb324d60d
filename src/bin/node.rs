//! API node binary

use clap::{Parser, Subcommand};
use shardmesh::{common::NodeConfig, ApiNode};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardmesh-node")]
#[command(about = "shardmesh API node: registry, heartbeat and bootstrap endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API node
    Serve {
        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Database name used on every shard
        #[arg(long)]
        database: Option<String>,

        /// One-time bootstrap secret (generated when omitted)
        #[arg(long, env = "SHARDMESH_INIT_SECRET")]
        secret: Option<String>,

        /// Heartbeat interval (e.g. 10s)
        #[arg(long)]
        heartbeat: Option<String>,

        /// Settle delay after the bootstrap broadcast (e.g. 3s)
        #[arg(long)]
        settle: Option<String>,

        /// Heartbeat shard to join at startup (repeatable)
        #[arg(long = "join")]
        join: Vec<String>,

        /// Public address advertised when joining
        #[arg(long)]
        public_addr: Option<String>,

        /// Private address advertised when joining
        #[arg(long)]
        private_addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config from file and environment, then override with CLI arguments
    let config = shardmesh::Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            database,
            secret,
            heartbeat,
            settle,
            join,
            public_addr,
            private_addr,
        } => {
            let mut node_config: NodeConfig = config.node.unwrap_or_default();
            if let Some(bind) = bind {
                node_config.bind_addr = bind;
            }
            if let Some(database) = database {
                node_config.database = database;
            }
            if secret.is_some() {
                node_config.init_secret = secret;
            }
            if let Some(heartbeat) = heartbeat {
                node_config.heartbeat_interval_ms =
                    shardmesh::common::parse_duration(&heartbeat)?.as_millis() as u64;
            }
            if let Some(settle) = settle {
                node_config.settle_delay_ms =
                    shardmesh::common::parse_duration(&settle)?.as_millis() as u64;
            }
            if !join.is_empty() {
                node_config.join_heartbeat_shards = join;
            }
            if public_addr.is_some() {
                node_config.public_addr = public_addr;
            }
            if private_addr.is_some() {
                node_config.private_addr = private_addr;
            }

            let node = ApiNode::new(node_config, id.unwrap_or(config.node_id));
            node.serve().await?;
        }
    }

    Ok(())
}
