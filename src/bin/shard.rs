//! Shard server binary

use clap::{Parser, Subcommand};
use shardmesh::{common::ShardConfig, ShardServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardmesh-shard")]
#[command(about = "shardmesh document shard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the shard server
    Serve {
        /// Shard ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Data directory (sled-backend builds only)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Account clients must present
        #[arg(long)]
        username: Option<String>,

        #[arg(long, env = "SHARDMESH_SHARD_PASSWORD")]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
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
            data,
            username,
            password,
        } => {
            let mut shard_config: ShardConfig = config.shard.unwrap_or_default();
            if let Some(bind) = bind {
                shard_config.bind_addr = bind;
            }
            if let Some(data) = data {
                tokio::fs::create_dir_all(&data).await?;
                shard_config.data_path = Some(data);
            }
            if username.is_some() {
                shard_config.username = username;
            }
            if password.is_some() {
                shard_config.password = password;
            }

            let server = ShardServer::new(shard_config, id.unwrap_or(config.node_id));
            server.serve().await?;
        }
    }

    Ok(())
}
