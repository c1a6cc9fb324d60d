//! CLI for cluster operations

use clap::{Parser, Subcommand};
use serde_json::Value;
use shardmesh::common::utils::retry_with_backoff;
use shardmesh::common::ServiceKind;
use shardmesh::registry::{InitRequest, RegisterRequest};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "shardmesh")]
#[command(about = "shardmesh cluster CLI")]
#[command(version)]
struct Cli {
    /// API node URL
    #[arg(long, global = true, default_value = "http://localhost:7000")]
    node: String,

    /// Request timeout (e.g. 30s)
    #[arg(long, global = true, default_value = "30s")]
    timeout: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the cluster through one API node (single use)
    Init {
        #[arg(long, env = "SHARDMESH_INIT_SECRET")]
        secret: String,

        #[arg(long)]
        admin_user: String,

        #[arg(long, env = "SHARDMESH_ADMIN_PASSWORD")]
        admin_password: String,

        /// Public address of the node being bootstrapped
        #[arg(long)]
        public_addr: String,

        #[arg(long)]
        private_addr: String,

        /// Port of the node being bootstrapped
        #[arg(long)]
        port: u16,

        /// publicAddr:privateAddr:port:account:password:shardGroup:identity
        #[arg(long = "heartbeat-shard", required = true)]
        heartbeat_shards: Vec<String>,
    },

    /// Advertise a shard on the heartbeat shards so every node picks it up
    RegisterShard {
        /// publicAddr:privateAddr:port:account:password:shardGroup:identity
        descriptor: String,

        #[arg(long)]
        admin_user: String,

        #[arg(long, env = "SHARDMESH_ADMIN_PASSWORD")]
        admin_password: String,

        /// Register a heartbeat shard instead of a data shard
        #[arg(long)]
        heartbeat: bool,
    },

    /// Show the node's current membership view
    Members {
        /// Print the raw JSON
        #[arg(long)]
        json: bool,
    },
}

fn print_descriptors(title: &str, list: Option<&Value>) {
    let items = list.and_then(Value::as_array).cloned().unwrap_or_default();
    println!("{} ({}):", title, items.len());
    for d in items {
        println!(
            "  {}:{}  group={} {} {}",
            d.get("private_addr")
                .and_then(Value::as_str)
                .or_else(|| d.get("public_addr").and_then(Value::as_str))
                .unwrap_or("?"),
            d.get("port").and_then(Value::as_u64).unwrap_or(0),
            d.get("shard_group").and_then(Value::as_u64).unwrap_or(0),
            d.get("identity").and_then(Value::as_str).unwrap_or("?"),
            d.get("health").and_then(Value::as_str).unwrap_or("?"),
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(shardmesh::common::parse_duration(&cli.timeout)?)
        .build()?;
    let base = cli.node.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Init {
            secret,
            admin_user,
            admin_password,
            public_addr,
            private_addr,
            port,
            heartbeat_shards,
        } => {
            let req = InitRequest {
                secret,
                admin_username: admin_user,
                admin_password,
                public_addr,
                private_addr,
                port,
                heartbeat_shards,
            };
            // Not retried: the node burns the secret on the first accepted attempt.
            let resp = client
                .post(format!("{}/cluster/init", base))
                .json(&req)
                .send()
                .await?;
            let status = resp.status();
            let body: Value = resp.json().await?;
            if status.is_success() {
                println!("Cluster bootstrapped");
                println!("{}", serde_json::to_string_pretty(&body["report"])?);
            } else {
                anyhow::bail!(
                    "bootstrap failed ({}) in phase {}: {}",
                    status,
                    body["phase"],
                    body["error"].as_str().unwrap_or("unknown error")
                );
            }
        }

        Commands::RegisterShard {
            descriptor,
            admin_user,
            admin_password,
            heartbeat,
        } => {
            let req = RegisterRequest {
                admin_username: admin_user,
                admin_password,
                descriptor,
                kind: if heartbeat {
                    ServiceKind::HeartbeatShard
                } else {
                    ServiceKind::DataShard
                },
            };
            let resp = client
                .post(format!("{}/cluster/services", base))
                .json(&req)
                .send()
                .await?;
            let status = resp.status();
            let body: Value = resp.json().await?;
            if status.is_success() {
                println!(
                    "Registered on {} heartbeat shards",
                    body["outcome"]["succeeded"]
                        .as_array()
                        .map(|a| a.len())
                        .unwrap_or(0)
                );
            } else {
                anyhow::bail!(
                    "registration failed ({}): {}",
                    status,
                    body["error"].as_str().unwrap_or("unknown error")
                );
            }
        }

        Commands::Members { json } => {
            let url = format!("{}/cluster/members", base);
            let body: Value = retry_with_backoff(
                || async {
                    let resp = client.get(&url).send().await?.error_for_status()?;
                    Ok::<Value, shardmesh::Error>(resp.json().await?)
                },
                3,
                Duration::from_millis(200),
            )
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("Generation: {}", body["generation"]);
                print_descriptors("API nodes", body.get("api_nodes"));
                print_descriptors("Data shards", body.get("data_shards"));
                print_descriptors("Heartbeat shards", body.get("heartbeat_shards"));
            }
        }
    }

    Ok(())
}
