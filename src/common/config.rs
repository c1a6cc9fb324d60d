//! Configuration for shardmesh components
//!
//! Values come from an optional `shardmesh.toml` in the working directory,
//! then `SHARDMESH__*` environment variables (e.g. `SHARDMESH__NODE__DATABASE`).
//! Binaries apply their CLI flags on top.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier, used in logs)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// API-node-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeConfig>,

    /// Shard-server-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "node-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// API node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Bind address for the node HTTP API
    pub bind_addr: SocketAddr,

    /// Database name used on every shard
    #[serde(default = "default_database")]
    pub database: String,

    /// Interval between heartbeat ticks
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Grace period after the bootstrap broadcast
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Per-shard connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for API node health pings
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// One-time bootstrap secret; generated at startup when absent
    #[serde(default)]
    pub init_secret: Option<String>,

    /// Heartbeat shards to join at startup, for nodes added to a cluster
    /// that is already bootstrapped (packed descriptor strings)
    #[serde(default)]
    pub join_heartbeat_shards: Vec<String>,

    /// Address other nodes use to reach this one; advertised when joining
    #[serde(default)]
    pub public_addr: Option<String>,

    #[serde(default)]
    pub private_addr: Option<String>,
}

fn default_database() -> String {
    "shardmesh".to_string()
}
fn default_heartbeat_interval() -> u64 {
    10_000
}
fn default_settle_delay() -> u64 {
    3_000
}
fn default_connect_timeout() -> u64 {
    3_000
}
fn default_probe_timeout() -> u64 {
    2_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            database: default_database(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            settle_delay_ms: default_settle_delay(),
            connect_timeout_ms: default_connect_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            init_secret: None,
            join_heartbeat_shards: Vec::new(),
            public_addr: None,
            private_addr: None,
        }
    }
}

impl NodeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Reject settings the heartbeat scheduler cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.database.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("database name is empty".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "heartbeat interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Shard server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Bind address for the shard HTTP API
    pub bind_addr: SocketAddr,

    /// Data directory (only used with the `sled-backend` feature)
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    /// Account required from clients, if any
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 27117)),
            data_path: None,
            username: None,
            password: None,
        }
    }
}

impl Config {
    /// Load configuration from `shardmesh.toml` (optional) and the environment
    pub fn load() -> crate::Result<Self> {
        Self::load_from("shardmesh")
    }

    /// Load configuration from the given file stem (optional) and the environment
    pub fn load_from(file_stem: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(config::Environment::with_prefix("SHARDMESH").separator("__"))
            .build()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            node: None,
            shard: None,
            log_level: default_log_level(),
        }
    }
}
