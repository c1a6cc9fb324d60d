//! # shardmesh
//!
//! A heartbeat-driven service registry and data-access layer over a set of
//! independently replicated document shards:
//! - One-time, secret-gated cluster bootstrap
//! - Periodic rediscovery of API nodes and shards from heartbeat shards
//! - Connection reconciliation that only retires shards a fresh probe saw fail
//! - Broadcast writes and scatter-gather reads with structural dedupe
//! - Cluster-wide monotonic sequences
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!  ┌────────────┐  ┌────────────┐  ┌────────────┐
//!  │ API node 1 │  │ API node 2 │  │ API node 3 │   registry in memory,
//!  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘   rebuilt every tick
//!        │  heartbeat    │               │
//!  ┌─────▼───────────────▼───────────────▼─────┐
//!  │   Heartbeat shards (services, admins)     │
//!  └───────────────────────────────────────────┘
//!        │ broadcast writes / scatter-gather reads
//!  ┌─────▼──────┐  ┌────────────┐  ┌────────────┐
//!  │ Data shard │  │ Data shard │  │ Data shard │
//!  │  group 0   │  │  group 0   │  │  group 1   │
//!  └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a shard
//! ```bash
//! shardmesh-shard serve --id shard-1 --bind 0.0.0.0:27117
//! ```
//!
//! ### Start an API node
//! ```bash
//! shardmesh-node serve --id api-1 --bind 0.0.0.0:7000 --secret s3cret
//! ```
//!
//! ### Bootstrap the cluster
//! ```bash
//! shardmesh init --node http://10.0.0.1:7000 --secret s3cret \
//!   --admin-user root --admin-password hunter2 \
//!   --public-addr 203.0.113.1 --private-addr 10.0.0.1 --port 7000 \
//!   --heartbeat-shard 203.0.113.50:10.0.0.50:27117:::0:master
//!
//! shardmesh members --node http://10.0.0.1:7000
//! ```
//!
//! ### Register data shards
//! Nodes only use data shards advertised on the heartbeat shards.
//! ```bash
//! shardmesh register-shard --node http://10.0.0.1:7000 \
//!   --admin-user root --admin-password hunter2 \
//!   203.0.113.10:10.0.0.10:27117:::0:master
//! ```

pub mod common;
pub mod data;
pub mod registry;
pub mod shard;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use data::{SequenceGenerator, ShardedDataOps};
pub use registry::{ApiNode, ClusterRegistry};
pub use shard::ShardServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
