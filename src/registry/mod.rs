//! Cluster registry: membership state and the tasks that keep it current
//!
//! - [`ClusterRegistry`]: the published membership snapshot
//! - [`ShardConnector`] and [`merge`]: probing shards and folding the
//!   results into the cached connections
//! - [`ClusterBootstrap`]: the one-time, secret-gated cluster init
//! - [`HeartbeatLoop`]: periodic rediscovery from the heartbeat shards
//! - [`register_service`]: admin-authenticated shard advertisement
//! - [`ApiNode`]: the node server tying these together

pub mod bootstrap;
pub mod connector;
pub mod heartbeat;
pub mod http;
pub mod reconcile;
pub mod server;
pub mod services;
pub mod state;

pub use bootstrap::{
    join_existing, verify_admin_password, BootstrapPhase, BootstrapReport, ClusterBootstrap,
    InitRequest, OneTimeSecret, ADMINS, SERVICES,
};
pub use connector::{ConnectionHandle, ConnectionStatus, ShardConnector};
pub use heartbeat::{HeartbeatLoop, HttpProber, NodeProber, TickOutcome, TickReport};
pub use reconcile::{merge, merge_restricted};
pub use server::ApiNode;
pub use services::{register_service, RegisterRequest};
pub use state::{keys, ClusterRegistry, MembershipSnapshot, ProcessState};
