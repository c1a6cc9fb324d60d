//! Shard side of the cluster
//!
//! - Document storage ([`DocumentStore`])
//! - The driver traits the registry talks through
//! - In-process ([`LocalDriver`]) and HTTP ([`HttpDriver`]) drivers
//! - The standalone shard server

pub mod client;
pub mod http;
pub mod local;
pub mod remote;
pub mod server;
pub mod store;

/// A stored document: one JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

pub use client::{ConnectTarget, ShardClient, ShardDriver, ShardTransaction};
pub use local::LocalDriver;
pub use remote::HttpDriver;
pub use server::ShardServer;
pub use store::{CollectionBackend, DocumentStore, InsertOp};
