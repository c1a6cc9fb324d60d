//! Common utilities and types shared across shardmesh

pub mod config;
pub mod dedupe;
pub mod descriptor;
pub mod error;
pub mod utils;

pub use config::{Config, NodeConfig, ShardConfig};
pub use dedupe::{dedupe_deep, dedupe_documents, merge_union, structural_eq};
pub use descriptor::{
    endpoints_match, Credentials, Endpoint, Health, Identity, ServiceDescriptor, ServiceKind,
};
pub use error::{Error, Result};
pub use utils::{decode_component, encode_component, parse_duration, timestamp_now_millis};
