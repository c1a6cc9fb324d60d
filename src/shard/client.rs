//! Transport seam between the registry and the shards
//!
//! Everything above this module talks to shards through these traits, so the
//! registry works the same against in-process stores and remote shard servers.

use crate::common::{Credentials, Result};
use crate::shard::store::InsertOp;
use crate::shard::Document;
use async_trait::async_trait;
use std::sync::Arc;

/// Where and how to open one shard connection
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub address: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub database: String,
}

impl ConnectTarget {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[async_trait]
pub trait ShardDriver: Send + Sync {
    /// Open and verify a connection; fails if the shard is unreachable or
    /// rejects the credentials.
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn ShardClient>>;
}

#[async_trait]
pub trait ShardClient: Send + Sync {
    fn endpoint(&self) -> String;

    async fn ping(&self) -> Result<()>;

    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>>;

    /// Open a transaction scope on this shard.
    async fn begin(&self) -> Result<Box<dyn ShardTransaction>>;

    /// Atomically add `step` to `field` on the first document matching
    /// `filter`, returning the pre-image. See
    /// [`DocumentStore::increment`](crate::shard::DocumentStore::increment)
    /// for the upsert rule.
    async fn increment(
        &self,
        collection: &str,
        filter: &Document,
        field: &str,
        step: i64,
        upsert_initial: Option<i64>,
    ) -> Result<Option<Document>>;

    async fn close(&self);
}

#[async_trait]
pub trait ShardTransaction: Send {
    async fn insert(&mut self, collection: &str, document: Document) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Client-side buffer of inserts, flushed as one batch on commit.
#[derive(Debug, Default)]
pub struct StagedInserts {
    ops: Vec<InsertOp>,
}

impl StagedInserts {
    pub fn push(&mut self, collection: &str, document: Document) -> Result<()> {
        if collection.is_empty() {
            return Err(crate::Error::InvalidConfig("collection name is empty".into()));
        }
        self.ops.push(InsertOp {
            collection: collection.to_string(),
            document,
        });
        Ok(())
    }

    pub fn take(self) -> Vec<InsertOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
