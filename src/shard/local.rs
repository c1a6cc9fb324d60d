//! In-process shard driver
//!
//! Resolves `address:port` to a registered [`DocumentStore`]. Used when the
//! registry is embedded next to its shards, and as the shard fixture in tests.

use crate::common::{Credentials, Error, Result};
use crate::shard::client::{ConnectTarget, ShardClient, ShardDriver, ShardTransaction, StagedInserts};
use crate::shard::store::DocumentStore;
use crate::shard::Document;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

struct LocalEntry {
    store: Arc<DocumentStore>,
    credentials: Option<Credentials>,
}

#[derive(Default)]
pub struct LocalDriver {
    shards: RwLock<HashMap<String, LocalEntry>>,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh in-memory shard reachable at `address:port`.
    pub fn add_shard(&self, address: &str, port: u16) -> Arc<DocumentStore> {
        let store = Arc::new(DocumentStore::new_memory());
        self.register(address, port, store.clone(), None);
        store
    }

    /// Register an existing store, optionally requiring credentials.
    pub fn register(
        &self,
        address: &str,
        port: u16,
        store: Arc<DocumentStore>,
        credentials: Option<Credentials>,
    ) {
        if let Ok(mut shards) = self.shards.write() {
            shards.insert(
                format!("{}:{}", address, port),
                LocalEntry { store, credentials },
            );
        }
    }

    /// Make a shard unreachable for new connections.
    pub fn remove_shard(&self, address: &str, port: u16) -> Option<Arc<DocumentStore>> {
        self.shards
            .write()
            .ok()?
            .remove(&format!("{}:{}", address, port))
            .map(|e| e.store)
    }
}

#[async_trait]
impl ShardDriver for LocalDriver {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn ShardClient>> {
        let endpoint = target.endpoint();
        let shards = self
            .shards
            .read()
            .map_err(|_| Error::Internal("local driver lock poisoned".into()))?;
        let entry = shards
            .get(&endpoint)
            .ok_or_else(|| Error::ConnectionFailed(format!("{} is unreachable", endpoint)))?;

        if let Some(required) = &entry.credentials {
            if target.credentials.as_ref() != Some(required) {
                return Err(Error::Unauthorized(format!("bad credentials for {}", endpoint)));
            }
        }

        Ok(Arc::new(LocalShard {
            endpoint,
            database: target.database.clone(),
            store: entry.store.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct LocalShard {
    endpoint: String,
    database: String,
    store: Arc<DocumentStore>,
    closed: AtomicBool,
}

impl LocalShard {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed(format!(
                "connection to {} is closed",
                self.endpoint
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ShardClient for LocalShard {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn ping(&self) -> Result<()> {
        self.check_open()
    }

    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        self.check_open()?;
        self.store.find(&self.database, collection, filter)
    }

    async fn begin(&self) -> Result<Box<dyn ShardTransaction>> {
        self.check_open()?;
        Ok(Box::new(LocalTransaction {
            store: self.store.clone(),
            database: self.database.clone(),
            staged: StagedInserts::default(),
        }))
    }

    async fn increment(
        &self,
        collection: &str,
        filter: &Document,
        field: &str,
        step: i64,
        upsert_initial: Option<i64>,
    ) -> Result<Option<Document>> {
        self.check_open()?;
        self.store
            .increment(&self.database, collection, filter, field, step, upsert_initial)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Closed local connection to {}", self.endpoint);
        }
    }
}

struct LocalTransaction {
    store: Arc<DocumentStore>,
    database: String,
    staged: StagedInserts,
}

#[async_trait]
impl ShardTransaction for LocalTransaction {
    async fn insert(&mut self, collection: &str, document: Document) -> Result<()> {
        self.staged.push(collection, document)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.store.commit(&this.database, this.staged.take())?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
