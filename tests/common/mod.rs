//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use shardmesh::common::{Result, ServiceDescriptor, ServiceKind};
use shardmesh::registry::ConnectionHandle;
use shardmesh::shard::{
    ConnectTarget, Document, DocumentStore, LocalDriver, ShardClient, ShardDriver, ShardTransaction,
};
use shardmesh::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const DB: &str = "testdb";

pub fn data_shard(private: &str, port: u16) -> ServiceDescriptor {
    ServiceDescriptor::parse_packed(
        &format!("pub-{}:{}:{}:::0:master", private, private, port),
        ServiceKind::DataShard,
    )
    .unwrap()
}

pub fn doc(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

/// Client wrapper that counts closes and can be told to fail commits.
pub struct FaultyClient {
    inner: Arc<dyn ShardClient>,
    fail_commit: bool,
    pub closes: AtomicUsize,
}

impl FaultyClient {
    pub fn wrap(inner: Arc<dyn ShardClient>, fail_commit: bool) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_commit,
            closes: AtomicUsize::new(0),
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShardClient for FaultyClient {
    fn endpoint(&self) -> String {
        self.inner.endpoint()
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        self.inner.find(collection, filter).await
    }

    async fn begin(&self) -> Result<Box<dyn ShardTransaction>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyTransaction {
            inner,
            endpoint: self.endpoint(),
            fail_commit: self.fail_commit,
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
        self.inner
            .increment(collection, filter, field, step, upsert_initial)
            .await
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await;
    }
}

struct FaultyTransaction {
    inner: Box<dyn ShardTransaction>,
    endpoint: String,
    fail_commit: bool,
}

#[async_trait]
impl ShardTransaction for FaultyTransaction {
    async fn insert(&mut self, collection: &str, document: Document) -> Result<()> {
        self.inner.insert(collection, document).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        if this.fail_commit {
            this.inner.abort().await?;
            return Err(Error::Shard {
                endpoint: this.endpoint,
                reason: "write conflict".into(),
            });
        }
        this.inner.commit().await
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.inner.abort().await
    }
}

/// A local shard plus an ok handle to it, wrapped for fault injection.
pub struct Fixture {
    pub store: Arc<DocumentStore>,
    pub client: Arc<FaultyClient>,
    pub handle: ConnectionHandle,
}

pub async fn fixture(driver: &LocalDriver, private: &str, port: u16, fail_commit: bool) -> Fixture {
    let store = driver.add_shard(private, port);
    let inner = driver
        .connect(&ConnectTarget {
            address: private.to_string(),
            port,
            credentials: None,
            database: DB.to_string(),
        })
        .await
        .unwrap();
    let client = FaultyClient::wrap(inner, fail_commit);
    let handle = ConnectionHandle::ok(data_shard(private, port), client.clone());
    Fixture {
        store,
        client,
        handle,
    }
}
