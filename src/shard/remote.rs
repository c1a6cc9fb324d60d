//! HTTP shard driver: talks to `shardmesh-shard` servers

use crate::common::{Credentials, Error, Result};
use crate::shard::client::{ConnectTarget, ShardClient, ShardDriver, ShardTransaction, StagedInserts};
use crate::shard::http::{
    CommitRequest, CommitResponse, FindRequest, FindResponse, IncrementRequest, IncrementResponse,
};
use crate::shard::Document;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    /// `timeout` bounds every request, including the connect-time ping.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ShardDriver for HttpDriver {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn ShardClient>> {
        let shard = HttpShard {
            inner: Arc::new(HttpShardInner {
                client: self.client.clone(),
                base: format!("http://{}:{}/db/{}", target.address, target.port, target.database),
                endpoint: target.endpoint(),
                credentials: target.credentials.clone(),
                closed: AtomicBool::new(false),
            }),
        };
        shard.ping().await?;
        Ok(Arc::new(shard))
    }
}

struct HttpShardInner {
    client: reqwest::Client,
    base: String,
    endpoint: String,
    credentials: Option<Credentials>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct HttpShard {
    inner: Arc<HttpShardInner>,
}

impl HttpShard {
    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed(format!(
                "connection to {} is closed",
                self.inner.endpoint
            )));
        }

        let mut request = self
            .inner
            .client
            .post(format!("{}{}", self.inner.base, path))
            .json(body);
        if let Some(c) = &self.inner.credentials {
            request = request.basic_auth(&c.username, Some(&c.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized(format!(
                "{} rejected credentials",
                self.inner.endpoint
            )));
        }
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(Error::Shard {
                endpoint: self.inner.endpoint.clone(),
                reason: format!("{}: {}", status, reason),
            });
        }
        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl ShardClient for HttpShard {
    fn endpoint(&self) -> String {
        self.inner.endpoint.clone()
    }

    async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self.post("/ping", &serde_json::json!({})).await?;
        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        let body = FindRequest {
            filter: filter.clone(),
        };
        let resp: FindResponse = self.post(&format!("/{}/find", collection), &body).await?;
        Ok(resp.documents)
    }

    async fn begin(&self) -> Result<Box<dyn ShardTransaction>> {
        Ok(Box::new(HttpTransaction {
            shard: self.clone(),
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
        let body = IncrementRequest {
            filter: filter.clone(),
            field: field.to_string(),
            step,
            upsert_initial,
        };
        let resp: IncrementResponse = self
            .post(&format!("/{}/increment", collection), &body)
            .await?;
        Ok(resp.document)
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// Inserts are buffered locally and sent as one atomic commit request.
struct HttpTransaction {
    shard: HttpShard,
    staged: StagedInserts,
}

#[async_trait]
impl ShardTransaction for HttpTransaction {
    async fn insert(&mut self, collection: &str, document: Document) -> Result<()> {
        self.staged.push(collection, document)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        if this.staged.is_empty() {
            return Ok(());
        }
        let body = CommitRequest {
            ops: this.staged.take(),
        };
        let resp: CommitResponse = this.shard.post("/commit", &body).await?;
        tracing::trace!("{} accepted {} documents", this.shard.endpoint(), resp.inserted);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
