//! Scatter-gather reads and broadcast writes over shard connections
//!
//! Per-shard failures are caught and turned into per-target results; a
//! multi-shard call always completes. Broadcast writes are transactional per
//! shard only: when some shards accept and others do not, nothing is rolled
//! back and the outcome reports which endpoints hold the write.

use crate::common::{dedupe_documents, Error, Result};
use crate::registry::connector::ConnectionHandle;
use crate::registry::state::ClusterRegistry;
use crate::shard::store::ensure_id;
use crate::shard::Document;
use futures_util::future::join_all;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Which shards accepted a broadcast write.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl BroadcastOutcome {
    /// True when at least one shard was targeted and every shard accepted.
    pub fn all_accepted(&self) -> bool {
        self.failed.is_empty() && !self.succeeded.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && !self.succeeded.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.all_accepted() {
            Ok(())
        } else if self.succeeded.is_empty() && self.failed.is_empty() {
            Err(Error::NoShards)
        } else {
            Err(Error::PartialBroadcast {
                succeeded: self.succeeded,
                failed: self.failed,
            })
        }
    }

    /// Fold item-level outcomes: a shard counts as failed if it rejected any item.
    fn fold(items: Vec<BroadcastOutcome>) -> BroadcastOutcome {
        let mut failed: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for item in &items {
            for endpoint in &item.failed {
                if !failed.contains(endpoint) {
                    failed.push(endpoint.clone());
                }
            }
            for endpoint in item.succeeded.iter().chain(&item.failed) {
                if !seen.contains(endpoint) {
                    seen.push(endpoint.clone());
                }
            }
        }
        let succeeded = seen.into_iter().filter(|e| !failed.contains(e)).collect();
        BroadcastOutcome { succeeded, failed }
    }
}

/// Insert one document into one shard inside a transaction scope.
pub async fn write_one(handle: &ConnectionHandle, collection: &str, document: Document) -> Result<()> {
    let client = handle.client().ok_or_else(|| {
        Error::ConnectionFailed(format!("no live connection to {}", handle.endpoint()))
    })?;

    let mut txn = client.begin().await?;
    if let Err(e) = txn.insert(collection, document).await {
        if let Err(abort_err) = txn.abort().await {
            tracing::warn!("Abort on {} failed: {}", handle.endpoint(), abort_err);
        }
        return Err(e);
    }
    txn.commit().await
}

/// Insert the same document into every shard, independently per shard.
///
/// The document gets its `_id` before the fan-out so all replicas share it.
pub async fn broadcast_insert(
    handles: &[ConnectionHandle],
    collection: &str,
    document: &Document,
) -> BroadcastOutcome {
    let mut document = document.clone();
    ensure_id(&mut document);

    if handles.is_empty() {
        tracing::warn!("Broadcast to {} skipped: no shard connections", collection);
        return BroadcastOutcome::default();
    }

    let results = join_all(handles.iter().map(|h| {
        let doc = document.clone();
        async move { (h.endpoint(), write_one(h, collection, doc).await) }
    }))
    .await;

    let mut outcome = BroadcastOutcome::default();
    for (endpoint, result) in results {
        match result {
            Ok(()) => outcome.succeeded.push(endpoint),
            Err(e) => {
                tracing::warn!("Write to {} on {} failed: {}", collection, endpoint, e);
                outcome.failed.push(endpoint);
            }
        }
    }

    if outcome.is_partial() {
        tracing::warn!(
            "Partial broadcast to {}: accepted by [{}], rejected by [{}]; manual reconciliation required",
            collection,
            outcome.succeeded.join(", "),
            outcome.failed.join(", ")
        );
    }
    outcome
}

/// Broadcast each item on its own; overall success needs every item on every shard.
pub async fn broadcast_insert_many(
    handles: &[ConnectionHandle],
    collection: &str,
    documents: &[Document],
) -> BroadcastOutcome {
    if documents.is_empty() {
        return BroadcastOutcome {
            succeeded: handles.iter().map(ConnectionHandle::endpoint).collect(),
            failed: Vec::new(),
        };
    }
    let items = join_all(
        documents
            .iter()
            .map(|doc| broadcast_insert(handles, collection, doc)),
    )
    .await;
    BroadcastOutcome::fold(items)
}

/// Filtered query against exactly one shard. A missing handle, a missing
/// collection name or a failed query all yield an empty result.
pub async fn read_one(
    handle: Option<&ConnectionHandle>,
    collection: &str,
    filter: &Document,
) -> Vec<Document> {
    let Some(handle) = handle else {
        return Vec::new();
    };
    if collection.is_empty() {
        return Vec::new();
    }
    let Some(client) = handle.client() else {
        return Vec::new();
    };

    match client.find(collection, filter).await {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!("Read of {} on {} failed: {}", collection, handle.endpoint(), e);
            Vec::new()
        }
    }
}

fn pick_index(len: usize) -> usize {
    rand::thread_rng().gen_range(0..len)
}

/// Query shards in random order without replacement; stop at the first
/// non-empty answer. Only meaningful for fully replicated data.
pub async fn read_any(
    handles: &[ConnectionHandle],
    collection: &str,
    filter: &Document,
) -> Vec<Document> {
    let mut remaining: Vec<usize> = (0..handles.len()).collect();
    while !remaining.is_empty() {
        let index = remaining.swap_remove(pick_index(remaining.len()));
        let docs = read_one(handles.get(index), collection, filter).await;
        if !docs.is_empty() {
            return docs;
        }
    }
    Vec::new()
}

/// Query every shard concurrently and collapse replicated documents.
pub async fn read_all_deduped(
    handles: &[ConnectionHandle],
    collection: &str,
    filter: &Document,
) -> Vec<Document> {
    let batches = join_all(handles.iter().map(|h| read_one(Some(h), collection, filter))).await;
    dedupe_documents(batches)
}

/// Atomically add `step` to `field` of the document whose `_id` is `id`,
/// returning the document before the change.
pub async fn increment_by_key(
    handle: Option<&ConnectionHandle>,
    collection: &str,
    id: &str,
    field: &str,
    step: i64,
) -> Result<Option<Document>> {
    let handle = handle.ok_or(Error::NoShards)?;
    let client = handle.client().ok_or_else(|| {
        Error::ConnectionFailed(format!("no live connection to {}", handle.endpoint()))
    })?;
    let mut filter = Document::new();
    filter.insert("_id".into(), Value::String(id.to_string()));
    client.increment(collection, &filter, field, step, None).await
}

/// Data operations over whatever data shards the registry currently holds.
///
/// Every call re-reads the connection list from the registry.
#[derive(Clone)]
pub struct ShardedDataOps {
    registry: Arc<ClusterRegistry>,
}

impl ShardedDataOps {
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self { registry }
    }

    fn live(&self) -> Vec<ConnectionHandle> {
        self.registry
            .data_connections()
            .iter()
            .filter(|h| h.is_ok())
            .cloned()
            .collect()
    }

    /// True only when every data shard accepted the write.
    pub async fn write_all(&self, collection: &str, document: &Document) -> bool {
        broadcast_insert(&self.live(), collection, document)
            .await
            .all_accepted()
    }

    pub async fn write_all_many(&self, collection: &str, documents: &[Document]) -> bool {
        broadcast_insert_many(&self.live(), collection, documents)
            .await
            .all_accepted()
    }

    /// Query the data shard at `endpoint` (`addr:port`), if connected.
    pub async fn read_one(&self, endpoint: &str, collection: &str, filter: &Document) -> Vec<Document> {
        let live = self.live();
        read_one(live.iter().find(|h| h.endpoint() == endpoint), collection, filter).await
    }

    pub async fn read_any(&self, collection: &str, filter: &Document) -> Vec<Document> {
        read_any(&self.live(), collection, filter).await
    }

    pub async fn read_all_deduped(&self, collection: &str, filter: &Document) -> Vec<Document> {
        read_all_deduped(&self.live(), collection, filter).await
    }

    /// Increment on the shard at `endpoint` (`addr:port`).
    pub async fn increment_by_key(
        &self,
        endpoint: &str,
        collection: &str,
        id: &str,
        field: &str,
        step: i64,
    ) -> Result<Option<Document>> {
        let live = self.live();
        increment_by_key(
            live.iter().find(|h| h.endpoint() == endpoint),
            collection,
            id,
            field,
            step,
        )
        .await
    }
}
