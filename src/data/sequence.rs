//! Cluster-wide monotonic counters
//!
//! Each counter is one `{ id, value }` document in the `sequences`
//! collection of the authoritative data shard: the first connected master,
//! or the first connected shard when no master is up. Keys are chosen by
//! callers (`"video"`, `"KVID-42"`, ...) and share one namespace.

use crate::common::{Error, Identity, Result};
use crate::registry::connector::ConnectionHandle;
use crate::registry::state::ClusterRegistry;
use crate::shard::{Document, ShardClient};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const SEQUENCES: &str = "sequences";

/// Upper bound on draws in [`next_skipping_on`].
pub const MAX_SKIP_ATTEMPTS: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDocument {
    pub id: String,
    pub value: i64,
}

fn sequence_filter(key: &str) -> Document {
    let mut filter = Document::new();
    filter.insert("id".into(), Value::String(key.to_string()));
    filter
}

/// Advance `key` on one shard.
///
/// The first call creates the counter at `default_initial` and returns it;
/// later calls add `step` and return the new value. Creation and increment
/// are a single atomic shard operation.
pub async fn next_on(
    client: &dyn ShardClient,
    key: &str,
    default_initial: i64,
    step: i64,
) -> Result<i64> {
    let before = client
        .increment(SEQUENCES, &sequence_filter(key), "value", step, Some(default_initial))
        .await?;

    match before {
        None => Ok(default_initial),
        Some(doc) => {
            let seq: SequenceDocument = serde_json::from_value(Value::Object(doc))
                .map_err(|_| Error::SequenceCorrupted(key.to_string()))?;
            seq.value
                .checked_add(step)
                .ok_or_else(|| Error::SequenceCorrupted(key.to_string()))
        }
    }
}

/// Draw from `key` until the value is not in `eject`, giving up after
/// [`MAX_SKIP_ATTEMPTS`] draws.
pub async fn next_skipping_on(
    client: &dyn ShardClient,
    key: &str,
    eject: &[i64],
    default_initial: i64,
    step: i64,
) -> Result<i64> {
    for _ in 0..MAX_SKIP_ATTEMPTS {
        let value = next_on(client, key, default_initial, step).await?;
        if !eject.contains(&value) {
            return Ok(value);
        }
        tracing::debug!("Sequence {} skipped reserved value {}", key, value);
    }
    Err(Error::SequenceExhausted {
        key: key.to_string(),
        attempts: MAX_SKIP_ATTEMPTS,
    })
}

pub struct SequenceGenerator {
    registry: Arc<ClusterRegistry>,
}

impl SequenceGenerator {
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self { registry }
    }

    fn authoritative(&self) -> Result<ConnectionHandle> {
        let connections = self.registry.data_connections();
        connections
            .iter()
            .filter(|h| h.is_ok())
            .find(|h| h.descriptor().identity == Identity::Master)
            .or_else(|| connections.iter().find(|h| h.is_ok()))
            .cloned()
            .ok_or(Error::NoShards)
    }

    pub async fn next(&self, key: &str, default_initial: i64, step: i64) -> Result<i64> {
        let handle = self.authoritative()?;
        let client = handle.client().ok_or(Error::NoShards)?;
        next_on(client.as_ref(), key, default_initial, step).await
    }

    pub async fn next_skipping(
        &self,
        key: &str,
        eject: &[i64],
        default_initial: i64,
        step: i64,
    ) -> Result<i64> {
        let handle = self.authoritative()?;
        let client = handle.client().ok_or(Error::NoShards)?;
        next_skipping_on(client.as_ref(), key, eject, default_initial, step).await
    }
}
