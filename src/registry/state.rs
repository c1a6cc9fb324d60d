//! Process-wide state and the cluster membership registry
//!
//! [`ProcessState`] is a type-erased key/value store. [`ClusterRegistry`]
//! owns one and publishes membership under the well-known [`keys`]. Writers
//! always install complete new values; nothing stored is ever edited in
//! place, so a reader holding an `Arc` keeps a consistent view while the
//! next snapshot is installed.

use crate::common::ServiceDescriptor;
use crate::registry::connector::ConnectionHandle;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Keys under which membership is published.
pub mod keys {
    pub const API_NODES: &str = "cluster.api_nodes";
    pub const DATA_SHARDS: &str = "cluster.data_shards";
    pub const HEARTBEAT_SHARDS: &str = "cluster.heartbeat_shards";
    pub const DATA_CONNECTIONS: &str = "cluster.data_connections";
    pub const HEARTBEAT_CONNECTIONS: &str = "cluster.heartbeat_connections";
    pub const GENERATION: &str = "cluster.generation";
}

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct ProcessState {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ProcessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.set_many(vec![(key.to_string(), Arc::new(value) as Entry)]);
    }

    /// Install several values under one write lock.
    pub fn set_many(&self, values: Vec<(String, Entry)>) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (key, value) in values {
            entries.insert(key, value);
        }
    }

    /// Returns `None` when the key is absent or holds a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(key).cloned()?.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        match self.entries.read() {
            Ok(guard) => guard.contains_key(key),
            Err(poisoned) => poisoned.into_inner().contains_key(key),
        }
    }
}

/// The three membership lists plus the live connections behind them.
#[derive(Debug, Clone, Default)]
pub struct MembershipSnapshot {
    pub api_nodes: Vec<ServiceDescriptor>,
    pub data_shards: Vec<ServiceDescriptor>,
    pub heartbeat_shards: Vec<ServiceDescriptor>,
    pub data_connections: Vec<ConnectionHandle>,
    pub heartbeat_connections: Vec<ConnectionHandle>,
}

pub struct ClusterRegistry {
    state: ProcessState,
    generation: AtomicU64,
    updates: tokio::sync::Mutex<()>,
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterRegistry {
    /// Registry with empty membership (generation 0).
    pub fn new() -> Self {
        let registry = Self {
            state: ProcessState::new(),
            generation: AtomicU64::new(0),
            updates: tokio::sync::Mutex::new(()),
        };
        registry.publish(MembershipSnapshot::default(), 0);
        registry
    }

    /// Underlying key/value store, for collaborators reading [`keys`].
    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    fn publish(&self, snapshot: MembershipSnapshot, generation: u64) {
        self.state.set_many(vec![
            (keys::API_NODES.into(), Arc::new(snapshot.api_nodes) as Entry),
            (keys::DATA_SHARDS.into(), Arc::new(snapshot.data_shards) as Entry),
            (
                keys::HEARTBEAT_SHARDS.into(),
                Arc::new(snapshot.heartbeat_shards) as Entry,
            ),
            (
                keys::DATA_CONNECTIONS.into(),
                Arc::new(snapshot.data_connections) as Entry,
            ),
            (
                keys::HEARTBEAT_CONNECTIONS.into(),
                Arc::new(snapshot.heartbeat_connections) as Entry,
            ),
            (keys::GENERATION.into(), Arc::new(generation) as Entry),
        ]);
    }

    /// Serializes read-modify-install sequences. Hold the guard from taking
    /// the previous [`snapshot`](Self::snapshot) until the new one is
    /// installed so concurrent writers cannot overwrite each other.
    pub async fn lock_updates(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.updates.lock().await
    }

    /// Replace the whole membership; returns the new generation.
    pub fn install(&self, snapshot: MembershipSnapshot) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            "Installing membership generation {}: {} api nodes, {} data shards ({} connected), {} heartbeat shards ({} connected)",
            generation,
            snapshot.api_nodes.len(),
            snapshot.data_shards.len(),
            snapshot.data_connections.len(),
            snapshot.heartbeat_shards.len(),
            snapshot.heartbeat_connections.len(),
        );
        self.publish(snapshot, generation);
        generation
    }

    fn list<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Arc<Vec<T>> {
        self.state
            .get::<Vec<T>>(key)
            .unwrap_or_else(|| Arc::new(Vec::new()))
    }

    pub fn generation(&self) -> u64 {
        self.state
            .get::<u64>(keys::GENERATION)
            .map(|g| *g)
            .unwrap_or(0)
    }

    pub fn api_nodes(&self) -> Arc<Vec<ServiceDescriptor>> {
        self.list(keys::API_NODES)
    }

    pub fn data_shards(&self) -> Arc<Vec<ServiceDescriptor>> {
        self.list(keys::DATA_SHARDS)
    }

    pub fn heartbeat_shards(&self) -> Arc<Vec<ServiceDescriptor>> {
        self.list(keys::HEARTBEAT_SHARDS)
    }

    /// Current data-shard connections. Fetch right before use; do not hold
    /// across a reconciliation.
    pub fn data_connections(&self) -> Arc<Vec<ConnectionHandle>> {
        self.list(keys::DATA_CONNECTIONS)
    }

    pub fn heartbeat_connections(&self) -> Arc<Vec<ConnectionHandle>> {
        self.list(keys::HEARTBEAT_CONNECTIONS)
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        MembershipSnapshot {
            api_nodes: self.api_nodes().to_vec(),
            data_shards: self.data_shards().to_vec(),
            heartbeat_shards: self.heartbeat_shards().to_vec(),
            data_connections: self.data_connections().to_vec(),
            heartbeat_connections: self.heartbeat_connections().to_vec(),
        }
    }
}
