//! Periodic discovery and membership reconciliation
//!
//! Every tick re-reads the `services` collection from the heartbeat shards,
//! probes what it finds and installs a fresh [`MembershipSnapshot`].

use crate::common::{dedupe_documents, Health, Result, ServiceDescriptor, ServiceKind};
use crate::registry::bootstrap::SERVICES;
use crate::registry::connector::{ConnectionHandle, ShardConnector};
use crate::registry::reconcile::merge;
use crate::registry::state::{ClusterRegistry, MembershipSnapshot};
use crate::shard::Document;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Liveness check for API nodes.
#[async_trait]
pub trait NodeProber: Send + Sync {
    async fn probe(&self, node: &ServiceDescriptor) -> bool;
}

/// Probes `GET /health` on the node.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeProber for HttpProber {
    async fn probe(&self, node: &ServiceDescriptor) -> bool {
        let Some(addr) = node.dial_addr() else {
            return false;
        };
        let url = format!("http://{}:{}/health", addr, node.port);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("Health ping to {} failed: {}", url, e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub generation: u64,
    pub api_nodes_up: usize,
    pub api_nodes_down: usize,
    pub data_connected: usize,
    pub heartbeat_connected: usize,
    /// `services` documents that did not parse as descriptors
    pub invalid_documents: usize,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Another tick was still running
    Skipped,
    /// No heartbeat shard answered; discovered membership stays as it was
    /// and only the heartbeat connections are reconciled
    Kept,
    Installed(TickReport),
}

/// What one round of `services` reads produced
struct ServicesRead {
    /// Deduplicated documents; `None` when no source answered
    documents: Option<Vec<Document>>,
    /// Cached sources whose read failed
    failed: Vec<ConnectionHandle>,
}

/// Clears the in-progress flag when the tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Keep one descriptor per endpoint and kind, the most recently edited.
fn collapse(descriptors: Vec<ServiceDescriptor>) -> Vec<ServiceDescriptor> {
    let mut out: Vec<ServiceDescriptor> = Vec::with_capacity(descriptors.len());
    for d in descriptors {
        match out
            .iter_mut()
            .find(|kept| kept.kind == d.kind && kept.same_endpoint(&d))
        {
            Some(kept) if d.last_edit > kept.last_edit => *kept = d,
            Some(_) => {}
            None => out.push(d),
        }
    }
    out
}

/// Set health from the probe: up if a good handle matches, down if only
/// broken ones do, unchanged otherwise.
fn apply_health(descriptors: &mut [ServiceDescriptor], probed: &[ConnectionHandle]) {
    for d in descriptors.iter_mut() {
        let matching: Vec<&ConnectionHandle> = probed
            .iter()
            .filter(|h| h.descriptor().same_endpoint(d))
            .collect();
        if matching.iter().any(|h| h.is_ok()) {
            d.health = Health::Up;
        } else if !matching.is_empty() {
            d.health = Health::Down;
        }
    }
}

pub struct HeartbeatLoop {
    registry: Arc<ClusterRegistry>,
    connector: ShardConnector,
    prober: Arc<dyn NodeProber>,
    database: String,
    interval: Duration,
    in_progress: AtomicBool,
}

impl HeartbeatLoop {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        connector: ShardConnector,
        prober: Arc<dyn NodeProber>,
        database: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            prober,
            database: database.into(),
            interval,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Connect, treating an empty or unusable list as "no probe results".
    async fn probe_shards(&self, descriptors: &[ServiceDescriptor]) -> Vec<ConnectionHandle> {
        let targets: Vec<ServiceDescriptor> = descriptors
            .iter()
            .filter(|d| d.health != Health::Down)
            .cloned()
            .collect();
        if targets.is_empty() {
            return Vec::new();
        }
        match self.connector.connect(&targets, &self.database).await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::warn!("Shard probe skipped: {}", e);
                Vec::new()
            }
        }
    }

    /// Fresh connections to every known heartbeat shard, including ones
    /// marked down by an earlier tick.
    async fn connect_known(&self, known: &[ServiceDescriptor]) -> Vec<ConnectionHandle> {
        let retry: Vec<ServiceDescriptor> = known
            .iter()
            .cloned()
            .map(|mut d| {
                d.health = Health::Pending;
                d
            })
            .collect();
        self.probe_shards(&retry)
            .await
            .into_iter()
            .filter(|h| h.is_ok())
            .collect()
    }

    /// Read `services` from every source. Sources that fail the read come
    /// back as error handles so the reconciler can retire them.
    async fn read_services(&self, sources: &[ConnectionHandle]) -> ServicesRead {
        let empty = Document::new();
        let results = join_all(sources.iter().map(|h| {
            let empty = &empty;
            async move {
                let Some(client) = h.client() else {
                    return Err(ConnectionHandle::failed(
                        h.descriptor().clone(),
                        "not connected",
                    ));
                };
                client.find(SERVICES, empty).await.map_err(|e| {
                    tracing::warn!("Reading services from {} failed: {}", h.endpoint(), e);
                    ConnectionHandle::failed(h.descriptor().clone(), e)
                })
            }
        }))
        .await;

        let mut batches: Vec<Vec<Document>> = Vec::new();
        let mut failed = Vec::new();
        for result in results {
            match result {
                Ok(docs) => batches.push(
                    docs.into_iter()
                        .map(|mut d| {
                            d.remove("_id");
                            d
                        })
                        .collect(),
                ),
                Err(handle) => failed.push(handle),
            }
        }
        let documents = if batches.is_empty() {
            None
        } else {
            Some(dedupe_documents(batches))
        };
        ServicesRead { documents, failed }
    }

    /// Read from the cached heartbeat connections, falling back to fresh
    /// connections to the known heartbeat shards when none of them answers.
    async fn discover(&self, previous: &MembershipSnapshot) -> ServicesRead {
        let cached: Vec<ConnectionHandle> = previous
            .heartbeat_connections
            .iter()
            .filter(|h| h.is_ok())
            .cloned()
            .collect();
        let mut read = self.read_services(&cached).await;
        if read.documents.is_some() {
            return read;
        }

        let fresh = self.connect_known(&previous.heartbeat_shards).await;
        if !fresh.is_empty() {
            tracing::info!("Cached heartbeat connections silent, reading through fresh ones");
            read.documents = self.read_services(&fresh).await.documents;
            for handle in &fresh {
                handle.close().await;
            }
        }
        read
    }

    /// Probe the heartbeat shards and fold the result, plus any source that
    /// failed its read, into the cached connections.
    async fn reconcile_heartbeat_shards(
        &self,
        shards: &mut [ServiceDescriptor],
        cached: Vec<ConnectionHandle>,
        failed_reads: Vec<ConnectionHandle>,
    ) -> Vec<ConnectionHandle> {
        let mut probed = self.probe_shards(shards).await;
        probed.extend(failed_reads);
        apply_health(shards, &probed);
        merge(cached, probed).await
    }

    /// Run one discovery and reconciliation pass.
    pub async fn tick(&self) -> Result<TickOutcome> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            tracing::debug!("Heartbeat tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        }
        let _guard = TickGuard(&self.in_progress);
        let _updates = self.registry.lock_updates().await;

        let previous = self.registry.snapshot();
        let ServicesRead { documents, failed } = self.discover(&previous).await;

        // Heartbeat shards known locally stay known even if nobody advertised them.
        let known_heartbeat = previous.heartbeat_shards.iter().cloned().map(|mut d| {
            d.health = Health::Pending;
            d
        });

        let Some(documents) = documents else {
            tracing::warn!("No heartbeat shard reachable, keeping current membership");
            let mut heartbeat_shards: Vec<ServiceDescriptor> = known_heartbeat.collect();
            let heartbeat_connections = self
                .reconcile_heartbeat_shards(
                    &mut heartbeat_shards,
                    previous.heartbeat_connections,
                    failed,
                )
                .await;
            self.registry.install(MembershipSnapshot {
                heartbeat_shards,
                heartbeat_connections,
                api_nodes: previous.api_nodes,
                data_shards: previous.data_shards,
                data_connections: previous.data_connections,
            });
            return Ok(TickOutcome::Kept);
        };

        let mut invalid_documents = 0;
        let mut discovered = Vec::with_capacity(documents.len());
        for doc in &documents {
            match ServiceDescriptor::from_document(doc) {
                Ok(d) => discovered.push(d),
                Err(e) => {
                    invalid_documents += 1;
                    tracing::warn!("Skipping invalid service document: {}", e);
                }
            }
        }
        discovered.extend(known_heartbeat);
        let discovered = collapse(discovered);

        let of_kind = |kind: ServiceKind| -> Vec<ServiceDescriptor> {
            discovered.iter().filter(|d| d.kind == kind).cloned().collect()
        };
        let mut api_nodes = of_kind(ServiceKind::ApiNode);
        let mut data_shards = of_kind(ServiceKind::DataShard);
        let mut heartbeat_shards = of_kind(ServiceKind::HeartbeatShard);

        let prober = &self.prober;
        let (health, data_probe, heartbeat_connections) = tokio::join!(
            join_all(api_nodes.iter().map(|n| prober.probe(n))),
            self.probe_shards(&data_shards),
            self.reconcile_heartbeat_shards(
                &mut heartbeat_shards,
                previous.heartbeat_connections,
                failed,
            ),
        );

        for (node, up) in api_nodes.iter_mut().zip(health) {
            node.health = if up { Health::Up } else { Health::Down };
        }
        apply_health(&mut data_shards, &data_probe);

        let data_connections = merge(previous.data_connections, data_probe).await;

        let api_nodes_up = api_nodes.iter().filter(|n| n.health == Health::Up).count();
        let mut report = TickReport {
            generation: 0,
            api_nodes_up,
            api_nodes_down: api_nodes.len() - api_nodes_up,
            data_connected: data_connections.iter().filter(|h| h.is_ok()).count(),
            heartbeat_connected: heartbeat_connections.iter().filter(|h| h.is_ok()).count(),
            invalid_documents,
        };

        report.generation = self.registry.install(MembershipSnapshot {
            api_nodes,
            data_shards,
            heartbeat_shards,
            data_connections,
            heartbeat_connections,
        });

        tracing::info!(
            "Heartbeat generation {}: {} api nodes up, {} down; {} data and {} heartbeat shards connected",
            report.generation,
            report.api_nodes_up,
            report.api_nodes_down,
            report.data_connected,
            report.heartbeat_connected
        );
        Ok(TickOutcome::Installed(report))
    }

    /// Spawn the repeating task. Abort the handle to stop it.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!("Heartbeat loop started (every {:?})", self.interval);

            loop {
                ticker.tick().await;
                if let Err(e) = self.tick().await {
                    tracing::error!("Heartbeat tick failed: {}", e);
                }
            }
        })
    }
}
