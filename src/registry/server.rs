//! API node server

use crate::common::{NodeConfig, Result, ServiceDescriptor};
use crate::registry::bootstrap::{join_existing, ClusterBootstrap, OneTimeSecret};
use crate::registry::connector::ShardConnector;
use crate::registry::heartbeat::{HeartbeatLoop, HttpProber};
use crate::registry::http::{create_router, NodeState};
use crate::registry::state::ClusterRegistry;
use crate::shard::{HttpDriver, ShardDriver};
use std::sync::Arc;

pub struct ApiNode {
    config: NodeConfig,
    node_id: String,
    registry: Arc<ClusterRegistry>,
}

impl ApiNode {
    pub fn new(config: NodeConfig, node_id: String) -> Self {
        Self {
            config,
            node_id,
            registry: Arc::new(ClusterRegistry::new()),
        }
    }

    /// Registry this node publishes membership into.
    pub fn registry(&self) -> Arc<ClusterRegistry> {
        self.registry.clone()
    }

    fn secret(&self) -> OneTimeSecret {
        match self.config.init_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => OneTimeSecret::new(secret),
            None => {
                let (secret, value) = OneTimeSecret::generate();
                tracing::warn!("No init secret configured, generated one: {}", value);
                secret
            }
        }
    }

    fn local_descriptor(&self) -> Option<ServiceDescriptor> {
        let public = self.config.public_addr.as_deref()?;
        Some(ServiceDescriptor::api_node(
            public,
            self.config.private_addr.as_deref(),
            self.config.bind_addr.port(),
        ))
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        tracing::info!("Starting API node: {}", self.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Database: {}", self.config.database);

        let driver: Arc<dyn ShardDriver> = Arc::new(HttpDriver::new(self.config.connect_timeout())?);
        let connector = || ShardConnector::new(driver.clone(), self.config.connect_timeout());

        if !self.config.join_heartbeat_shards.is_empty() {
            if let Err(e) = join_existing(
                &self.registry,
                &connector(),
                &self.config.database,
                &self.config.join_heartbeat_shards,
                self.local_descriptor(),
            )
            .await
            {
                tracing::warn!("Could not join cluster at startup: {}", e);
            }
        }

        let bootstrap = ClusterBootstrap::new(
            self.secret(),
            self.registry.clone(),
            connector(),
            self.config.database.clone(),
            self.config.settle_delay(),
        );

        let heartbeat = Arc::new(HeartbeatLoop::new(
            self.registry.clone(),
            connector(),
            Arc::new(HttpProber::new(self.config.probe_timeout())?),
            self.config.database.clone(),
            self.config.heartbeat_interval(),
        ));
        let heartbeat_task = heartbeat.start();

        let router = create_router(NodeState {
            node_id: self.node_id.clone(),
            registry: self.registry.clone(),
            bootstrap: Arc::new(bootstrap),
        });

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ API node ready");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down API node");
            })
            .await;

        heartbeat_task.abort();
        for handle in self
            .registry
            .data_connections()
            .iter()
            .chain(self.registry.heartbeat_connections().iter())
        {
            handle.close().await;
        }
        served?;
        Ok(())
    }
}
