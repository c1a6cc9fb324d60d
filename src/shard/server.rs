//! Shard server

use crate::common::{Credentials, Result, ShardConfig};
use crate::shard::http::{create_router, ShardState};
use crate::shard::store::DocumentStore;
use std::sync::Arc;

/// Request bodies larger than this are rejected.
const MAX_BODY_MB: usize = 16;

pub struct ShardServer {
    config: ShardConfig,
    shard_id: String,
}

impl ShardServer {
    pub fn new(config: ShardConfig, shard_id: String) -> Self {
        Self { config, shard_id }
    }

    fn open_store(&self) -> Result<DocumentStore> {
        #[cfg(feature = "sled-backend")]
        if let Some(path) = &self.config.data_path {
            return DocumentStore::open(path);
        }
        if let Some(path) = &self.config.data_path {
            tracing::warn!(
                "data path {} ignored: built without sled-backend, documents stay in memory",
                path.display()
            );
        }
        Ok(DocumentStore::new_memory())
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting shard server: {}", self.shard_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);

        let credentials = match (&self.config.username, &self.config.password) {
            (Some(username), password) => Some(Credentials {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            }),
            (None, _) => None,
        };
        if credentials.is_none() {
            tracing::warn!("  Authentication disabled");
        }

        let state = ShardState {
            store: Arc::new(self.open_store()?),
            credentials,
        };
        let router = create_router(state, MAX_BODY_MB);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Shard server ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down shard server");
            })
            .await?;

        Ok(())
    }
}
