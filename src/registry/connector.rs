//! Batch shard connector
//!
//! Opens one connection per descriptor concurrently. A failed target never
//! aborts the batch; it comes back as a [`ConnectionHandle`] with
//! [`ConnectionStatus::Error`].

use crate::common::{Error, Result, ServiceDescriptor};
use crate::shard::{ConnectTarget, ShardClient, ShardDriver};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Ok,
    Error,
}

/// A shard descriptor paired with the live connection to it (or the reason
/// there is none).
#[derive(Clone)]
pub struct ConnectionHandle {
    descriptor: ServiceDescriptor,
    status: ConnectionStatus,
    client: Option<Arc<dyn ShardClient>>,
    error: Option<String>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("endpoint", &self.descriptor.endpoint())
            .field("status", &self.status)
            .field("error", &self.error)
            .finish()
    }
}

impl ConnectionHandle {
    pub fn ok(descriptor: ServiceDescriptor, client: Arc<dyn ShardClient>) -> Self {
        Self {
            descriptor,
            status: ConnectionStatus::Ok,
            client: Some(client),
            error: None,
        }
    }

    pub fn failed(descriptor: ServiceDescriptor, error: impl ToString) -> Self {
        Self {
            descriptor,
            status: ConnectionStatus::Error,
            client: None,
            error: Some(error.to_string()),
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == ConnectionStatus::Ok
    }

    pub fn client(&self) -> Option<&Arc<dyn ShardClient>> {
        self.client.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn endpoint(&self) -> String {
        self.descriptor.endpoint()
    }

    pub fn same_endpoint(&self, other: &ConnectionHandle) -> bool {
        self.descriptor.same_endpoint(&other.descriptor)
    }

    /// True when both handles wrap the very same underlying connection.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        match (&self.client, &other.client) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub async fn close(&self) {
        if let Some(client) = &self.client {
            client.close().await;
        }
    }
}

pub struct ShardConnector {
    driver: Arc<dyn ShardDriver>,
    timeout: Duration,
}

impl ShardConnector {
    pub fn new(driver: Arc<dyn ShardDriver>, timeout: Duration) -> Self {
        Self { driver, timeout }
    }

    async fn connect_one(&self, descriptor: ServiceDescriptor, database: &str) -> ConnectionHandle {
        let Some(address) = descriptor.dial_addr().map(str::to_string) else {
            return ConnectionHandle::failed(descriptor, "no usable address");
        };
        if descriptor.port == 0 {
            return ConnectionHandle::failed(descriptor, "port is zero");
        }

        let target = ConnectTarget {
            address,
            port: descriptor.port,
            credentials: descriptor.credentials.clone(),
            database: database.to_string(),
        };

        match tokio::time::timeout(self.timeout, self.driver.connect(&target)).await {
            Ok(Ok(client)) => {
                tracing::debug!("Connected to shard {}", target.endpoint());
                ConnectionHandle::ok(descriptor, client)
            }
            Ok(Err(e)) => {
                tracing::warn!("Shard {} unreachable: {}", target.endpoint(), e);
                ConnectionHandle::failed(descriptor, e)
            }
            Err(_) => {
                tracing::warn!(
                    "Shard {} did not answer within {:?}",
                    target.endpoint(),
                    self.timeout
                );
                ConnectionHandle::failed(
                    descriptor,
                    Error::Timeout(format!("connect to {}", target.endpoint())),
                )
            }
        }
    }

    /// Connect to every descriptor; one handle per descriptor, same order.
    ///
    /// Fails only when the list is empty or no descriptor carries a usable
    /// address.
    pub async fn connect(
        &self,
        descriptors: &[ServiceDescriptor],
        database: &str,
    ) -> Result<Vec<ConnectionHandle>> {
        if descriptors.is_empty() {
            return Err(Error::InvalidConfig("no shard descriptors to connect".into()));
        }
        if database.is_empty() {
            return Err(Error::InvalidConfig("database name is empty".into()));
        }
        if descriptors
            .iter()
            .all(|d| d.dial_addr().is_none() || d.port == 0)
        {
            return Err(Error::InvalidDescriptor(
                "no descriptor has a usable address".into(),
            ));
        }

        let handles = join_all(
            descriptors
                .iter()
                .cloned()
                .map(|d| self.connect_one(d, database)),
        )
        .await;

        let ok = handles.iter().filter(|h| h.is_ok()).count();
        tracing::info!("Connected to {}/{} shards", ok, handles.len());
        Ok(handles)
    }
}
