//! One-time, secret-gated cluster bootstrap
//!
//! ```text
//! AwaitingSecret -> ValidatingEnv -> ConnectingHeartbeatShards
//!                -> Broadcasting -> Settling -> Done | Failed
//! ```
//!
//! The secret is consumed as soon as it is accepted, so a process can be
//! bootstrapped at most once even if a later phase fails.

use crate::common::{Error, Health, Result, ServiceDescriptor, ServiceKind};
use crate::data::ops::{broadcast_insert, broadcast_insert_many, BroadcastOutcome};
use crate::registry::connector::{ConnectionHandle, ShardConnector};
use crate::registry::reconcile::merge_restricted;
use crate::registry::state::{ClusterRegistry, MembershipSnapshot};
use crate::shard::Document;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collection holding the admin credential record on heartbeat shards
pub const ADMINS: &str = "admins";
/// Collection holding service descriptors on heartbeat shards
pub const SERVICES: &str = "services";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    AwaitingSecret,
    ValidatingEnv,
    ConnectingHeartbeatShards,
    Broadcasting,
    Settling,
    Done,
    Failed,
}

/// In-memory secret that can be redeemed exactly once.
pub struct OneTimeSecret {
    inner: Mutex<Option<String>>,
}

impl OneTimeSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Some(secret.into())),
        }
    }

    /// A random secret, for nodes started without one configured.
    pub fn generate() -> (Self, String) {
        let secret = uuid::Uuid::new_v4().simple().to_string();
        (Self::new(secret.clone()), secret)
    }

    /// Compare and, on a match, clear the secret.
    pub fn consume(&self, candidate: &str) -> Result<()> {
        let mut slot = self
            .inner
            .lock()
            .map_err(|_| Error::Internal("secret lock poisoned".into()))?;
        match slot.as_deref() {
            None => Err(Error::SecretRejected(
                "bootstrap secret already used".into(),
            )),
            Some(secret) if !candidate.is_empty() && secret == candidate => {
                *slot = None;
                Ok(())
            }
            Some(_) => Err(Error::SecretRejected("secret does not match".into())),
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.inner.lock().map(|s| s.is_none()).unwrap_or(true)
    }
}

/// Body of the bootstrap endpoint
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub admin_username: String,
    #[serde(default)]
    pub admin_password: String,
    #[serde(default)]
    pub public_addr: String,
    #[serde(default)]
    pub private_addr: String,
    #[serde(default)]
    pub port: u16,
    /// Packed heartbeat-shard descriptors
    #[serde(default)]
    pub heartbeat_shards: Vec<String>,
}

impl std::fmt::Debug for InitRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitRequest")
            .field("admin_username", &self.admin_username)
            .field("public_addr", &self.public_addr)
            .field("private_addr", &self.private_addr)
            .field("port", &self.port)
            .field("heartbeat_shards", &self.heartbeat_shards.len())
            .finish()
    }
}

impl InitRequest {
    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.admin_username.trim().is_empty() {
            missing.push("admin_username");
        }
        if self.admin_password.is_empty() {
            missing.push("admin_password");
        }
        if self.public_addr.trim().is_empty() {
            missing.push("public_addr");
        }
        if self.private_addr.trim().is_empty() {
            missing.push("private_addr");
        }
        if self.port == 0 {
            missing.push("port");
        }
        if self.heartbeat_shards.iter().all(|s| s.trim().is_empty()) {
            missing.push("heartbeat_shards");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!(
                "missing bootstrap fields: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub phase: BootstrapPhase,
    pub connected: Vec<String>,
    pub unreachable: Vec<String>,
    /// Descriptor strings that failed to parse, with the reason
    pub skipped: Vec<String>,
    pub admin: BroadcastOutcome,
    pub local_node: BroadcastOutcome,
    pub heartbeat_list: BroadcastOutcome,
}

/// Hash a password into the PHC string stored in the admin record.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("password hashing failed: {}", e)))
}

/// Check a password against an admin record read from a heartbeat shard.
pub fn verify_admin_password(record: &Document, password: &str) -> bool {
    let Some(Value::String(phc)) = record.get("password_hash") else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn admin_record(username: &str, password: &str) -> Result<Document> {
    let mut doc = Document::new();
    doc.insert("username".into(), Value::String(username.to_string()));
    doc.insert("password_hash".into(), Value::String(hash_password(password)?));
    doc.insert(
        "created_at".into(),
        Value::from(crate::common::timestamp_now_millis()),
    );
    Ok(doc)
}

/// Parse packed heartbeat-shard strings, collecting the reasons for the
/// ones that do not parse.
pub fn parse_heartbeat_shards(raw: &[String]) -> (Vec<ServiceDescriptor>, Vec<String>) {
    let mut parsed = Vec::new();
    let mut skipped = Vec::new();
    for entry in raw.iter().filter(|s| !s.trim().is_empty()) {
        match ServiceDescriptor::parse_packed(entry, ServiceKind::HeartbeatShard) {
            Ok(d) => parsed.push(d),
            Err(e) => {
                // Descriptor strings carry passwords; log only the reason.
                tracing::warn!("Skipping heartbeat shard descriptor: {}", e);
                skipped.push(e.to_string());
            }
        }
    }
    (parsed, skipped)
}

/// Attach a node to an already bootstrapped cluster: connect to the given
/// heartbeat shards, publish them, and advertise `local` in `services` when
/// given. Returns the number of heartbeat shards reached.
pub async fn join_existing(
    registry: &ClusterRegistry,
    connector: &ShardConnector,
    database: &str,
    heartbeat_shards: &[String],
    local: Option<ServiceDescriptor>,
) -> Result<usize> {
    let (parsed, _) = parse_heartbeat_shards(heartbeat_shards);
    if parsed.is_empty() {
        return Err(Error::InvalidConfig(
            "no valid heartbeat shard descriptors to join".into(),
        ));
    }
    let handles = connector.connect(&parsed, database).await?;
    if !handles.iter().any(ConnectionHandle::is_ok) {
        return Err(Error::ConnectionFailed("no heartbeat shard reachable".into()));
    }

    let _updates = registry.lock_updates().await;
    let mut snapshot = registry.snapshot();
    let connections =
        merge_restricted(snapshot.heartbeat_connections, handles, &parsed).await;
    let live: Vec<ConnectionHandle> = connections.iter().filter(|h| h.is_ok()).cloned().collect();
    snapshot.heartbeat_shards = parsed;
    snapshot.heartbeat_connections = connections;
    if let Some(local) = &local {
        snapshot.api_nodes = vec![local.clone()];
    }
    registry.install(snapshot);

    if let Some(local) = local {
        let outcome = broadcast_insert(&live, SERVICES, &local.to_document()?).await;
        if !outcome.all_accepted() {
            tracing::warn!("Node advertisement reached only [{}]", outcome.succeeded.join(", "));
        }
    }
    tracing::info!("Joined cluster through {} heartbeat shards", live.len());
    Ok(live.len())
}

pub struct ClusterBootstrap {
    secret: OneTimeSecret,
    registry: Arc<ClusterRegistry>,
    connector: ShardConnector,
    database: String,
    settle_delay: Duration,
    phase: Mutex<BootstrapPhase>,
}

impl ClusterBootstrap {
    pub fn new(
        secret: OneTimeSecret,
        registry: Arc<ClusterRegistry>,
        connector: ShardConnector,
        database: impl Into<String>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            secret,
            registry,
            connector,
            database: database.into(),
            settle_delay,
            phase: Mutex::new(BootstrapPhase::AwaitingSecret),
        }
    }

    /// Phase reached by the most recent run.
    pub fn phase(&self) -> BootstrapPhase {
        self.phase
            .lock()
            .map(|p| *p)
            .unwrap_or(BootstrapPhase::Failed)
    }

    pub fn secret_consumed(&self) -> bool {
        self.secret.is_consumed()
    }

    fn enter(&self, phase: BootstrapPhase) {
        tracing::debug!("Bootstrap phase: {:?}", phase);
        if let Ok(mut p) = self.phase.lock() {
            *p = phase;
        }
    }

    fn fail(&self, e: Error) -> Error {
        tracing::error!("Bootstrap failed: {}", e);
        self.enter(BootstrapPhase::Failed);
        e
    }

    pub async fn run(&self, req: InitRequest) -> Result<BootstrapReport> {
        self.enter(BootstrapPhase::AwaitingSecret);
        self.secret.consume(&req.secret).map_err(|e| self.fail(e))?;
        tracing::info!("Bootstrap secret accepted");

        self.enter(BootstrapPhase::ValidatingEnv);
        req.validate().map_err(|e| self.fail(e))?;

        self.enter(BootstrapPhase::ConnectingHeartbeatShards);
        let (parsed, skipped) = parse_heartbeat_shards(&req.heartbeat_shards);
        if parsed.is_empty() {
            return Err(self.fail(Error::InvalidConfig(
                "no valid heartbeat shard descriptors".into(),
            )));
        }

        let handles = self
            .connector
            .connect(&parsed, &self.database)
            .await
            .map_err(|e| self.fail(e))?;
        let unreachable: Vec<String> = handles
            .iter()
            .filter(|h| !h.is_ok())
            .map(ConnectionHandle::endpoint)
            .collect();
        if unreachable.len() == handles.len() {
            return Err(self.fail(Error::ConnectionFailed(
                "no heartbeat shard reachable".into(),
            )));
        }

        // Held through the broadcasts so a heartbeat tick cannot retire the
        // connections they run on.
        let updates = self.registry.lock_updates().await;
        let mut previous = self.registry.snapshot();
        let cached = std::mem::take(&mut previous.heartbeat_connections);
        let connections = merge_restricted(cached, handles, &parsed).await;
        let live: Vec<ConnectionHandle> =
            connections.iter().filter(|h| h.is_ok()).cloned().collect();

        // Shards advertise themselves as parsed; probe health stays local.
        let heartbeat_docs = parsed
            .iter()
            .map(ServiceDescriptor::to_document)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| self.fail(e))?;
        let heartbeat_shards: Vec<ServiceDescriptor> = parsed
            .into_iter()
            .map(|mut d| {
                d.health = if live.iter().any(|h| h.descriptor().same_endpoint(&d)) {
                    Health::Up
                } else {
                    Health::Down
                };
                d
            })
            .collect();
        let local = ServiceDescriptor::api_node(
            &req.public_addr,
            Some(req.private_addr.as_str()),
            req.port,
        );

        self.registry.install(MembershipSnapshot {
            api_nodes: vec![local.clone()],
            heartbeat_shards,
            heartbeat_connections: connections,
            ..previous
        });

        self.enter(BootstrapPhase::Broadcasting);
        let admin_doc = admin_record(&req.admin_username, &req.admin_password)
            .map_err(|e| self.fail(e))?;
        let local_doc = local.to_document().map_err(|e| self.fail(e))?;

        let (admin, local_node, heartbeat_list) = tokio::join!(
            broadcast_insert(&live, ADMINS, &admin_doc),
            broadcast_insert(&live, SERVICES, &local_doc),
            broadcast_insert_many(&live, SERVICES, &heartbeat_docs),
        );

        drop(updates);

        self.enter(BootstrapPhase::Settling);
        tokio::time::sleep(self.settle_delay).await;

        let report = BootstrapReport {
            phase: BootstrapPhase::Done,
            connected: live.iter().map(ConnectionHandle::endpoint).collect(),
            unreachable,
            skipped,
            admin,
            local_node,
            heartbeat_list,
        };

        for outcome in [&report.admin, &report.local_node, &report.heartbeat_list] {
            if !outcome.all_accepted() {
                return Err(self.fail(outcome.clone().into_result().err().unwrap_or_else(
                    || Error::Internal("broadcast outcome inconsistent".into()),
                )));
            }
        }

        self.enter(BootstrapPhase::Done);
        tracing::info!(
            "✓ Cluster bootstrapped: {} heartbeat shards connected, {} unreachable",
            report.connected.len(),
            report.unreachable.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_single_use() {
        let secret = OneTimeSecret::new("s3cret");
        assert!(matches!(secret.consume("wrong"), Err(Error::SecretRejected(_))));
        assert!(!secret.is_consumed());
        assert!(secret.consume("s3cret").is_ok());
        assert!(secret.is_consumed());
        assert!(matches!(secret.consume("s3cret"), Err(Error::SecretRejected(_))));
    }

    #[test]
    fn test_empty_candidate_never_matches() {
        let secret = OneTimeSecret::new("");
        assert!(secret.consume("").is_err());
    }

    #[test]
    fn test_generated_secrets_differ() {
        let (_, a) = OneTimeSecret::generate();
        let (_, b) = OneTimeSecret::generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_validate_lists_missing_fields() {
        let req = InitRequest {
            admin_username: "root".into(),
            port: 7000,
            ..Default::default()
        };
        let err = req.validate().unwrap_err().to_string();
        assert!(err.contains("admin_password"));
        assert!(err.contains("public_addr"));
        assert!(err.contains("heartbeat_shards"));
        assert!(!err.contains("port"));
    }

    #[test]
    fn test_admin_record_hashes_password() {
        let record = admin_record("root", "hunter2").unwrap();
        let stored = record.get("password_hash").unwrap().as_str().unwrap();
        assert!(!stored.contains("hunter2"));
        assert!(verify_admin_password(&record, "hunter2"));
        assert!(!verify_admin_password(&record, "hunter3"));
    }

    #[test]
    fn test_debug_hides_secret() {
        let req = InitRequest {
            secret: "topsecret".into(),
            admin_password: "pw-value".into(),
            ..Default::default()
        };
        let shown = format!("{:?}", req);
        assert!(!shown.contains("topsecret"));
        assert!(!shown.contains("pw-value"));
    }
}
