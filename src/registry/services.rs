//! Admin-authenticated registration of shards in `services`
//!
//! The heartbeat loop only learns about data shards that are advertised on
//! the heartbeat shards. Operators add them here, proving themselves with the
//! admin credentials written at bootstrap.

use crate::common::{Error, Result, ServiceDescriptor, ServiceKind};
use crate::data::ops::{broadcast_insert, BroadcastOutcome};
use crate::registry::bootstrap::{verify_admin_password, ADMINS, SERVICES};
use crate::registry::connector::ConnectionHandle;
use crate::registry::state::ClusterRegistry;
use crate::shard::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of the service registration endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub admin_username: String,
    pub admin_password: String,
    /// Packed descriptor, `public:private:port:account:password:group:identity`
    pub descriptor: String,
    #[serde(default = "default_kind")]
    pub kind: ServiceKind,
}

fn default_kind() -> ServiceKind {
    ServiceKind::DataShard
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("admin_username", &self.admin_username)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Look the admin record up on the heartbeat shards, first answer wins.
async fn find_admin(live: &[ConnectionHandle], username: &str) -> Option<Document> {
    let mut filter = Document::new();
    filter.insert("username".into(), Value::String(username.to_string()));
    for handle in live {
        let Some(client) = handle.client() else {
            continue;
        };
        match client.find(ADMINS, &filter).await {
            Ok(mut found) if !found.is_empty() => return Some(found.swap_remove(0)),
            Ok(_) => {}
            Err(e) => tracing::warn!("Admin lookup on {} failed: {}", handle.endpoint(), e),
        }
    }
    None
}

/// Check the admin credentials and advertise the descriptor on every
/// connected heartbeat shard.
pub async fn register_service(
    registry: &ClusterRegistry,
    req: &RegisterRequest,
) -> Result<BroadcastOutcome> {
    if req.kind == ServiceKind::ApiNode {
        return Err(Error::InvalidDescriptor(
            "api nodes advertise themselves".into(),
        ));
    }
    let descriptor = ServiceDescriptor::parse_packed(&req.descriptor, req.kind)?;

    let live: Vec<ConnectionHandle> = registry
        .heartbeat_connections()
        .iter()
        .filter(|h| h.is_ok())
        .cloned()
        .collect();
    if live.is_empty() {
        return Err(Error::NoShards);
    }

    let authorized = find_admin(&live, &req.admin_username)
        .await
        .is_some_and(|record| verify_admin_password(&record, &req.admin_password));
    if !authorized {
        return Err(Error::Unauthorized("admin credentials rejected".into()));
    }

    let outcome = broadcast_insert(&live, SERVICES, &descriptor.to_document()?).await;
    tracing::info!(
        "Registered {:?} {} on {} heartbeat shards",
        descriptor.kind,
        descriptor.endpoint(),
        outcome.succeeded.len()
    );
    outcome.clone().into_result()?;
    Ok(outcome)
}
