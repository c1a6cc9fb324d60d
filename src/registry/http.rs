//! HTTP API of an API node
//!
//! ```text
//! POST /cluster/init      one-time bootstrap
//! POST /cluster/services  advertise a shard (admin credentials)
//! GET  /cluster/members   membership snapshot, passwords blanked
//! GET  /health            liveness, also the heartbeat ping target
//! ```

use crate::common::ServiceDescriptor;
use crate::registry::bootstrap::{ClusterBootstrap, InitRequest};
use crate::registry::connector::ConnectionHandle;
use crate::registry::services::{register_service, RegisterRequest};
use crate::registry::state::ClusterRegistry;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Shared node state for HTTP handlers.
#[derive(Clone)]
pub struct NodeState {
    pub node_id: String,
    pub registry: Arc<ClusterRegistry>,
    pub bootstrap: Arc<ClusterBootstrap>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionView {
    pub endpoint: String,
    pub status: crate::registry::connector::ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ConnectionHandle> for ConnectionView {
    fn from(h: &ConnectionHandle) -> Self {
        Self {
            endpoint: h.endpoint(),
            status: h.status(),
            error: h.error().map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MembersView {
    pub generation: u64,
    pub api_nodes: Vec<ServiceDescriptor>,
    pub data_shards: Vec<ServiceDescriptor>,
    pub heartbeat_shards: Vec<ServiceDescriptor>,
    pub data_connections: Vec<ConnectionView>,
    pub heartbeat_connections: Vec<ConnectionView>,
}

impl MembersView {
    pub fn from_registry(registry: &ClusterRegistry) -> Self {
        let redact = |list: &[ServiceDescriptor]| -> Vec<ServiceDescriptor> {
            list.iter().map(ServiceDescriptor::redacted).collect()
        };
        let generation = registry.generation();
        let snapshot = registry.snapshot();
        Self {
            generation,
            api_nodes: redact(&snapshot.api_nodes),
            data_shards: redact(&snapshot.data_shards),
            heartbeat_shards: redact(&snapshot.heartbeat_shards),
            data_connections: snapshot.data_connections.iter().map(Into::into).collect(),
            heartbeat_connections: snapshot
                .heartbeat_connections
                .iter()
                .map(Into::into)
                .collect(),
        }
    }
}

async fn health(State(state): State<NodeState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "node_id": state.node_id,
        "version": crate::VERSION,
        "generation": state.registry.generation(),
    }))
}

async fn members(State(state): State<NodeState>) -> impl IntoResponse {
    Json(MembersView::from_registry(&state.registry))
}

async fn init(State(state): State<NodeState>, Json(req): Json<InitRequest>) -> Response {
    tracing::info!("Bootstrap requested: {:?}", req);
    match state.bootstrap.run(req).await {
        Ok(report) => Json(json!({ "status": "ok", "report": report })).into_response(),
        Err(e) => (
            e.to_http_status(),
            Json(json!({
                "status": "error",
                "phase": state.bootstrap.phase(),
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn register(State(state): State<NodeState>, Json(req): Json<RegisterRequest>) -> Response {
    tracing::info!("Service registration requested: {:?}", req);
    match register_service(&state.registry, &req).await {
        Ok(outcome) => Json(json!({ "status": "ok", "outcome": outcome })).into_response(),
        Err(e) => (
            e.to_http_status(),
            Json(json!({ "status": "error", "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Creates the API node router.
pub fn create_router(state: NodeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cluster/init", post(init))
        .route("/cluster/members", get(members))
        .route("/cluster/services", post(register))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::bootstrap::OneTimeSecret;
    use crate::registry::connector::ShardConnector;
    use crate::shard::LocalDriver;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(driver: Arc<LocalDriver>) -> NodeState {
        let registry = Arc::new(ClusterRegistry::new());
        let bootstrap = ClusterBootstrap::new(
            OneTimeSecret::new("open-sesame"),
            registry.clone(),
            ShardConnector::new(driver, Duration::from_secs(1)),
            "db",
            Duration::ZERO,
        );
        NodeState {
            node_id: "api-1".into(),
            registry,
            bootstrap: Arc::new(bootstrap),
        }
    }

    fn init_body(secret: &str) -> Body {
        Body::from(
            json!({
                "secret": secret,
                "admin_username": "root",
                "admin_password": "pw",
                "public_addr": "203.0.113.1",
                "private_addr": "10.0.0.1",
                "port": 7000,
                "heartbeat_shards": ["203.0.113.50:10.0.0.50:27117:::0:master"],
            })
            .to_string(),
        )
    }

    fn post_init(secret: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/cluster/init")
            .header("content-type", "application/json")
            .body(init_body(secret))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state(Arc::new(LocalDriver::new())));
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_init_then_reuse_is_rejected() {
        let driver = Arc::new(LocalDriver::new());
        driver.add_shard("10.0.0.50", 27117);
        let app = create_router(state(driver));

        let first = app.clone().oneshot(post_init("open-sesame")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(post_init("open-sesame")).await.unwrap();
        assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
    }

    fn post_register(password: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/cluster/services")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "admin_username": "root",
                    "admin_password": password,
                    "descriptor": "203.0.113.10:10.0.0.10:27017:::0:master",
                })
                .to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_requires_admin_password() {
        let driver = Arc::new(LocalDriver::new());
        let heartbeat = driver.add_shard("10.0.0.50", 27117);
        let app = create_router(state(driver));
        let init = app.clone().oneshot(post_init("open-sesame")).await.unwrap();
        assert_eq!(init.status(), StatusCode::OK);

        let rejected = app.clone().oneshot(post_register("nope")).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let accepted = app.oneshot(post_register("pw")).await.unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);
        let services = heartbeat
            .find("db", crate::registry::SERVICES, &crate::shard::Document::new())
            .unwrap();
        let data_shards = services
            .iter()
            .filter(|d| d.get("kind").and_then(|k| k.as_str()) == Some("data-shard"))
            .count();
        assert_eq!(data_shards, 1);
    }

    #[tokio::test]
    async fn test_members_hides_passwords() {
        let driver = Arc::new(LocalDriver::new());
        let node = state(driver);
        let shard = ServiceDescriptor::parse_packed(
            "203.0.113.9::27117:root:hunter2:0:master",
            crate::common::ServiceKind::DataShard,
        )
        .unwrap();
        node.registry.install(crate::registry::state::MembershipSnapshot {
            data_shards: vec![shard],
            ..Default::default()
        });

        let resp = create_router(node)
            .oneshot(
                Request::builder()
                    .uri("/cluster/members")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("203.0.113.9"));
        assert!(!text.contains("hunter2"));
    }
}
