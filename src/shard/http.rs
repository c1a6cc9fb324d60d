//! HTTP API of the shard server
//!
//! ```text
//! GET  /health
//! POST /db/:database/ping
//! POST /db/:database/commit
//! POST /db/:database/:collection/find
//! POST /db/:database/:collection/increment
//! ```

use crate::common::{Credentials, Error};
use crate::shard::store::{DocumentStore, InsertOp};
use crate::shard::Document;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct FindRequest {
    #[serde(default)]
    pub filter: Document,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FindResponse {
    pub documents: Vec<Document>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitRequest {
    pub ops: Vec<InsertOp>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitResponse {
    pub inserted: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IncrementRequest {
    #[serde(default)]
    pub filter: Document,
    pub field: String,
    pub step: i64,
    #[serde(default)]
    pub upsert_initial: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IncrementResponse {
    pub document: Option<Document>,
}

/// Shared shard state for HTTP handlers.
#[derive(Clone)]
pub struct ShardState {
    pub store: Arc<DocumentStore>,
    pub credentials: Option<Credentials>,
}

fn error_response(e: Error) -> Response {
    (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response()
}

fn basic_credentials(headers: &HeaderMap) -> Option<Credentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn authorize(state: &ShardState, headers: &HeaderMap) -> Result<(), Response> {
    match &state.credentials {
        None => Ok(()),
        Some(required) if basic_credentials(headers).as_ref() == Some(required) => Ok(()),
        Some(_) => Err(error_response(Error::Unauthorized(
            "invalid shard credentials".into(),
        ))),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ping(
    State(state): State<ShardState>,
    Path(database): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    Json(json!({ "status": "ok", "database": database })).into_response()
}

async fn find(
    State(state): State<ShardState>,
    Path((database, collection)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<FindRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.store.find(&database, &collection, &req.filter) {
        Ok(documents) => Json(FindResponse { documents }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn commit(
    State(state): State<ShardState>,
    Path(database): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CommitRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.store.commit(&database, req.ops) {
        Ok(inserted) => {
            tracing::debug!("Committed {} documents into {}", inserted, database);
            Json(CommitResponse { inserted }).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn increment(
    State(state): State<ShardState>,
    Path((database, collection)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<IncrementRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.store.increment(
        &database,
        &collection,
        &req.filter,
        &req.field,
        req.step,
        req.upsert_initial,
    ) {
        Ok(document) => Json(IncrementResponse { document }).into_response(),
        Err(e) => error_response(e),
    }
}

/// Creates the shard HTTP router.
pub fn create_router(state: ShardState, max_body_mb: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/db/:database/ping", post(ping))
        .route("/db/:database/commit", post(commit))
        .route("/db/:database/:collection/find", post(find))
        .route("/db/:database/:collection/increment", post(increment))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            max_body_mb * 1024 * 1024,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_basic_credentials_parsing() {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode("root:p:w");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap(),
        );
        let creds = basic_credentials(&headers).unwrap();
        assert_eq!(creds.username, "root");
        assert_eq!(creds.password, "p:w");

        assert!(basic_credentials(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_authorize_without_required_credentials() {
        let state = ShardState {
            store: Arc::new(DocumentStore::new_memory()),
            credentials: None,
        };
        assert!(authorize(&state, &HeaderMap::new()).is_ok());

        let guarded = ShardState {
            credentials: Some(Credentials {
                username: "root".into(),
                password: "pw".into(),
            }),
            ..state
        };
        assert!(authorize(&guarded, &HeaderMap::new()).is_err());
    }
}
