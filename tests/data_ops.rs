//! Broadcast writes and scatter-gather reads

mod common;

use common::{doc, fixture, DB};
use serde_json::json;
use shardmesh::data::{read_all_deduped, read_any, ShardedDataOps};
use shardmesh::registry::{ClusterRegistry, MembershipSnapshot};
use shardmesh::shard::{Document, LocalDriver};
use std::sync::Arc;

fn registry_with(handles: Vec<shardmesh::registry::ConnectionHandle>) -> Arc<ClusterRegistry> {
    let registry = Arc::new(ClusterRegistry::new());
    registry.install(MembershipSnapshot {
        data_shards: handles.iter().map(|h| h.descriptor().clone()).collect(),
        data_connections: handles,
        ..Default::default()
    });
    registry
}

#[tokio::test]
async fn partial_broadcast_reports_failure_and_keeps_accepted_writes() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let b = fixture(&driver, "10.0.0.2", 27117, true).await;
    let c = fixture(&driver, "10.0.0.3", 27117, false).await;

    let ops = ShardedDataOps::new(registry_with(vec![
        a.handle.clone(),
        b.handle.clone(),
        c.handle.clone(),
    ]));

    let written = ops
        .write_all("comments", &doc(json!({ "video": 7, "text": "first" })))
        .await;
    assert!(!written);

    assert_eq!(a.store.len(DB, "comments"), 1);
    assert_eq!(b.store.len(DB, "comments"), 0);
    assert_eq!(c.store.len(DB, "comments"), 1);

    // Both replicas carry the same _id.
    let on_a = a.store.find(DB, "comments", &Document::new()).unwrap();
    let on_c = c.store.find(DB, "comments", &Document::new()).unwrap();
    assert_eq!(on_a[0].get("_id"), on_c[0].get("_id"));
}

#[tokio::test]
async fn broadcast_to_healthy_shards_succeeds() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let b = fixture(&driver, "10.0.0.2", 27117, false).await;
    let ops = ShardedDataOps::new(registry_with(vec![a.handle.clone(), b.handle.clone()]));

    assert!(
        ops.write_all_many(
            "tags",
            &[doc(json!({ "name": "rust" })), doc(json!({ "name": "tokio" }))]
        )
        .await
    );
    assert_eq!(a.store.len(DB, "tags"), 2);
    assert_eq!(b.store.len(DB, "tags"), 2);
}

#[tokio::test]
async fn broadcast_with_no_shards_is_not_success() {
    let ops = ShardedDataOps::new(Arc::new(ClusterRegistry::new()));
    assert!(!ops.write_all("tags", &doc(json!({ "name": "x" }))).await);
}

#[tokio::test]
async fn array_broadcast_fails_if_any_item_fails_anywhere() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let b = fixture(&driver, "10.0.0.2", 27117, true).await;
    let ops = ShardedDataOps::new(registry_with(vec![a.handle.clone(), b.handle.clone()]));

    assert!(
        !ops.write_all_many("tags", &[doc(json!({ "name": "a" })), doc(json!({ "name": "b" }))])
            .await
    );
    assert_eq!(a.store.len(DB, "tags"), 2);
}

#[tokio::test]
async fn random_read_finds_the_only_copy_without_touching_the_list() {
    let driver = LocalDriver::new();
    let mut fixtures = Vec::new();
    for i in 1..=5 {
        fixtures.push(fixture(&driver, &format!("10.0.0.{}", i), 27117, false).await);
    }
    let holder = &fixtures[3];
    holder
        .store
        .commit(
            DB,
            vec![shardmesh::shard::InsertOp {
                collection: "videos".into(),
                document: doc(json!({ "vid": 42, "title": "launch" })),
            }],
        )
        .unwrap();

    let handles: Vec<_> = fixtures.iter().map(|f| f.handle.clone()).collect();
    let before: Vec<String> = handles.iter().map(|h| h.endpoint()).collect();

    for _ in 0..10 {
        let found = read_any(&handles, "videos", &doc(json!({ "vid": 42 }))).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["title"], "launch");
    }

    let after: Vec<String> = handles.iter().map(|h| h.endpoint()).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn random_read_with_no_match_is_empty() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let found = read_any(&[a.handle.clone()], "videos", &doc(json!({ "vid": 1 }))).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn all_shard_read_collapses_replicas() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let b = fixture(&driver, "10.0.0.2", 27117, false).await;
    let ops = ShardedDataOps::new(registry_with(vec![a.handle.clone(), b.handle.clone()]));

    assert!(ops.write_all("favorites", &doc(json!({ "user": "u1", "video": 3 }))).await);
    b.store
        .commit(
            DB,
            vec![shardmesh::shard::InsertOp {
                collection: "favorites".into(),
                document: doc(json!({ "user": "u1", "video": 4 })),
            }],
        )
        .unwrap();

    let found = ops
        .read_all_deduped("favorites", &doc(json!({ "user": "u1" })))
        .await;
    assert_eq!(found.len(), 2);

    let direct = read_all_deduped(
        &[a.handle.clone(), b.handle.clone()],
        "favorites",
        &doc(json!({ "video": 3 })),
    )
    .await;
    assert_eq!(direct.len(), 1);
}

#[tokio::test]
async fn read_one_targets_a_single_endpoint() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let b = fixture(&driver, "10.0.0.2", 27117, false).await;
    let ops = ShardedDataOps::new(registry_with(vec![a.handle.clone(), b.handle.clone()]));
    a.store
        .commit(
            DB,
            vec![shardmesh::shard::InsertOp {
                collection: "history".into(),
                document: doc(json!({ "user": "u9" })),
            }],
        )
        .unwrap();

    assert_eq!(ops.read_one("10.0.0.1:27117", "history", &Document::new()).await.len(), 1);
    assert!(ops.read_one("10.0.0.2:27117", "history", &Document::new()).await.is_empty());
    assert!(ops.read_one("10.0.0.9:27117", "history", &Document::new()).await.is_empty());
}

#[tokio::test]
async fn increment_by_key_returns_pre_image() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let ops = ShardedDataOps::new(registry_with(vec![a.handle.clone()]));

    a.store
        .commit(
            DB,
            vec![shardmesh::shard::InsertOp {
                collection: "danmaku".into(),
                document: doc(json!({ "_id": "d-1", "votes": 5 })),
            }],
        )
        .unwrap();

    let before = ops
        .increment_by_key("10.0.0.1:27117", "danmaku", "d-1", "votes", -2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before["votes"], 5);

    let now = a
        .store
        .find(DB, "danmaku", &doc(json!({ "_id": "d-1" })))
        .unwrap();
    assert_eq!(now[0]["votes"], 3);

    let missing = ops
        .increment_by_key("10.0.0.1:27117", "danmaku", "nope", "votes", 1)
        .await
        .unwrap();
    assert!(missing.is_none());
    assert!(ops
        .increment_by_key("10.0.0.9:27117", "danmaku", "d-1", "votes", 1)
        .await
        .is_err());
}
