//! Connection-list reconciliation against live local shards

mod common;

use common::{data_shard, fixture};
use shardmesh::registry::{merge, ConnectionHandle};
use shardmesh::shard::LocalDriver;

#[tokio::test]
async fn merging_a_set_with_itself_changes_nothing() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let b = fixture(&driver, "10.0.0.2", 27117, false).await;

    let old = vec![a.handle.clone(), b.handle.clone()];
    let merged = merge(old.clone(), old).await;

    assert_eq!(merged.len(), 2);
    assert!(merged[0].same_connection(&a.handle));
    assert!(merged[1].same_connection(&b.handle));
    assert_eq!(a.client.close_count(), 0);
    assert_eq!(b.client.close_count(), 0);
}

#[tokio::test]
async fn broken_probe_evicts_and_closes_once() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let b = fixture(&driver, "10.0.0.2", 27117, false).await;

    let old = vec![a.handle.clone(), b.handle.clone()];
    let new = vec![ConnectionHandle::failed(
        data_shard("10.0.0.1", 27117),
        "connection refused",
    )];
    let merged = merge(old, new).await;

    assert_eq!(merged.len(), 1);
    assert!(merged[0].same_connection(&b.handle));
    assert_eq!(a.client.close_count(), 1);
    assert_eq!(b.client.close_count(), 0);
}

#[tokio::test]
async fn good_probe_adds_new_endpoints_without_duplicates() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let a_again = fixture(&driver, "10.0.0.1", 27117, false).await;
    let c = fixture(&driver, "10.0.0.3", 27117, false).await;

    let merged = merge(
        vec![a.handle.clone()],
        vec![a_again.handle.clone(), c.handle.clone()],
    )
    .await;

    assert_eq!(merged.len(), 2);
    assert!(merged[0].same_connection(&a.handle));
    assert!(merged[1].same_connection(&c.handle));
    // The redundant fresh connection to A is released, the cached one kept.
    assert_eq!(a_again.client.close_count(), 1);
    assert_eq!(a.client.close_count(), 0);
}

#[tokio::test]
async fn shards_missing_from_the_probe_are_kept() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let b = fixture(&driver, "10.0.0.2", 27117, false).await;

    let merged = merge(vec![a.handle.clone(), b.handle.clone()], vec![]).await;
    assert_eq!(merged.len(), 2);
}

#[tokio::test]
async fn same_address_on_another_port_is_a_different_shard() {
    let driver = LocalDriver::new();
    let a = fixture(&driver, "10.0.0.1", 27117, false).await;
    let merged = merge(
        vec![a.handle.clone()],
        vec![ConnectionHandle::failed(data_shard("10.0.0.1", 27118), "refused")],
    )
    .await;
    assert_eq!(merged.len(), 1);
    assert_eq!(a.client.close_count(), 0);
}
