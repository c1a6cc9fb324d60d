//! Connection-list reconciliation
//!
//! A cached connection is retired only when a fresh probe of the same
//! endpoint failed. Endpoints missing from the fresh probe are left alone.

use crate::common::ServiceDescriptor;
use crate::registry::connector::ConnectionHandle;

/// Merge a freshly probed set into the cached one.
///
/// Result: cached handles minus those whose endpoint the probe found broken,
/// followed by good probed handles whose endpoint is not yet represented.
/// Retired cached handles are closed exactly once. A good probed handle that
/// duplicates a kept endpoint is closed unless it is the kept connection
/// itself. A good probe also supersedes a cached error handle for the same
/// endpoint.
pub async fn merge(old: Vec<ConnectionHandle>, new: Vec<ConnectionHandle>) -> Vec<ConnectionHandle> {
    let (new_good, new_broken): (Vec<_>, Vec<_>) = new.into_iter().partition(|h| h.is_ok());

    let mut merged: Vec<ConnectionHandle> = Vec::with_capacity(old.len() + new_good.len());
    for handle in old {
        if new_broken.iter().any(|b| b.same_endpoint(&handle)) {
            tracing::info!("Retiring connection to {}", handle.endpoint());
            handle.close().await;
        } else {
            merged.push(handle);
        }
    }

    for handle in new_good {
        match merged.iter().position(|kept| kept.same_endpoint(&handle)) {
            None => {
                tracing::info!("Adding connection to {}", handle.endpoint());
                merged.push(handle);
            }
            Some(i) if !merged[i].is_ok() => {
                tracing::info!("Replacing failed connection to {}", handle.endpoint());
                merged[i] = handle;
            }
            Some(i) => {
                if !merged[i].same_connection(&handle) {
                    handle.close().await;
                }
            }
        }
    }

    merged
}

/// Like [`merge`], for callers that decide the full set of endpoints: cached
/// handles to endpoints outside `wanted` are closed and dropped first.
pub async fn merge_restricted(
    old: Vec<ConnectionHandle>,
    new: Vec<ConnectionHandle>,
    wanted: &[ServiceDescriptor],
) -> Vec<ConnectionHandle> {
    let mut kept = Vec::with_capacity(old.len());
    for handle in old {
        if wanted.iter().any(|d| handle.descriptor().same_endpoint(d)) {
            kept.push(handle);
        } else {
            tracing::info!("Dropping connection to {}", handle.endpoint());
            handle.close().await;
        }
    }
    merge(kept, new).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ServiceKind;

    fn descriptor(public: &str, private: &str, port: u16) -> ServiceDescriptor {
        ServiceDescriptor::parse_packed(
            &format!("{}:{}:{}:::0:master", public, private, port),
            ServiceKind::DataShard,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_old_entry_is_replaced_by_good_probe() {
        let d = descriptor("203.0.113.1", "10.0.0.1", 1);
        let old = vec![ConnectionHandle::failed(d.clone(), "timeout")];

        let driver = crate::shard::LocalDriver::new();
        driver.add_shard("10.0.0.1", 1);
        let connector = crate::registry::connector::ShardConnector::new(
            std::sync::Arc::new(driver),
            std::time::Duration::from_secs(1),
        );
        let new = connector.connect(&[d], "db").await.unwrap();

        let merged = merge(old, new).await;
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_ok());
    }

    #[tokio::test]
    async fn test_broken_probe_matches_by_public_address() {
        let old = vec![ConnectionHandle::failed(
            descriptor("203.0.113.1", "10.0.0.1", 1),
            "stale",
        )];
        let new = vec![ConnectionHandle::failed(
            descriptor("203.0.113.1", "", 1),
            "refused",
        )];
        assert!(merge(old, new).await.is_empty());
    }

    #[tokio::test]
    async fn test_absent_endpoints_are_kept() {
        let old = vec![ConnectionHandle::failed(descriptor("a", "", 1), "x")];
        let merged = merge(old, vec![]).await;
        assert_eq!(merged.len(), 1);
    }
}
