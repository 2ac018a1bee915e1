//! Namespace Query API (§4.3): stateless helpers over a shared adapter.
//! Kept free of any per-engine state so these calls never contend with a
//! busy renewal loop on a different adapter instance (§9 "Shared mutable
//! client").

use crate::error::StoreError;
use crate::node::{name_from_key, parse_uri, Node};
use crate::store::adapter::StoreClientAdapter;

/// Lists the nodes registered under `service`, in the store's range order
/// (typically lexicographic by key). KVs with an empty value are dropped;
/// callers needing another order must sort themselves (§4.3).
pub async fn nodes(
    adapter: &StoreClientAdapter,
    namespace: &str,
    service: &str,
) -> Result<Vec<Node>, StoreError> {
    let prefix = format!("{namespace}/{service}/");
    let kvs = adapter.range_prefix(&prefix).await?;
    let mut out = Vec::with_capacity(kvs.len());
    for kv in kvs {
        if kv.value.is_empty() {
            continue;
        }
        let Ok(uri) = parse_uri(&kv.value) else {
            log::warn!("skipping node with unparsable uri: {:?}", kv.value);
            continue;
        };
        out.push(Node {
            name: name_from_key(&kv.key).to_string(),
            uri,
        });
    }
    Ok(out)
}

/// Lists distinct service names under `namespace`, in first-seen order.
pub async fn services(
    adapter: &StoreClientAdapter,
    namespace: &str,
) -> Result<Vec<String>, StoreError> {
    let prefix = format!("{namespace}/");
    let kvs = adapter.range_prefix(&prefix).await?;
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for kv in kvs {
        let mut tokens = kv.key.split('/');
        let _namespace = tokens.next();
        if let Some(service) = tokens.next() {
            if seen.insert(service.to_string()) {
                out.push(service.to_string());
            }
        }
    }
    Ok(out)
}

/// Deletes every key under `namespace`.
pub async fn clear_namespace(
    adapter: &StoreClientAdapter,
    namespace: &str,
) -> Result<i64, StoreError> {
    adapter.delete_prefix(namespace).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeStore;
    use std::sync::Arc;

    async fn adapter_with(store: FakeStore) -> StoreClientAdapter {
        StoreClientAdapter::from_store(Arc::new(store))
    }

    #[tokio::test]
    async fn nodes_drops_empty_values_and_parses_uri() {
        let store = FakeStore::new();
        let l = store.grant(10).await.unwrap();
        store.put("ns/api/n1", "http://a:80", l.id).await.unwrap();
        store.put("ns/api/n2", "", l.id).await.unwrap();
        let adapter = adapter_with(store).await;
        let found = nodes(&adapter, "ns", "api").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "n1");
    }

    #[tokio::test]
    async fn services_lists_distinct_first_seen() {
        let store = FakeStore::new();
        let l = store.grant(10).await.unwrap();
        store.put("ns/api/n1", "http://a:80", l.id).await.unwrap();
        store.put("ns/api/n2", "http://b:80", l.id).await.unwrap();
        store.put("ns/web/n1", "http://c:80", l.id).await.unwrap();
        let adapter = adapter_with(store).await;
        let found = services(&adapter, "ns").await.unwrap();
        assert_eq!(found, vec!["api".to_string(), "web".to_string()]);
    }

    #[tokio::test]
    async fn clear_namespace_deletes_everything_under_it() {
        let store = FakeStore::new();
        let l = store.grant(10).await.unwrap();
        store.put("ns/api/n1", "http://a:80", l.id).await.unwrap();
        let adapter = adapter_with(store).await;
        let deleted = clear_namespace(&adapter, "ns").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(nodes(&adapter, "ns", "api").await.unwrap().is_empty());
    }
}
