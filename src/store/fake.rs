//! In-memory `Store` used by this crate's own tests (§8) and available to
//! downstream crates under the `testing` feature. Modeled on the teacher's
//! `TestContext` fixture (`examples/catterer-rust-kube-lease/src/lease.rs`),
//! generalized from "one fake Kubernetes Lease" to a minimal etcd-like
//! KV+lease+watch store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{EventKind, Kv, Lease, RawEvent, Store, WatchHandle};

struct LeaseRecord {
    ttl: i64,
    expired: bool,
}

type Watcher = Box<dyn Fn(RawEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
    kvs: HashMap<String, Kv>,
    leases: HashMap<i64, LeaseRecord>,
    watchers: HashMap<u64, (String, Watcher)>,
}

/// A fake discovery store, entirely in-process. Leases never expire on
/// their own — call [`FakeStore::expire_lease`] to simulate it, matching
/// scenario S4.
pub struct FakeStore {
    inner: Arc<Mutex<Inner>>,
    next_lease_id: AtomicI64,
    next_watcher_id: AtomicI64,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_lease_id: AtomicI64::new(1),
            next_watcher_id: AtomicI64::new(1),
        }
    }

    /// Pre-seeds a key bound to a fresh lease, returning the lease id —
    /// used by tests that need a KV to already exist before `register`
    /// runs (scenarios S2/S3).
    pub fn seed(&self, key: &str, value: &str, ttl: i64) -> i64 {
        let id = self.next_lease_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.leases.insert(id, LeaseRecord { ttl, expired: false });
        inner.kvs.insert(
            key.to_string(),
            Kv {
                key: key.to_string(),
                value: value.to_string(),
                lease: id,
            },
        );
        id
    }

    /// Marks a lease expired and deletes any keys bound to it, the way a
    /// real store auto-deletes on lease expiry.
    pub fn expire_lease(&self, id: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.leases.get_mut(&id) {
            record.expired = true;
        }
        let dead: Vec<String> = inner
            .kvs
            .iter()
            .filter(|(_, kv)| kv.lease == id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in dead {
            inner.kvs.remove(&key);
            notify(&inner.watchers, &key, None, EventKind::Delete);
        }
    }
}

impl Default for FakeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(watchers: &HashMap<u64, (String, Watcher)>, key: &str, value: Option<&str>, kind: EventKind) {
    for (prefix, handler) in watchers.values() {
        if key.starts_with(prefix.as_str()) {
            handler(RawEvent {
                key: key.to_string(),
                value: value.map(|v| v.to_string()),
                kind,
            });
        }
    }
}

/// Stops delivery by removing the watcher entry from the shared inner
/// state; cheap to hold since it only clones the `Arc` around the store's
/// state, not the store itself.
struct FakeWatchHandle {
    id: u64,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl WatchHandle for FakeWatchHandle {
    async fn stop(&self) {
        self.inner.lock().unwrap().watchers.remove(&self.id);
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn grant(&self, ttl: i64) -> Result<Lease, StoreError> {
        let id = self.next_lease_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .lock()
            .unwrap()
            .leases
            .insert(id, LeaseRecord { ttl, expired: false });
        Ok(Lease { id, ttl })
    }

    async fn keep_alive(&self, id: i64) -> Result<Option<i64>, StoreError> {
        let inner = self.inner.lock().unwrap();
        match inner.leases.get(&id) {
            Some(record) if !record.expired => Ok(Some(record.ttl)),
            _ => Ok(None),
        }
    }

    async fn revoke(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.leases.remove(&id);
        let dead: Vec<String> = inner
            .kvs
            .iter()
            .filter(|(_, kv)| kv.lease == id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in dead {
            inner.kvs.remove(&key);
            notify(&inner.watchers, &key, None, EventKind::Delete);
        }
        Ok(true)
    }

    async fn put(&self, key: &str, value: &str, lease: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if lease != 0 && !inner.leases.contains_key(&lease) {
            return Err(StoreError::msg(format!("unknown lease {lease}")));
        }
        inner.kvs.insert(
            key.to_string(),
            Kv {
                key: key.to_string(),
                value: value.to_string(),
                lease,
            },
        );
        notify(&inner.watchers, key, Some(value), EventKind::Put);
        Ok(true)
    }

    async fn range(&self, key: &str) -> Result<Vec<Kv>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.kvs.get(key).cloned().into_iter().collect())
    }

    async fn range_prefix(&self, prefix: &str) -> Result<Vec<Kv>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut kvs: Vec<Kv> = inner
            .kvs
            .values()
            .filter(|kv| kv.key.starts_with(prefix))
            .cloned()
            .collect();
        kvs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(kvs)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let dead: Vec<String> = inner
            .kvs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        let count = dead.len() as i64;
        for key in dead {
            inner.kvs.remove(&key);
            notify(&inner.watchers, &key, None, EventKind::Delete);
        }
        Ok(count)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        handler: Box<dyn Fn(RawEvent) + Send + Sync>,
    ) -> Result<Box<dyn WatchHandle>, StoreError> {
        let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst) as u64;
        self.inner
            .lock()
            .unwrap()
            .watchers
            .insert(id, (prefix.to_string(), handler));
        Ok(Box::new(FakeWatchHandle {
            id,
            inner: self.inner.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_range_prefix_is_sorted() {
        let store = FakeStore::new();
        let l = store.grant(10).await.unwrap();
        store.put("ns/api/b", "http://b", l.id).await.unwrap();
        store.put("ns/api/a", "http://a", l.id).await.unwrap();
        let kvs = store.range_prefix("ns/api/").await.unwrap();
        assert_eq!(kvs[0].key, "ns/api/a");
        assert_eq!(kvs[1].key, "ns/api/b");
    }

    #[tokio::test]
    async fn expire_lease_removes_bound_keys() {
        let store = FakeStore::new();
        let l = store.grant(10).await.unwrap();
        store.put("ns/api/a", "http://a", l.id).await.unwrap();
        store.expire_lease(l.id);
        assert!(store.range("ns/api/a").await.unwrap().is_empty());
        assert_eq!(store.keep_alive(l.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn revoke_deletes_bound_key() {
        let store = FakeStore::new();
        let l = store.grant(10).await.unwrap();
        store.put("ns/api/a", "http://a", l.id).await.unwrap();
        assert!(store.revoke(l.id).await.unwrap());
        assert!(store.range("ns/api/a").await.unwrap().is_empty());
    }
}
