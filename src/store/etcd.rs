//! Concrete `Store` backed by the `etcd-client` crate (feature `etcd`).
//!
//! This is the one real transport this crate ships; it is additive to
//! the abstract contract in [`super`], grounded in how the pack's own
//! etcd-backed service registries use the crate (see
//! `examples/other_examples/2bfc6628_beinan-fairy__worker-src-service_registry-etcd.rs.rs`
//! and `.../dfbe3523_vine-rs-vine__registry-src-etcd-etcd.rs.rs`).

use async_trait::async_trait;
use etcd_client::{Client, EventType, GetOptions, PutOptions};

use crate::error::StoreError;
use crate::store::{EventKind, Kv, Lease, RawEvent, Store, WatchHandle};

/// A `Store` backed by a live etcd v3 connection. `etcd_client::Client` is
/// already a cheap, internally-pooled handle, so this type is `Clone` and
/// safe to hand to [`super::adapter::StoreClientAdapter::from_store`]
/// without any extra connection-pooling of our own.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[impl AsRef<str>]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(StoreError::new)?;
        Ok(Self { client })
    }
}

fn kv_from(kv: &etcd_client::KeyValue) -> Result<Kv, StoreError> {
    Ok(Kv {
        key: kv.key_str().map_err(StoreError::new)?.to_string(),
        value: kv.value_str().map_err(StoreError::new)?.to_string(),
        lease: kv.lease(),
    })
}

#[async_trait]
impl Store for EtcdStore {
    async fn grant(&self, ttl: i64) -> Result<Lease, StoreError> {
        let mut client = self.client.clone();
        let resp = client.lease_grant(ttl, None).await.map_err(StoreError::new)?;
        Ok(Lease {
            id: resp.id(),
            ttl: resp.ttl(),
        })
    }

    async fn keep_alive(&self, id: i64) -> Result<Option<i64>, StoreError> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client
            .lease_keep_alive(id)
            .await
            .map_err(StoreError::new)?;
        keeper.keep_alive().await.map_err(StoreError::new)?;
        match stream.message().await.map_err(StoreError::new)? {
            Some(resp) if resp.ttl() > 0 => Ok(Some(resp.ttl())),
            _ => Ok(None),
        }
    }

    async fn revoke(&self, id: i64) -> Result<bool, StoreError> {
        let mut client = self.client.clone();
        client.lease_revoke(id).await.map_err(StoreError::new)?;
        Ok(true)
    }

    async fn put(&self, key: &str, value: &str, lease: i64) -> Result<bool, StoreError> {
        let mut client = self.client.clone();
        let options = if lease != 0 {
            Some(PutOptions::new().with_lease(lease))
        } else {
            None
        };
        client
            .put(key.to_string(), value.to_string(), options)
            .await
            .map_err(StoreError::new)?;
        Ok(true)
    }

    async fn range(&self, key: &str) -> Result<Vec<Kv>, StoreError> {
        let mut client = self.client.clone();
        let resp = client.get(key.to_string(), None).await.map_err(StoreError::new)?;
        resp.kvs().iter().map(kv_from).collect()
    }

    async fn range_prefix(&self, prefix: &str) -> Result<Vec<Kv>, StoreError> {
        let mut client = self.client.clone();
        let options = GetOptions::new().with_prefix();
        let resp = client
            .get(prefix.to_string(), Some(options))
            .await
            .map_err(StoreError::new)?;
        resp.kvs().iter().map(kv_from).collect()
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<i64, StoreError> {
        let mut client = self.client.clone();
        let options = etcd_client::DeleteOptions::new().with_prefix();
        let resp = client
            .delete(prefix.to_string(), Some(options))
            .await
            .map_err(StoreError::new)?;
        Ok(resp.deleted())
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        handler: Box<dyn Fn(RawEvent) + Send + Sync>,
    ) -> Result<Box<dyn WatchHandle>, StoreError> {
        let mut client = self.client.clone();
        let options = etcd_client::WatchOptions::new().with_prefix();
        let (watcher, mut stream) = client
            .watch(prefix.to_string(), Some(options))
            .await
            .map_err(StoreError::new)?;

        let task = tokio::spawn(async move {
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let key = match kv.key_str() {
                        Ok(k) => k.to_string(),
                        Err(e) => {
                            log::error!("watch event with invalid utf-8 key: {}", e);
                            continue;
                        }
                    };
                    let kind = match event.event_type() {
                        EventType::Put => EventKind::Put,
                        EventType::Delete => EventKind::Delete,
                    };
                    let value = if kind == EventKind::Delete {
                        None
                    } else {
                        kv.value_str().ok().map(|v| v.to_string())
                    };
                    handler(RawEvent { key, value, kind });
                }
            }
        });

        Ok(Box::new(EtcdWatchHandle {
            watcher: tokio::sync::Mutex::new(watcher),
            task,
        }))
    }
}

struct EtcdWatchHandle {
    watcher: tokio::sync::Mutex<etcd_client::Watcher>,
    task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl WatchHandle for EtcdWatchHandle {
    async fn stop(&self) {
        if let Err(e) = self.watcher.lock().await.cancel().await {
            log::warn!("failed to cancel etcd watch: {}", e);
        }
        self.task.abort();
    }
}
