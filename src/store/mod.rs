//! The abstract store contract (§6). The core of this crate — the
//! Registration Engine, Namespace Query API, and Watch & Event Parser —
//! only ever talks to `dyn Store`. Concrete transports (real etcd, or a
//! fake for tests) live in sibling modules and never leak through.

pub mod adapter;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

#[cfg(feature = "etcd")]
pub mod etcd;

use async_trait::async_trait;

use crate::error::StoreError;

/// A key/value pair as returned by the remote store, optionally bound to a
/// lease (§3 "Store KV").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kv {
    pub key: String,
    pub value: String,
    pub lease: i64,
}

/// Result of a successful `Grant` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub id: i64,
    pub ttl: i64,
}

/// The kind of change a watch event carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A raw watch notification from the store, before crate-level parsing
/// (§4.4 distinguishes this from the public [`crate::watch::Event`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub key: String,
    pub value: Option<String>,
    pub kind: EventKind,
}

/// A live subscription returned by `WatchPrefix`. Dropping or calling
/// [`WatchHandle::stop`] ends delivery; no further events are produced
/// afterwards.
#[async_trait]
pub trait WatchHandle: Send + Sync {
    async fn stop(&self);
}

/// The abstract contract a discovery store must fulfil (§6).
///
/// Implementors are expected to be cheaply cloneable handles (an `Arc`
/// around a transport client, say) since the [`adapter::StoreClientAdapter`]
/// only interacts with the trait object, never the concrete type.
#[async_trait]
pub trait Store: Send + Sync {
    async fn grant(&self, ttl: i64) -> Result<Lease, StoreError>;

    /// Returns the new remaining TTL, or `None` if the store rejected the
    /// keep-alive (lease gone) — treated as expired by the caller.
    async fn keep_alive(&self, id: i64) -> Result<Option<i64>, StoreError>;

    async fn revoke(&self, id: i64) -> Result<bool, StoreError>;

    async fn put(&self, key: &str, value: &str, lease: i64) -> Result<bool, StoreError>;

    async fn range(&self, key: &str) -> Result<Vec<Kv>, StoreError>;

    async fn range_prefix(&self, prefix: &str) -> Result<Vec<Kv>, StoreError>;

    async fn delete_prefix(&self, prefix: &str) -> Result<i64, StoreError>;

    /// Subscribes to PUT/DELETE events under `prefix`, invoking `handler`
    /// for each one in delivery order until the returned handle is stopped.
    async fn watch_prefix(
        &self,
        prefix: &str,
        handler: Box<dyn Fn(RawEvent) + Send + Sync>,
    ) -> Result<Box<dyn WatchHandle>, StoreError>;
}
