//! Registration Engine (§4.1) — the core of this crate.
//!
//! Owns a single `(service, name, uri)` binding, drives the lease
//! lifecycle, and keeps it alive against a lossy network (§4.1.1).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, StoreError};
use crate::node::{parse_uri, validate_identifier};
use crate::store::adapter::StoreClientAdapter;
use crate::store::{Lease, WatchHandle};
use crate::watch::{watch as start_watch, Event};

struct State {
    lease_id: Option<i64>,
    signal_tx: Option<watch::Sender<Option<i64>>>,
    signal_rx: watch::Receiver<Option<i64>>,
    keepalive_cancel: Option<CancellationToken>,
    watch_handle: Option<Box<dyn WatchHandle>>,
}

struct EngineInner {
    adapter: Arc<StoreClientAdapter>,
    namespace: String,
    service: String,
    uri: Url,
    node_key: String,
    state: Mutex<State>,
}

/// A single node's registration state machine (§3 "Service Binding").
///
/// Cloning is cheap (an `Arc` around the shared state) and clones refer to
/// the same binding — there is exactly one `keepAlive` task and at most
/// one watch per underlying binding, regardless of how many handles exist.
#[derive(Clone)]
pub struct RegistrationEngine {
    inner: Arc<EngineInner>,
}

impl RegistrationEngine {
    /// `adapter` is this binding's private store adapter (§9: distinct
    /// from a library-wide adapter used for Query API calls, so a busy
    /// renewal loop never contends with `Nodes`/`Services`).
    pub fn new(
        adapter: Arc<StoreClientAdapter>,
        namespace: impl Into<String>,
        service: impl Into<String>,
        name: impl Into<String>,
        uri: impl AsRef<str>,
    ) -> Result<Self, Error> {
        let namespace = namespace.into();
        let service = service.into();
        let name = name.into();
        validate_identifier(&service)?;
        validate_identifier(&name)?;
        let uri = parse_uri(uri.as_ref())?;
        let node_key = format!("{namespace}/{service}/{name}");
        let (signal_tx, signal_rx) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(EngineInner {
                adapter,
                namespace,
                service,
                uri,
                node_key,
                state: Mutex::new(State {
                    lease_id: None,
                    signal_tx: Some(signal_tx),
                    signal_rx,
                    keepalive_cancel: None,
                    watch_handle: None,
                }),
            }),
        })
    }

    /// Registers the binding (§4.1 "Register algorithm"). Idempotent: a
    /// second call while already registered is a no-op (P5).
    ///
    /// Store calls here go through the adapter's retry policy with no
    /// cancellation, so this future only resolves once the store accepts
    /// the registration or a logical rejection occurs; callers needing a
    /// bounded wait should wrap the call in `tokio::time::timeout` (§5).
    pub async fn register(&self, ttl: i64) -> Result<(), Error> {
        if ttl < 1 {
            return Err(Error::InvalidTtl(ttl));
        }

        let mut state = self.inner.state.lock().await;
        if state.lease_id.is_some() {
            return Ok(());
        }
        if state.signal_tx.is_none() {
            let (tx, rx) = watch::channel(None);
            state.signal_tx = Some(tx);
            state.signal_rx = rx;
        }

        let existing = self
            .inner
            .adapter
            .range_retrying(&self.inner.node_key, None)
            .await
            .map_err(Error::StoreUnreachable)?;

        let lease = match existing.into_iter().next() {
            Some(kv) if kv.lease != 0 && kv.value == self.inner.uri.as_str() => Lease {
                id: kv.lease,
                ttl,
            },
            _ => new_lease(&self.inner, ttl)
                .await
                .map_err(Error::RegistrationFailed)?,
        };

        state.lease_id = Some(lease.id);
        emit(&mut state, lease.id);

        let cancel = CancellationToken::new();
        state.keepalive_cancel = Some(cancel.clone());
        tokio::spawn(keep_alive_loop(self.inner.clone(), lease.ttl, cancel));

        Ok(())
    }

    /// Revokes the lease and clears local state (§4.1 "Unregister").
    /// Idempotent: calling it with no active lease is a no-op (P5).
    ///
    /// Per the open question in §9, on revoke failure local state is left
    /// untouched (still `Registered`) so a retried call is meaningful.
    pub async fn unregister(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock().await;
        let Some(lease_id) = state.lease_id else {
            return Ok(());
        };

        match self.inner.adapter.revoke_retrying(lease_id, None).await {
            Ok(true) => {
                if let Some(cancel) = state.keepalive_cancel.take() {
                    cancel.cancel();
                }
                state.lease_id = None;
                state.signal_tx.take();
                Ok(())
            }
            Ok(false) => Err(Error::UnregisterFailed(StoreError::msg(
                "revoke rejected by store",
            ))),
            Err(e) => Err(Error::UnregisterFailed(e)),
        }
    }

    pub async fn registered(&self) -> bool {
        self.inner.state.lock().await.lease_id.is_some()
    }

    /// A handle to the registration channel (§3 "registrationSignal").
    /// Always returns a receiver for the currently-open channel, even if
    /// `register` hasn't been called yet.
    pub async fn signal(&self) -> watch::Receiver<Option<i64>> {
        self.inner.state.lock().await.signal_rx.clone()
    }

    /// Begins watching this binding's service prefix (§4.4). Replaces any
    /// previously active watch, stopping it first.
    pub async fn monitor(
        &self,
        handler: impl Fn(Event) + Send + Sync + 'static,
    ) -> Result<(), Error> {
        let mut state = self.inner.state.lock().await;
        if let Some(old) = state.watch_handle.take() {
            old.stop().await;
        }
        let handle = start_watch(
            &self.inner.adapter,
            &self.inner.namespace,
            &self.inner.service,
            handler,
        )
        .await?;
        state.watch_handle = Some(handle);
        Ok(())
    }

    pub async fn unmonitor(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(handle) = state.watch_handle.take() {
            handle.stop().await;
        }
    }
}

fn emit(state: &mut State, lease_id: i64) {
    if let Some(tx) = &state.signal_tx {
        // A closed/unwatched channel errors here; that race is swallowed
        // per §4.1 step 6.
        let _ = tx.send(Some(lease_id));
    }
}

async fn new_lease(inner: &EngineInner, ttl: i64) -> Result<Lease, StoreError> {
    let lease = inner.adapter.grant_retrying(ttl, None).await?;
    let ok = inner
        .adapter
        .put_retrying(&inner.node_key, inner.uri.as_str(), lease.id, None)
        .await?;
    if !ok {
        return Err(StoreError::msg("put rejected by store after grant"));
    }
    Ok(lease)
}

async fn keep_alive_loop(inner: Arc<EngineInner>, mut ttl: i64, cancel: CancellationToken) {
    loop {
        let retry_interval = Duration::from_secs((ttl / 3).max(1) as u64);
        let start = Instant::now();

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(retry_interval) => {}
        }

        let still_registered = { inner.state.lock().await.lease_id };
        let Some(lease_id) = still_registered else {
            return;
        };

        let elapsed = start.elapsed();
        if elapsed > Duration::from_secs(ttl as u64) {
            log::warn!(
                "keepalive timer fired late ({:?} > {}s ttl); presuming lease {} expired",
                elapsed,
                ttl,
                lease_id
            );
            reacquire(&inner, &mut ttl).await;
            continue;
        }

        match inner.adapter.keep_alive(lease_id).await {
            Ok(Some(new_ttl)) => {
                let state = inner.state.lock().await;
                if state.lease_id == Some(lease_id) {
                    ttl = new_ttl;
                }
            }
            Ok(None) => {
                log::warn!("lease {} rejected by keep-alive; re-registering", lease_id);
                reacquire(&inner, &mut ttl).await;
            }
            Err(e) => {
                log::error!("keepalive tick for lease {} failed: {}", lease_id, e);
            }
        }
    }
}

/// Re-grants a lease and re-puts the binding after lease loss, adopting
/// the new id if the binding is still registered (§7 "Lease loss during
/// keep-alive").
async fn reacquire(inner: &Arc<EngineInner>, ttl: &mut i64) {
    match new_lease(inner, *ttl).await {
        Ok(lease) => {
            let mut state = inner.state.lock().await;
            if state.lease_id.is_some() {
                state.lease_id = Some(lease.id);
                *ttl = lease.ttl;
                emit(&mut state, lease.id);
            }
        }
        Err(e) => {
            log::error!("re-registration after lease loss failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeStore;
    use std::sync::Arc as StdArc;

    fn engine(store: StdArc<FakeStore>, service: &str, name: &str, uri: &str) -> RegistrationEngine {
        let adapter = StdArc::new(StoreClientAdapter::from_store(store));
        RegistrationEngine::new(adapter, "svc", service, name, uri).unwrap()
    }

    #[tokio::test]
    async fn s1_register_creates_lease_and_signals() {
        let store = StdArc::new(FakeStore::new());
        let eng = engine(store.clone(), "api", "n1", "http://a:80");
        eng.register(9).await.unwrap();
        assert!(eng.registered().await);

        let mut rx = eng.signal().await;
        rx.changed().await.unwrap();
        let id = rx.borrow().unwrap();

        let kvs = store.range("svc/api/n1").await.unwrap();
        assert_eq!(kvs.len(), 1);
        assert_eq!(kvs[0].value, "http://a:80/");
        assert_eq!(kvs[0].lease, id);
    }

    #[tokio::test]
    async fn s2_register_adopts_matching_existing_lease() {
        let store = StdArc::new(FakeStore::new());
        let l0 = store.seed("svc/api/n1", "http://a:80/", 9);
        let eng = engine(store.clone(), "api", "n1", "http://a:80");
        eng.register(9).await.unwrap();

        let mut rx = eng.signal().await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().unwrap(), l0);

        let kvs = store.range("svc/api/n1").await.unwrap();
        assert_eq!(kvs[0].lease, l0);
    }

    #[tokio::test]
    async fn s3_register_overwrites_mismatched_existing_lease() {
        let store = StdArc::new(FakeStore::new());
        let l0 = store.seed("svc/api/n1", "http://b:80/", 9);
        let eng = engine(store.clone(), "api", "n1", "http://a:80");
        eng.register(9).await.unwrap();

        let mut rx = eng.signal().await;
        rx.changed().await.unwrap();
        let l1 = rx.borrow().unwrap();
        assert_ne!(l1, l0);

        let kvs = store.range("svc/api/n1").await.unwrap();
        assert_eq!(kvs[0].value, "http://a:80/");
        assert_eq!(kvs[0].lease, l1);
    }

    #[tokio::test]
    async fn p5_register_twice_is_a_no_op() {
        let store = StdArc::new(FakeStore::new());
        let eng = engine(store.clone(), "api", "n1", "http://a:80");
        eng.register(9).await.unwrap();
        let kvs_before = store.range_prefix("svc/api/").await.unwrap();
        eng.register(9).await.unwrap();
        let kvs_after = store.range_prefix("svc/api/").await.unwrap();
        assert_eq!(kvs_before, kvs_after);
    }

    #[tokio::test]
    async fn p6_unregister_removes_key_and_is_idempotent() {
        let store = StdArc::new(FakeStore::new());
        let eng = engine(store.clone(), "api", "n1", "http://a:80");
        eng.register(9).await.unwrap();
        eng.unregister().await.unwrap();
        assert!(!eng.registered().await);
        assert!(store.range("svc/api/n1").await.unwrap().is_empty());
        // second call is a no-op, not an error (P5)
        eng.unregister().await.unwrap();
    }

    #[tokio::test]
    async fn unregister_without_register_is_a_no_op() {
        let store = StdArc::new(FakeStore::new());
        let eng = engine(store, "api", "n1", "http://a:80");
        eng.unregister().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_ttl() {
        let store = StdArc::new(FakeStore::new());
        let eng = engine(store, "api", "n1", "http://a:80");
        assert!(matches!(eng.register(0).await, Err(Error::InvalidTtl(0))));
    }

    #[tokio::test]
    async fn s4_lease_loss_triggers_reacquire_with_new_id() {
        tokio::time::pause();
        let store = StdArc::new(FakeStore::new());
        let eng = engine(store.clone(), "api", "n1", "http://a:80");
        eng.register(9).await.unwrap();

        let mut rx = eng.signal().await;
        rx.changed().await.unwrap();
        let l1 = rx.borrow().unwrap();

        store.expire_lease(l1);
        tokio::time::advance(Duration::from_secs(3)).await;
        rx.changed().await.unwrap();
        let l2 = rx.borrow().unwrap();

        assert_ne!(l1, l2);
        let kvs = store.range("svc/api/n1").await.unwrap();
        assert_eq!(kvs[0].lease, l2);
    }
}
