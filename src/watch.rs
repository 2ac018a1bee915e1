//! Watch & Event Parser (§4.4).

use std::sync::Arc;

use crate::error::StoreError;
use crate::store::adapter::StoreClientAdapter;
use crate::store::{EventKind, RawEvent, WatchHandle};

/// A typed membership-change notification, parsed from a raw store watch
/// event (§3 "Event").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub key: String,
    pub value: Option<String>,
    pub kind: EventKind,
    pub namespace: String,
    pub service: Option<String>,
}

/// Splits `key` on `/`, taking the first segment as `namespace` and the
/// second (if present) as `service` (§4.4). Assumes the namespace is
/// exactly one path segment — a nested namespace would need a richer
/// parser (§9 open question).
fn parse_event(raw: RawEvent) -> Event {
    let mut tokens = raw.key.split('/');
    let namespace = tokens.next().unwrap_or("").to_string();
    let service = tokens.next().map(|s| s.to_string());
    Event {
        key: raw.key,
        value: raw.value,
        kind: raw.kind,
        namespace,
        service,
    }
}

/// Subscribes to `"<namespace>/<service>"` and invokes `handler` for every
/// parsed event, in delivery order, until the returned handle is stopped.
/// A handler panic is caught and logged rather than propagated, so one bad
/// event can't tear down the subscription (§4.4).
pub async fn watch(
    adapter: &StoreClientAdapter,
    namespace: &str,
    service: &str,
    handler: impl Fn(Event) + Send + Sync + 'static,
) -> Result<Box<dyn WatchHandle>, StoreError> {
    let prefix = format!("{namespace}/{service}");
    let handler = Arc::new(handler);
    adapter
        .watch_prefix(
            &prefix,
            Box::new(move |raw: RawEvent| {
                let event = parse_event(raw);
                let handler = handler.clone();
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event))).is_err()
                {
                    log::error!("watch handler panicked; continuing delivery");
                }
            }),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeStore;
    use crate::store::Store;
    use std::sync::Mutex;

    #[test]
    fn parses_namespace_and_service() {
        let event = parse_event(RawEvent {
            key: "svc/api/n3".to_string(),
            value: Some("http://c:80".to_string()),
            kind: EventKind::Put,
        });
        assert_eq!(event.namespace, "svc");
        assert_eq!(event.service.as_deref(), Some("api"));
        assert_eq!(event.value.as_deref(), Some("http://c:80"));
    }

    #[test]
    fn delete_event_has_no_value() {
        let event = parse_event(RawEvent {
            key: "svc/api/n3".to_string(),
            value: None,
            kind: EventKind::Delete,
        });
        assert_eq!(event.kind, EventKind::Delete);
        assert!(event.value.is_none());
    }

    #[test]
    fn missing_service_segment_is_none() {
        let event = parse_event(RawEvent {
            key: "svc".to_string(),
            value: None,
            kind: EventKind::Delete,
        });
        assert_eq!(event.namespace, "svc");
        assert!(event.service.is_none());
    }

    #[tokio::test]
    async fn s6_monitor_delivers_put_then_delete() {
        let store = Arc::new(FakeStore::new());
        let adapter = StoreClientAdapter::from_store(store.clone());
        let received: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        let _handle = watch(&adapter, "svc", "api", move |event| {
            received_clone.lock().unwrap().push(event);
        })
        .await
        .unwrap();

        let lease = store.grant(10).await.unwrap();
        store.put("svc/api/n3", "http://c:80", lease.id).await.unwrap();
        store.revoke(lease.id).await.unwrap();

        let events = received.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Put);
        assert_eq!(events[0].value.as_deref(), Some("http://c:80"));
        assert_eq!(events[0].namespace, "svc");
        assert_eq!(events[0].service.as_deref(), Some("api"));
        assert_eq!(events[1].kind, EventKind::Delete);
        assert!(events[1].value.is_none());
    }
}
