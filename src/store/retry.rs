//! Exponential backoff with jitter (§4.5), built the same way the teacher
//! builds its retry policy in `lease.rs` — `tokio_retry`'s
//! `ExponentialBackoff` strategy, driven through `Retry::spawn`.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;

const BASE_MS: u64 = 50;
const CAP: Duration = Duration::from_secs(10);

/// The crate-wide backoff policy: base 50ms, capped at 10s, plus up to
/// 100ms of jitter, retried indefinitely until success or cancellation.
#[derive(Clone)]
pub struct Backoff {
    strategy: ExponentialBackoff,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            strategy: ExponentialBackoff::from_millis(BASE_MS).max_delay(CAP),
        }
    }
}

/// A retry-delay iterator that stops yielding once `cancel` fires, so
/// `tokio_retry` gives up and surfaces the last attempt's error instead of
/// scheduling another one. `None` means "never cancelled".
struct CancellableStrategy<I> {
    inner: I,
    cancel: Option<CancellationToken>,
}

impl<I: Iterator<Item = Duration>> Iterator for CancellableStrategy<I> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => None,
            _ => self.inner.next(),
        }
    }
}

impl Backoff {
    /// Runs `op` under this policy until it succeeds, `cancel` fires, or
    /// (with no cancellation token) forever — matching §4.5's "retried
    /// indefinitely until success or explicit cancellation".
    pub async fn retry<F, Fut, T, E>(
        &self,
        cancel: Option<&CancellationToken>,
        op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let strategy = CancellableStrategy {
            inner: self.strategy.clone().map(jitter),
            cancel: cancel.cloned(),
        };
        Retry::spawn(strategy, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let backoff = Backoff::default();
        let attempts = AtomicUsize::new(0);
        let result: Result<i32, &str> = backoff
            .retry(None, || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
