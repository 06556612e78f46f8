//! Per-key minimum-spacing gate for outbound API calls.
//!
//! Each key owns a fair async mutex holding the completion time of the last
//! task run under it. A task acquires the mutex, waits until
//! `last_completion + min_interval`, runs, and stamps its own completion
//! before releasing. Calls under one key are therefore serialized and spaced;
//! distinct keys never contend.
//!
//! This is not a token bucket: the protected APIs reject bursts outright.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Injectable outbound rate limiter keyed by API name.
#[derive(Debug, Default)]
pub struct RateLimiter {
    gates: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` no earlier than `min_interval` after the previous task
    /// under `key` completed. Never drops work; may delay the caller.
    pub async fn enqueue<F, Fut, T>(&self, key: &str, min_interval: Duration, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let gate = self.gate(key);
        let mut last_completion = gate.lock().await;

        if let Some(done) = *last_completion {
            let ready_at = done + min_interval;
            if ready_at > Instant::now() {
                debug!(key = %key, wait_ms = %(ready_at - Instant::now()).as_millis(), "Rate limiter delaying call");
                sleep_until(ready_at).await;
            }
        }

        let output = task().await;
        *last_completion = Some(Instant::now());
        output
    }

    /// Number of keys seen so far (gates are created lazily, never removed)
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.gates.len()
    }

    fn gate(&self, key: &str) -> Arc<Mutex<Option<Instant>>> {
        if let Some(existing) = self.gates.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.gates
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test(start_paused = true)]
    async fn test_same_key_spacing_measured_from_completion() {
        let limiter = Arc::new(RateLimiter::new());
        let interval = Duration::from_secs(2);
        let first_done = Arc::new(StdMutex::new(None));

        let l1 = Arc::clone(&limiter);
        let fd = Arc::clone(&first_done);
        let first = tokio::spawn(async move {
            l1.enqueue("crm", interval, || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                *fd.lock().unwrap() = Some(Instant::now());
            })
            .await
        });
        tokio::task::yield_now().await;

        let second_start = limiter
            .enqueue("crm", interval, || async { Instant::now() })
            .await;
        first.await.unwrap();

        let first_done = first_done.lock().unwrap().unwrap();
        assert!(second_start >= first_done + interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_run_concurrently() {
        let limiter = Arc::new(RateLimiter::new());
        let interval = Duration::from_secs(5);
        let started = Instant::now();

        // Hold the crm gate for a long task.
        let l1 = Arc::clone(&limiter);
        let crm = tokio::spawn(async move {
            l1.enqueue("crm", interval, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            })
            .await
        });
        tokio::task::yield_now().await;

        let email_start = limiter
            .enqueue("email", interval, || async { Instant::now() })
            .await;
        crm.await.unwrap();

        assert!(email_start - started < Duration::from_secs(1));
        assert_eq!(limiter.key_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_not_delayed() {
        let limiter = RateLimiter::new();
        let before = Instant::now();
        let at = limiter
            .enqueue("chat", Duration::from_secs(10), || async { Instant::now() })
            .await;
        assert_eq!(at, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_under_one_key_are_serialized() {
        let limiter = Arc::new(RateLimiter::new());
        let in_flight = Arc::new(StdMutex::new(0usize));
        let max_seen = Arc::new(StdMutex::new(0usize));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                limiter
                    .enqueue("crm", Duration::from_millis(100), || async {
                        {
                            let mut n = in_flight.lock().unwrap();
                            *n += 1;
                            let mut m = max_seen.lock().unwrap();
                            *m = (*m).max(*n);
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        *in_flight.lock().unwrap() -= 1;
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*max_seen.lock().unwrap(), 1);
    }
}
