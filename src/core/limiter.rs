// src/core/limiter.rs — Bounded worker pool over an independent-unit batch

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// What happened to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchReport {
    pub completed: usize,
    /// Units never dispatched because cancellation was observed first.
    pub skipped: usize,
}

impl BatchReport {
    pub fn cancelled(&self) -> bool {
        self.skipped > 0
    }
}

/// Runs units with at most `limit` in flight.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimiter {
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Dispatch `make(key)` for each key, keeping up to `limit` in flight.
    ///
    /// Cancellation is checked before every dispatch. Units already in
    /// flight always run to completion and are reported. `on_complete`
    /// fires in completion order, not submission order.
    pub async fn run<K, T, Fut, F, C>(
        &self,
        keys: Vec<K>,
        cancel: &CancellationToken,
        make: F,
        mut on_complete: C,
    ) -> BatchReport
    where
        K: Clone,
        F: Fn(K) -> Fut,
        Fut: Future<Output = T>,
        C: FnMut(K, T),
    {
        let mut pending = keys.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut report = BatchReport::default();

        loop {
            while in_flight.len() < self.limit && !cancel.is_cancelled() {
                let Some(key) = pending.next() else {
                    break;
                };
                let fut = make(key.clone());
                in_flight.push(async move { (key, fut.await) });
            }

            match in_flight.next().await {
                Some((key, value)) => {
                    on_complete(key, value);
                    report.completed += 1;
                }
                None => break,
            }
        }

        report.skipped = pending.count();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_all_units() {
        let limiter = ConcurrencyLimiter::new(3);
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        let report = limiter
            .run(
                (0..10).collect(),
                &cancel,
                |i: usize| async move { i * 2 },
                |k, v| seen.push((k, v)),
            )
            .await;
        assert_eq!(report.completed, 10);
        assert!(!report.cancelled());
        seen.sort();
        assert_eq!(seen[9], (9, 18));
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let limiter = ConcurrencyLimiter::new(2);
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        limiter
            .run(
                (0..8).collect::<Vec<usize>>(),
                &cancel,
                |_| {
                    let active = active.clone();
                    let peak = peak.clone();
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                },
                |_, _| {},
            )
            .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_completion_order_not_submission_order() {
        let limiter = ConcurrencyLimiter::new(2);
        let cancel = CancellationToken::new();
        let mut order = Vec::new();
        limiter
            .run(
                vec![0usize, 1],
                &cancel,
                |i| async move {
                    let ms = if i == 0 { 30 } else { 1 };
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                },
                |k, _| order.push(k),
            )
            .await;
        assert_eq!(order, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch_but_keeps_in_flight() {
        let limiter = ConcurrencyLimiter::new(2);
        let cancel = CancellationToken::new();
        let dispatched = Arc::new(AtomicUsize::new(0));
        let mut results = Vec::new();
        let report = limiter
            .run(
                (0..10).collect::<Vec<usize>>(),
                &cancel,
                |i| {
                    let dispatched = dispatched.clone();
                    async move {
                        dispatched.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        i
                    }
                },
                |k, _| {
                    results.push(k);
                    if results.len() == 3 {
                        cancel.cancel();
                    }
                },
            )
            .await;
        // 3 completed + at most one more already in flight
        assert!(report.completed >= 3 && report.completed <= 4);
        assert_eq!(report.completed, results.len());
        assert_eq!(dispatched.load(Ordering::SeqCst), report.completed);
        assert_eq!(report.completed + report.skipped, 10);
        assert!(report.cancelled());
    }

    #[tokio::test]
    async fn test_pre_cancelled_dispatches_nothing() {
        let limiter = ConcurrencyLimiter::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = limiter
            .run(vec![1, 2, 3], &cancel, |i: i32| async move { i }, |_, _| {})
            .await;
        assert_eq!(report.completed, 0);
        assert_eq!(report.skipped, 3);
    }

    #[test]
    fn test_zero_limit_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).limit(), 1);
    }
}
