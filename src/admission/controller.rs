//! # AdmissionController: bounded queue plus parallelism limit.
//!
//! ```text
//! process(f, cancel)
//!   ├─► overload probe (cached)      → true  → Rejected
//!   ├─► outstanding < queue limit?   → no    → Rejected
//!   ├─► outstanding += 1             (released on any exit, including drop)
//!   ├─► acquire parallelism slot     → cancel → Canceled
//!   └─► f(cancel).await              → Admitted(output)
//! ```
//!
//! The output of `f` is returned untouched, so errors reach the caller unchanged.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::select;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{Bus, Event, EventKind};

use super::{
    AdmissionConfig, NeverOverloaded, OverloadProbe, RejectReason, Rejection, RejectionHandler,
    StatusRejection,
};

/// Outcome of [`AdmissionController::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<T> {
    /// The request ran; this is its output.
    Admitted(T),
    /// The request was turned away without running.
    Rejected(Rejection),
    /// The caller cancelled while the request waited for a slot.
    Canceled,
}

impl<T> Admission<T> {
    /// `true` for [`Admission::Rejected`].
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected(_))
    }

    /// Output of an admitted request.
    pub fn admitted(self) -> Option<T> {
        match self {
            Admission::Admitted(v) => Some(v),
            _ => None,
        }
    }
}

/// Throttles concurrent request processing.
pub struct AdmissionController {
    config: AdmissionConfig,
    semaphore: Option<Arc<Semaphore>>,
    outstanding: AtomicUsize,
    probe: Arc<dyn OverloadProbe>,
    rejection: Arc<dyn RejectionHandler>,
    overload: Mutex<Option<(Instant, bool)>>,
    bus: Bus,
}

impl AdmissionController {
    /// Creates a controller with the default probe and rejection handler.
    pub fn new(config: AdmissionConfig, bus: Bus) -> Self {
        let rejection = Arc::new(StatusRejection::new(config.rejection_status));
        Self {
            semaphore: config
                .parallelism_limit()
                .map(|n| Arc::new(Semaphore::new(n))),
            config,
            outstanding: AtomicUsize::new(0),
            probe: Arc::new(NeverOverloaded),
            rejection,
            overload: Mutex::new(None),
            bus,
        }
    }

    /// Replaces the overload probe.
    pub fn with_probe(mut self, probe: Arc<dyn OverloadProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the rejection handler.
    pub fn with_rejection_handler(mut self, handler: Arc<dyn RejectionHandler>) -> Self {
        self.rejection = handler;
        self
    }

    /// Requests admitted and not yet completed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Runs `f` if limits allow it.
    pub async fn process<F, Fut, T>(&self, f: F, cancel: CancellationToken) -> Admission<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        if self.is_overloaded().await {
            return Admission::Rejected(self.reject(RejectReason::Overloaded));
        }

        let Some(_outstanding) = self.reserve() else {
            let limit = self.config.max_queue_length;
            return Admission::Rejected(self.reject(RejectReason::QueueFull { limit }));
        };

        let _permit = match &self.semaphore {
            Some(sem) => select! {
                permit = sem.acquire() => match permit {
                    Ok(p) => Some(p),
                    Err(_closed) => return Admission::Canceled,
                },
                _ = cancel.cancelled() => return Admission::Canceled,
            },
            None => None,
        };

        Admission::Admitted(f(cancel).await)
    }

    fn reserve(&self) -> Option<Outstanding<'_>> {
        let limit = self.config.queue_limit();
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| match limit {
                Some(max) if cur >= max => None,
                _ => Some(cur + 1),
            })
            .ok()
            .map(|_| Outstanding(&self.outstanding))
    }

    async fn is_overloaded(&self) -> bool {
        let cached = *self.overload.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((at, value)) = cached {
            if at.elapsed() < self.config.overload_check_interval {
                return value;
            }
        }
        let value = self.probe.is_overloaded().await;
        *self.overload.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((Instant::now(), value));
        value
    }

    fn reject(&self, reason: RejectReason) -> Rejection {
        let message = reason.describe();
        tracing::warn!("{message}");
        self.bus
            .publish(Event::new(EventKind::InvocationRejected).with_reason(message));
        self.rejection.reject(reason)
    }
}

/// Decrements the outstanding counter when dropped.
struct Outstanding<'a>(&'a AtomicUsize);

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn controller(parallelism: usize, queue: usize) -> AdmissionController {
        AdmissionController::new(
            AdmissionConfig {
                max_degree_of_parallelism: parallelism,
                max_queue_length: queue,
                ..AdmissionConfig::default()
            },
            Bus::new(64),
        )
    }

    async fn work(ms: u64) -> &'static str {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        "done"
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_limit_rejects_excess_requests() {
        let ctl = controller(1, 10);
        let bus_rx = ctl.bus.subscribe();

        let results = join_all(
            (0..25).map(|_| ctl.process(|_ctx| work(100), CancellationToken::new())),
        )
        .await;

        let accepted = results
            .iter()
            .filter(|r| matches!(r, Admission::Admitted("done")))
            .count();
        let rejected: Vec<_> = results
            .iter()
            .filter_map(|r| match r {
                Admission::Rejected(rej) => Some(rej),
                _ => None,
            })
            .collect();
        assert_eq!(accepted, 10);
        assert_eq!(rejected.len(), 15);
        assert!(rejected.iter().all(|r| r.status == 429
            && r.body == "request queue limit of 10 has been exceeded."));
        assert_eq!(ctl.outstanding(), 0);
        assert_eq!(bus_rx.len(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_up_to_queue_limit_all_succeed() {
        let ctl = controller(1, 10);
        let bus_rx = ctl.bus.subscribe();

        let results = join_all(
            (0..10).map(|_| ctl.process(|_ctx| work(100), CancellationToken::new())),
        )
        .await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| matches!(r, Admission::Admitted("done"))));
        assert_eq!(ctl.outstanding(), 0);
        assert_eq!(bus_rx.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallelism_is_bounded() {
        let ctl = controller(2, 0);
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let (running, peak) = (&running, &peak);

        let results = join_all((0..6).map(|_| {
            ctl.process(
                |_ctx| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                },
                CancellationToken::new(),
            )
        }))
        .await;

        assert!(results.iter().all(|r| matches!(r, Admission::Admitted(()))));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unlimited_dispatches_directly() {
        let ctl = controller(0, 0);
        let out = ctl
            .process(|_ctx| async { 7 }, CancellationToken::new())
            .await;
        assert_eq!(out, Admission::Admitted(7));
    }

    #[tokio::test]
    async fn test_errors_propagate_unchanged() {
        let ctl = controller(1, 1);
        let out: Admission<Result<(), String>> = ctl
            .process(|_ctx| async { Err("boom".to_string()) }, CancellationToken::new())
            .await;
        assert_eq!(out.admitted(), Some(Err("boom".to_string())));
        assert_eq!(ctl.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_slot() {
        let ctl = controller(1, 5);
        let cancel = CancellationToken::new();
        let ran = AtomicBool::new(false);
        let ran_ref = &ran;

        let first = ctl.process(|_ctx| work(100), CancellationToken::new());
        let second = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(ctl.outstanding(), 1);
            cancel.cancel();
            ctl.process(
                |_ctx| async move {
                    ran_ref.store(true, Ordering::SeqCst);
                },
                cancel.clone(),
            )
            .await
        };
        let (a, b) = tokio::join!(first, second);

        assert_eq!(a, Admission::Admitted("done"));
        assert_eq!(b, Admission::Canceled);
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(ctl.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_releases_its_place() {
        let ctl = controller(1, 1);
        {
            let fut = ctl.process(|_ctx| work(1_000), CancellationToken::new());
            let _ = tokio::time::timeout(Duration::from_millis(10), fut).await;
        }
        assert_eq!(ctl.outstanding(), 0);
        let out = ctl.process(|_ctx| work(1), CancellationToken::new()).await;
        assert_eq!(out, Admission::Admitted("done"));
    }

    struct CountingProbe {
        calls: AtomicUsize,
        overloaded: bool,
    }

    #[async_trait]
    impl OverloadProbe for CountingProbe {
        async fn is_overloaded(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.overloaded
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overload_probe_is_cached() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            overloaded: true,
        });
        let ctl = AdmissionController::new(
            AdmissionConfig {
                overload_check_interval: Duration::from_secs(1),
                ..AdmissionConfig::default()
            },
            Bus::new(16),
        )
        .with_probe(probe.clone());

        for _ in 0..5 {
            let out = ctl.process(|_ctx| async {}, CancellationToken::new()).await;
            assert_eq!(
                out,
                Admission::Rejected(Rejection {
                    status: 429,
                    body: "host is overloaded.".into()
                })
            );
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1_100)).await;
        let _ = ctl.process(|_ctx| async {}, CancellationToken::new()).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    struct SlowProbe {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl OverloadProbe for SlowProbe {
        async fn is_overloaded(&self) -> bool {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_overload_check_does_not_serialize_requests() {
        let probe = Arc::new(SlowProbe {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let ctl = controller(0, 0).with_probe(probe.clone());

        let started = Instant::now();
        let (a, b) = tokio::join!(
            ctl.process(|_ctx| async { 1 }, CancellationToken::new()),
            ctl.process(|_ctx| async { 2 }, CancellationToken::new()),
        );

        assert_eq!(a, Admission::Admitted(1));
        assert_eq!(b, Admission::Admitted(2));
        assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    struct Teapot;

    impl RejectionHandler for Teapot {
        fn reject(&self, reason: RejectReason) -> Rejection {
            Rejection {
                status: 418,
                body: format!("{reason:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_rejection_handler() {
        let ctl = controller(1, 1).with_rejection_handler(Arc::new(Teapot));
        let (a, b) = tokio::join!(
            ctl.process(|_ctx| work(10), CancellationToken::new()),
            ctl.process(|_ctx| work(10), CancellationToken::new()),
        );
        assert_eq!(a, Admission::Admitted("done"));
        assert_eq!(
            b,
            Admission::Rejected(Rejection {
                status: 418,
                body: "QueueFull { limit: 1 }".into()
            })
        );
    }
}
