//! # IntervalSeparationTimer: run a command repeatedly with a pause between runs.
//!
//! Unlike a fixed-rate ticker, the pause is measured from the **end** of one
//! execution to the **start** of the next, so executions never overlap.
//!
//! ```text
//! start() ─► loop {
//!              ├─► sleep(command.separation_interval())   (cancellable)
//!              ├─► exec token = child of run token
//!              └─► command.execute(exec token)
//!                    ├─► Ok / Canceled  → continue
//!                    └─► Err / panic    → FaultHandler::dispatch
//!            }
//!
//! cancel()  → cancels the current execution only, the loop keeps going
//! stop()    → cancels the run token and waits for the loop to exit
//! dispose() → cancels the run token and returns immediately (idempotent)
//! ```
//!
//! ## Lifecycle
//! ```text
//! Idle ──start──► Running ──stop──► Stopped
//!   │                │                 │
//!   └────────────────┴──── dispose ────┴──► Disposed
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::{select, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::error::{CommandError, TimerError, describe_panic};
use crate::timer::{AbortOnFault, FaultHandler, IntervalCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
    Disposed,
}

struct Inner {
    phase: Phase,
    run: CancellationToken,
    join: Option<JoinHandle<()>>,
}

/// Periodic runner with end-to-start separation between executions.
///
/// Must be started from within a tokio runtime.
pub struct IntervalSeparationTimer {
    command: Arc<dyn IntervalCommand>,
    faults: Arc<dyn FaultHandler>,
    current: Arc<Mutex<CancellationToken>>,
    inner: Mutex<Inner>,
}

impl IntervalSeparationTimer {
    /// Creates a timer whose faults abort the process.
    pub fn new(command: Arc<dyn IntervalCommand>) -> Self {
        Self::with_fault_handler(command, Arc::new(AbortOnFault))
    }

    /// Creates a timer with a custom fault handler.
    pub fn with_fault_handler(
        command: Arc<dyn IntervalCommand>,
        faults: Arc<dyn FaultHandler>,
    ) -> Self {
        Self {
            command,
            faults,
            current: Arc::new(Mutex::new(CancellationToken::new())),
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                run: CancellationToken::new(),
                join: None,
            }),
        }
    }

    /// Starts the background loop.
    ///
    /// The first execution happens after the command's current separation interval.
    pub fn start(&self) -> Result<(), TimerError> {
        let mut inner = self.lock();
        match inner.phase {
            Phase::Idle => {}
            Phase::Disposed => return Err(TimerError::Disposed),
            Phase::Running | Phase::Stopped => return Err(TimerError::AlreadyStarted),
        }

        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.command),
            Arc::clone(&self.faults),
            inner.run.clone(),
            Arc::clone(&self.current),
        ));
        inner.join = Some(handle);
        inner.phase = Phase::Running;
        Ok(())
    }

    /// Cancels the execution in progress, if any. The loop keeps running.
    pub fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Stops the loop and waits until the in-flight execution has finished.
    pub async fn stop(&self) -> Result<(), TimerError> {
        let join = {
            let mut inner = self.lock();
            match inner.phase {
                Phase::Running => {}
                Phase::Idle => return Err(TimerError::NotStarted),
                Phase::Stopped => return Err(TimerError::AlreadyStopped),
                Phase::Disposed => return Err(TimerError::Disposed),
            }
            inner.phase = Phase::Stopped;
            inner.run.cancel();
            inner.join.take()
        };
        if let Some(join) = join {
            let _ = join.await;
        }
        Ok(())
    }

    /// Cancels the loop without waiting for it. Safe to call more than once.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        if inner.phase == Phase::Disposed {
            return;
        }
        inner.phase = Phase::Disposed;
        inner.run.cancel();
        inner.join = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for IntervalSeparationTimer {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_loop(
    command: Arc<dyn IntervalCommand>,
    faults: Arc<dyn FaultHandler>,
    run: CancellationToken,
    current: Arc<Mutex<CancellationToken>>,
) {
    loop {
        let wait = command.separation_interval();
        if !wait.is_zero() {
            let sleep = time::sleep(wait);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = run.cancelled() => break,
            }
        }
        if run.is_cancelled() {
            break;
        }

        let exec = run.child_token();
        *current.lock().unwrap_or_else(PoisonError::into_inner) = exec.clone();

        match AssertUnwindSafe(command.execute(exec)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_canceled() => {}
            Ok(Err(e)) => faults.dispatch(e),
            Err(panic) => faults.dispatch(CommandError::Fail {
                error: format!("command panicked: {}", describe_panic(panic.as_ref())),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::CommandFn;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        faults: Mutex<Vec<String>>,
        notify: Notify,
    }

    impl FaultHandler for Recorder {
        fn dispatch(&self, fault: CommandError) {
            self.faults.lock().unwrap().push(fault.to_string());
            self.notify.notify_one();
        }
    }

    fn counting(interval: Duration, hits: Arc<AtomicUsize>, tick: Arc<Notify>) -> Arc<dyn IntervalCommand> {
        CommandFn::arc(interval, move |_ctx: CancellationToken| {
            let hits = hits.clone();
            let tick = tick.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                tick.notify_one();
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_executes_repeatedly_until_stopped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let tick = Arc::new(Notify::new());
        let timer = IntervalSeparationTimer::new(counting(
            Duration::from_millis(1),
            hits.clone(),
            tick.clone(),
        ));

        timer.start().unwrap();
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), tick.notified())
                .await
                .unwrap();
        }
        timer.stop().await.unwrap();

        let after_stop = hits.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_lifecycle_misuse_is_rejected() {
        let tick = Arc::new(Notify::new());
        let timer = IntervalSeparationTimer::new(counting(
            Duration::from_secs(60),
            Arc::new(AtomicUsize::new(0)),
            tick,
        ));

        assert_eq!(timer.stop().await, Err(TimerError::NotStarted));
        timer.start().unwrap();
        assert_eq!(timer.start(), Err(TimerError::AlreadyStarted));
        timer.stop().await.unwrap();
        assert_eq!(timer.stop().await, Err(TimerError::AlreadyStopped));
        assert_eq!(timer.start(), Err(TimerError::AlreadyStarted));

        timer.dispose();
        timer.dispose();
        assert_eq!(timer.start(), Err(TimerError::Disposed));
    }

    #[tokio::test]
    async fn test_dispose_never_started_is_noop() {
        let timer = IntervalSeparationTimer::new(counting(
            Duration::from_millis(1),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(Notify::new()),
        ));
        timer.dispose();
        timer.dispose();
    }

    #[tokio::test]
    async fn test_stop_waits_for_inflight_execution() {
        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (started.clone(), finished.clone());
        let cmd = CommandFn::arc(Duration::ZERO, move |ctx: CancellationToken| {
            let (s, f) = (s.clone(), f.clone());
            async move {
                s.notify_one();
                ctx.cancelled().await;
                tokio::time::sleep(Duration::from_millis(30)).await;
                f.store(true, Ordering::SeqCst);
                Err(CommandError::Canceled)
            }
        });

        let timer = IntervalSeparationTimer::new(cmd);
        timer.start().unwrap();
        started.notified().await;
        timer.stop().await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispose_does_not_wait() {
        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (started.clone(), finished.clone());
        let cmd = CommandFn::arc(Duration::ZERO, move |_ctx: CancellationToken| {
            let (s, f) = (s.clone(), f.clone());
            async move {
                s.notify_one();
                tokio::time::sleep(Duration::from_millis(200)).await;
                f.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

        let timer = IntervalSeparationTimer::new(cmd);
        timer.start().unwrap();
        started.notified().await;
        timer.dispose();
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_current_execution_only() {
        let runs = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(Notify::new());
        let (r, e) = (runs.clone(), entered.clone());
        let cmd = CommandFn::arc(Duration::ZERO, move |ctx: CancellationToken| {
            let (r, e) = (r.clone(), e.clone());
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                e.notify_one();
                ctx.cancelled().await;
                Err(CommandError::Canceled)
            }
        });

        let faults = Arc::new(Recorder::default());
        let timer = IntervalSeparationTimer::with_fault_handler(cmd, faults.clone());
        timer.start().unwrap();

        entered.notified().await;
        timer.cancel();
        tokio::time::timeout(Duration::from_secs(1), entered.notified())
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(faults.faults.lock().unwrap().is_empty());
        timer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_errors_and_panics_reach_fault_handler() {
        let n = Arc::new(AtomicUsize::new(0));
        let counter = n.clone();
        let cmd = CommandFn::arc(Duration::from_millis(1), move |_ctx: CancellationToken| {
            let i = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if i == 0 {
                    Err(CommandError::Fail {
                        error: "boom".into(),
                    })
                } else {
                    panic!("kaboom")
                }
            }
        });

        let faults = Arc::new(Recorder::default());
        let timer = IntervalSeparationTimer::with_fault_handler(cmd, faults.clone());
        timer.start().unwrap();
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(1), faults.notify.notified())
                .await
                .unwrap();
        }
        timer.dispose();

        let seen = faults.faults.lock().unwrap().clone();
        assert!(seen[0].contains("boom"));
        assert!(seen[1].contains("kaboom"));
    }

    #[tokio::test]
    async fn test_separation_measured_from_end_of_execution() {
        let stamps = Arc::new(Mutex::new(Vec::<(Instant, Instant)>::new()));
        let done = Arc::new(Notify::new());
        let (st, d) = (stamps.clone(), done.clone());
        let cmd = CommandFn::arc(Duration::from_millis(30), move |_ctx: CancellationToken| {
            let (st, d) = (st.clone(), d.clone());
            async move {
                let begin = Instant::now();
                tokio::time::sleep(Duration::from_millis(20)).await;
                let mut v = st.lock().unwrap();
                v.push((begin, Instant::now()));
                if v.len() == 3 {
                    d.notify_one();
                }
                Ok(())
            }
        });

        let timer = IntervalSeparationTimer::new(cmd);
        timer.start().unwrap();
        tokio::time::timeout(Duration::from_secs(2), done.notified())
            .await
            .unwrap();
        timer.stop().await.unwrap();

        let v = stamps.lock().unwrap();
        for pair in v.windows(2) {
            assert!(pair[1].0.duration_since(pair[0].1) >= Duration::from_millis(30));
        }
    }
}
