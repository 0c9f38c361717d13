//! Bounded worker pool that runs promoted tasks.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::SchedulerConfig;
use crate::dispatcher::RetryDispatcher;
use crate::report::{PoolStats, RejectionEvent, Reporter};
use crate::retry::RetryError;
use crate::task::RetryTask;

/// A worker pool with a bounded backing queue.
///
/// Submission never blocks. A task goes to a new core worker's queue, then to
/// the backing queue, then to a new extra worker; if all of those are full the
/// task is shed: logged, counted, reported, and its handle resolves to
/// [`RetryError::PoolSaturated`].
///
/// Workers run [`RetryDispatcher::attempt`] to completion for each task and are
/// reused. Workers above `core_workers` exit after `worker_keep_alive` idle.
pub struct RetryExecutor {
    dispatcher: Arc<RetryDispatcher>,
    reporter: Reporter,
    core_workers: usize,
    max_workers: usize,
    keep_alive: Duration,
    tx: mpsc::Sender<RetryTask>,
    rx: tokio::sync::Mutex<mpsc::Receiver<RetryTask>>,
    workers: AtomicUsize,
    busy: AtomicUsize,
    submitted: AtomicU64,
    rejected: AtomicU64,
    next_worker_id: AtomicUsize,
    handles: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
}

impl RetryExecutor {
    /// Create an idle pool. Workers are spawned on demand.
    pub fn new(
        dispatcher: Arc<RetryDispatcher>,
        config: &SchedulerConfig,
        reporter: Reporter,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.backlog_capacity.max(1));
        Arc::new(Self {
            dispatcher,
            reporter,
            core_workers: config.core_workers,
            max_workers: config.max_workers.max(config.core_workers),
            keep_alive: config.worker_keep_alive,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            workers: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            next_worker_id: AtomicUsize::new(0),
            handles: Mutex::new(JoinSet::new()),
            shutdown: watch::channel(false).0,
        })
    }

    /// Hand `task` to the pool, shedding it if the pool is saturated.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(self: &Arc<Self>, task: RetryTask) {
        if self.is_closed() {
            tracing::debug!(unit = task.name(), "executor stopped, dropping task");
            return;
        }
        self.submitted.fetch_add(1, Ordering::SeqCst);

        if self.reserve_worker(self.core_workers) {
            self.spawn_worker(None, true);
        }

        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) => {
                if self.reserve_worker(self.max_workers) {
                    self.spawn_worker(Some(task), false);
                } else {
                    self.reject(task);
                }
            }
            Err(TrySendError::Closed(task)) => self.reject(task),
        }
    }

    /// Snapshot of the pool's saturation state.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.load(Ordering::SeqCst),
            busy: self.busy.load(Ordering::SeqCst),
            max_workers: self.max_workers,
            backlog: self.tx.max_capacity() - self.tx.capacity(),
            backlog_capacity: self.tx.max_capacity(),
            submitted: self.submitted.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting tasks and tell idle workers to exit, without waiting.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns true once [`close`](Self::close) or
    /// [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop accepting tasks and wait for every worker to exit.
    ///
    /// Tasks already running finish; tasks still in the backing queue are
    /// dropped, which abandons their handles.
    pub async fn shutdown(&self) {
        self.close();

        let mut workers = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "retry worker ended abnormally");
            }
        }

        let mut dropped = 0usize;
        {
            let mut rx = self.rx.lock().await;
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
        }
        tracing::debug!(dropped, "retry executor stopped");
    }

    fn reserve_worker(&self, limit: usize) -> bool {
        self.workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn spawn_worker(self: &Arc<Self>, first: Option<RetryTask>, core: bool) {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let span = tracing::debug_span!("retry_worker", id, core);
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        while handles.try_join_next().is_some() {}
        handles.spawn(self.clone().work(first, core).instrument(span));
    }

    async fn work(self: Arc<Self>, mut next: Option<RetryTask>, core: bool) {
        tracing::debug!("retry worker started");
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let task = match next.take() {
                Some(task) => task,
                None => {
                    let stopped = *shutdown.borrow();
                    if stopped {
                        break;
                    }
                    match self.next_task(core, &mut shutdown).await {
                        Some(task) => task,
                        None => break,
                    }
                }
            };

            let unit = task.name().to_owned();
            self.busy.fetch_add(1, Ordering::SeqCst);
            let ran = AssertUnwindSafe(self.dispatcher.run(task))
                .catch_unwind()
                .await;
            self.busy.fetch_sub(1, Ordering::SeqCst);
            if ran.is_err() {
                tracing::error!(unit = %unit, "unit panicked, task dropped");
            }
        }
        self.workers.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("retry worker exiting");
    }

    async fn next_task(
        &self,
        core: bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<RetryTask> {
        let idle = async { self.rx.lock().await.recv().await };
        if core {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => None,
                task = idle => task,
            }
        } else {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => None,
                task = tokio::time::timeout(self.keep_alive, idle) => task.ok().flatten(),
            }
        }
    }

    fn reject(&self, task: RetryTask) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        let event = RejectionEvent {
            unit: task.name().to_owned(),
            attempts: task.attempt(),
            stats: self.stats(),
        };
        self.reporter.rejected(&event);
        task.finish(Err(RetryError::PoolSaturated {
            unit: event.unit,
            attempts: event.attempts,
        }));
    }
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("core_workers", &self.core_workers)
            .field("max_workers", &self.max_workers)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RetryQueue;
    use crate::retry::{BoxError, RetryPolicy};
    use crate::task::RetryHandle;
    use crate::unit::{FnUnit, RetryableUnit};
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Semaphore;
    use tracing_test::traced_test;

    fn executor(core: usize, max: usize, backlog: usize, reporter: Reporter) -> Arc<RetryExecutor> {
        let dispatcher = Arc::new(RetryDispatcher::new(
            Arc::new(RetryQueue::new()),
            reporter.clone(),
        ));
        let config = SchedulerConfig::default()
            .with_workers(core, max)
            .with_backlog_capacity(backlog)
            .with_worker_keep_alive(Duration::from_millis(50));
        RetryExecutor::new(dispatcher, &config, reporter)
    }

    fn gated(name: &str, gate: &Arc<Semaphore>) -> (RetryTask, RetryHandle) {
        let gate = gate.clone();
        let unit = FnUnit::new(name, move || {
            let gate = gate.clone();
            async move {
                let _permit = gate.acquire().await?;
                Ok::<_, BoxError>(())
            }
        });
        let (task, handle) = RetryTask::with_handle(unit, Arc::new(RetryPolicy::default()));
        (task.detach(), handle)
    }

    async fn until(mut ready: impl FnMut() -> bool) {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_runs_submitted_task() {
        let pool = executor(1, 1, 4, Reporter::new());
        let unit = FnUnit::new("ok", || async { Ok::<_, BoxError>(()) });
        let (task, handle) = RetryTask::with_handle(unit, Arc::new(RetryPolicy::default()));

        pool.submit(task.detach());

        let report = handle.wait().await.unwrap();
        assert_eq!(report.unit, "ok");
        assert_eq!(pool.stats().workers, 1);
        assert_eq!(pool.stats().submitted, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_saturated_pool_sheds_and_reports() {
        let shed = Arc::new(AtomicU32::new(0));
        let reporter = Reporter::new().on_rejected({
            let shed = shed.clone();
            move |event| {
                assert_eq!(event.unit, "third");
                assert_eq!(event.stats.busy, 1);
                assert_eq!(event.stats.backlog, 1);
                shed.fetch_add(1, Ordering::SeqCst);
            }
        });
        let pool = executor(1, 1, 1, reporter);
        let gate = Arc::new(Semaphore::new(0));

        let (first, first_handle) = gated("first", &gate);
        pool.submit(first);
        until(|| pool.stats().busy == 1).await;

        let (second, second_handle) = gated("second", &gate);
        pool.submit(second);
        let (third, third_handle) = gated("third", &gate);
        pool.submit(third);

        match third_handle.wait().await {
            Err(RetryError::PoolSaturated { unit, .. }) => assert_eq!(unit, "third"),
            other => panic!("expected saturation, got {:?}", other),
        }
        assert_eq!(shed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().rejected, 1);
        assert!(logs_contain("shedding task"));

        gate.add_permits(2);
        assert!(first_handle.wait().await.is_ok());
        assert!(second_handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_full_backlog_grows_pool_to_max() {
        let pool = executor(1, 2, 1, Reporter::new());
        let gate = Arc::new(Semaphore::new(0));

        let (first, first_handle) = gated("first", &gate);
        pool.submit(first);
        until(|| pool.stats().busy == 1).await;

        let (second, second_handle) = gated("second", &gate);
        pool.submit(second);
        let (third, third_handle) = gated("third", &gate);
        pool.submit(third);

        assert_eq!(pool.stats().workers, 2);
        gate.add_permits(3);
        for handle in [first_handle, second_handle, third_handle] {
            assert!(handle.wait().await.is_ok());
        }
        assert_eq!(pool.stats().rejected, 0);

        // The extra worker retires after its keep-alive.
        until(|| pool.stats().workers == 1).await;
    }

    #[tokio::test]
    async fn test_shutdown_abandons_backlog() {
        let pool = executor(1, 1, 4, Reporter::new());
        let gate = Arc::new(Semaphore::new(0));

        let (first, first_handle) = gated("running", &gate);
        pool.submit(first);
        until(|| pool.stats().busy == 1).await;
        let (queued, queued_handle) = gated("queued", &gate);
        pool.submit(queued);

        let stopping = tokio::spawn({
            let pool = pool.clone();
            async move { pool.shutdown().await }
        });
        until(|| pool.is_closed()).await;
        // The running task is not cancelled; let it finish.
        gate.add_permits(1);
        stopping.await.unwrap();

        assert!(first_handle.wait().await.is_ok());
        assert!(matches!(
            queued_handle.wait().await,
            Err(RetryError::Abandoned { .. })
        ));
        assert_eq!(pool.stats().workers, 0);
    }

    #[tokio::test]
    async fn test_panicking_unit_does_not_kill_worker() {
        let pool = executor(1, 1, 4, Reporter::new());
        let boom = FnUnit::new("boom", || async {
            if true {
                panic!("unit blew up");
            }
            Ok::<_, BoxError>(())
        });
        let (task, handle) = RetryTask::with_handle(boom, Arc::new(RetryPolicy::default()));
        pool.submit(task.detach());
        assert!(matches!(handle.wait().await, Err(RetryError::Abandoned { .. })));

        let (task, handle) = RetryTask::with_handle(
            FnUnit::new("after", || async { Ok::<_, BoxError>(()) }),
            Arc::new(RetryPolicy::default()),
        );
        pool.submit(task.detach());
        assert!(handle.wait().await.is_ok());
        assert_eq!(pool.stats().workers, 1);
    }
}
