//! The owned scheduler that wires queue, dispatcher, executor and promotion
//! loop together.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::dispatcher::{Attempt, RetryDispatcher};
use crate::executor::RetryExecutor;
use crate::promotion::PromotionLoop;
use crate::queue::RetryQueue;
use crate::report::{PoolStats, Reporter};
use crate::retry::{ConfigError, RetryError, RetryPolicy};
use crate::task::{RetryHandle, RetryTask};
use crate::unit::RetryableUnit;

/// What happened to a unit's first execution.
#[derive(Debug)]
pub enum Submission<T> {
    /// The first execution succeeded.
    Completed(T),
    /// The first execution failed retryably; the handle resolves to the final
    /// outcome of the retries.
    Retrying(RetryHandle),
}

impl<T> Submission<T> {
    /// Returns true if the first execution succeeded.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The retry handle, if the unit was rescheduled.
    pub fn into_handle(self) -> Option<RetryHandle> {
        match self {
            Self::Completed(_) => None,
            Self::Retrying(handle) => Some(handle),
        }
    }
}

/// An in-process retry scheduler.
///
/// Callers hand a [`RetryableUnit`] and a [`RetryPolicy`] to
/// [`execute`](Self::execute). The first execution happens inline; a retryable
/// failure moves the unit into the scheduler's queue, from which the promotion
/// loop feeds due retries to the worker pool.
///
/// Nothing is promoted until [`start`](Self::start) is called. Dropping the
/// scheduler signals shutdown without waiting; call
/// [`shutdown`](Self::shutdown) to wait for in-flight work.
///
/// # Example
///
/// ```rust
/// use eddy::testing::{ScriptedUnit, Transient};
/// use eddy::{RetryPolicy, RetryScheduler, SchedulerConfig, Submission};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let scheduler = RetryScheduler::new(
///     SchedulerConfig::default().with_tick_interval(Duration::from_millis(5)),
/// )
/// .unwrap();
/// scheduler.start();
///
/// let policy = Arc::new(RetryPolicy::from_millis([10, 20]).unwrap().retry_on::<Transient>());
/// let unit = ScriptedUnit::fails_then_succeeds("flaky", 1, || Transient);
///
/// match scheduler.execute(unit, policy).await.unwrap() {
///     Submission::Completed(_) => unreachable!(),
///     Submission::Retrying(handle) => {
///         let report = handle.wait().await.unwrap();
///         assert_eq!(report.attempts, 2);
///     }
/// }
///
/// scheduler.shutdown().await;
/// # }
/// ```
pub struct RetryScheduler {
    config: SchedulerConfig,
    queue: Arc<RetryQueue>,
    dispatcher: Arc<RetryDispatcher>,
    executor: Arc<RetryExecutor>,
    shutdown: watch::Sender<bool>,
    promotion: Mutex<Option<JoinHandle<()>>>,
}

impl RetryScheduler {
    /// Build a scheduler that reports through `tracing` only.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        Self::with_reporter(config, Reporter::new())
    }

    /// Build a scheduler whose terminal and rejection events also go to the
    /// hooks registered on `reporter`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_reporter(config: SchedulerConfig, reporter: Reporter) -> Result<Self, ConfigError> {
        config.validate()?;
        let queue = Arc::new(RetryQueue::new());
        let dispatcher = Arc::new(RetryDispatcher::new(queue.clone(), reporter.clone()));
        let executor = RetryExecutor::new(dispatcher.clone(), &config, reporter);
        Ok(Self {
            config,
            queue,
            dispatcher,
            executor,
            shutdown: watch::channel(false).0,
            promotion: Mutex::new(None),
        })
    }

    /// Spawn the promotion loop. Calling it again is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut promotion = self.promotion.lock().unwrap_or_else(PoisonError::into_inner);
        if promotion.is_some() || self.is_shut_down() {
            return;
        }
        let lp = PromotionLoop::new(self.queue.clone(), self.executor.clone(), &self.config);
        *promotion = Some(tokio::spawn(lp.run(self.shutdown.subscribe())));
        tracing::debug!(
            core_workers = self.config.core_workers,
            max_workers = self.config.max_workers,
            "retry scheduler started"
        );
    }

    /// Execute `unit` once, scheduling retries under `policy` on failure.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`RetryError`] if the first execution fails with a
    /// cause that is not retried, or [`RetryError::Abandoned`] without
    /// executing if the scheduler has been shut down.
    pub async fn execute<U>(
        &self,
        unit: U,
        policy: Arc<RetryPolicy>,
    ) -> Result<Submission<U::Output>, RetryError>
    where
        U: RetryableUnit,
    {
        if self.is_shut_down() {
            return Err(RetryError::Abandoned {
                unit: unit.name().to_owned(),
                attempts: 0,
            });
        }
        let (task, handle) = RetryTask::with_handle(unit, policy);
        match self.dispatcher.attempt(task).await? {
            Attempt::Succeeded(value) => Ok(Submission::Completed(value)),
            Attempt::Rescheduled { .. } => Ok(Submission::Retrying(handle)),
        }
    }

    /// Stop promotion, wait for running tasks, and drop every pending retry.
    ///
    /// Handles of dropped tasks resolve to [`RetryError::Abandoned`].
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let promotion = self
            .promotion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = promotion {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "promotion loop ended abnormally");
            }
        }

        self.executor.shutdown().await;
        let dropped = self.queue.clear();
        tracing::debug!(dropped, "retry scheduler stopped");
    }

    /// Returns true once shutdown has been signalled.
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// The queue of pending retries.
    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Snapshot of the worker pool.
    pub fn stats(&self) -> PoolStats {
        self.executor.stats()
    }

    /// The configuration the scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.executor.close();
    }
}

impl fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .field("stats", &self.executor.stats())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
