//! Periodic routing of due tasks from the queue into the worker pool.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SchedulerConfig;
use crate::executor::RetryExecutor;
use crate::queue::RetryQueue;

/// Why a promotion tick was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionError {
    /// Shutdown was signalled while waiting for a task.
    Interrupted,
}

impl fmt::Display for PromotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "promotion interrupted by shutdown"),
        }
    }
}

impl Error for PromotionError {}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSummary {
    /// Tasks handed to the executor.
    pub promoted: usize,
    /// Tasks put back because they were not due or the queue was full.
    pub held: usize,
}

/// Moves due tasks from a [`RetryQueue`] to a [`RetryExecutor`].
///
/// The loop only routes; it never executes a task. A task is held back (put
/// back in the queue unchanged) when it is not yet due, or when the tasks
/// still queued after taking it number at least `max_queue_size`.
#[derive(Debug)]
pub struct PromotionLoop {
    queue: Arc<RetryQueue>,
    executor: Arc<RetryExecutor>,
    tick_interval: Duration,
    max_queue_size: usize,
    promotions_per_tick: usize,
}

impl PromotionLoop {
    /// Create a loop over `queue` and `executor`.
    pub fn new(
        queue: Arc<RetryQueue>,
        executor: Arc<RetryExecutor>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            tick_interval: config.tick_interval,
            max_queue_size: config.max_queue_size,
            promotions_per_tick: config.promotions_per_tick.max(1),
        }
    }

    /// Run one tick.
    ///
    /// Waits for the first task; further tasks (up to `promotions_per_tick`)
    /// are only taken if already queued. The tick ends at the first task it
    /// holds back.
    ///
    /// # Errors
    ///
    /// Returns [`PromotionError::Interrupted`] if shutdown is signalled while
    /// waiting for the first task.
    pub async fn tick(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<TickSummary, PromotionError> {
        let mut summary = TickSummary::default();

        let mut next = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stopped| *stopped) => return Err(PromotionError::Interrupted),
            task = self.queue.take_lowest() => Some(task),
        };

        while let Some(task) = next.take() {
            let queued = self.queue.len();
            if !task.is_due(Instant::now()) || queued >= self.max_queue_size {
                tracing::trace!(
                    unit = task.name(),
                    attempt = task.attempt(),
                    queued,
                    "holding task in queue"
                );
                self.queue.add(task);
                summary.held += 1;
                break;
            }

            tracing::debug!(
                unit = task.name(),
                attempt = task.attempt(),
                "promoting task"
            );
            self.executor.submit(task);
            summary.promoted += 1;

            if summary.promoted < self.promotions_per_tick {
                next = self.queue.try_take_lowest();
            }
        }
        Ok(summary)
    }

    /// Tick every `tick_interval` until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "promotion loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.tick(&mut shutdown).await {
                tracing::error!(error = %err, "promotion tick abandoned");
            }
        }
        tracing::debug!("promotion loop stopped");
    }
}
