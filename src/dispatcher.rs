//! Execute a task once, classify its failure, and decide what happens next.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::queue::RetryQueue;
use crate::report::{Reporter, TerminalEvent, TerminalKind};
use crate::retry::{root_cause, CauseClass, CauseKind, RetryError, TerminalFailure};
use crate::task::{RetryTask, TaskReport};
use crate::unit::RetryableUnit;

/// Non-terminal result of [`RetryDispatcher::attempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The unit succeeded; the task is finished.
    Succeeded(T),
    /// The unit failed retryably; the task is back in the queue.
    Rescheduled {
        /// Retries scheduled so far, this one included.
        attempt: u32,
        /// When the task becomes due.
        next_execute_at: Instant,
    },
}

impl<T> Attempt<T> {
    /// Returns true if the unit succeeded.
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Extract the success value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Succeeded(value) => Some(value),
            Self::Rescheduled { .. } => None,
        }
    }
}

enum Decision {
    Retry(CauseKind, std::time::Duration),
    Terminal(TerminalKind, Option<CauseKind>),
}

/// The retry decision algorithm.
///
/// On failure the unit's error is unwrapped to its root cause and checked in
/// this order:
///
/// 1. retry budget spent → [`RetryError::Exhausted`]
/// 2. non-retryable kind → [`RetryError::NonRetryable`]
/// 3. retryable kind → rescheduled into the queue
/// 4. anything else → [`RetryError::NonRetryable`]
pub struct RetryDispatcher {
    queue: Arc<RetryQueue>,
    reporter: Reporter,
}

impl RetryDispatcher {
    /// Create a dispatcher that reschedules into `queue`.
    pub fn new(queue: Arc<RetryQueue>, reporter: Reporter) -> Self {
        Self { queue, reporter }
    }

    /// The queue rescheduled tasks go back to.
    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Execute `task` once and act on the result.
    ///
    /// Terminal outcomes are reported, delivered to the task's handle (if it
    /// has one) and returned; the task is dropped. A retryable failure with
    /// budget left moves the task into the queue.
    pub async fn attempt<U>(&self, mut task: RetryTask<U>) -> Result<Attempt<U::Output>, RetryError>
    where
        U: RetryableUnit,
    {
        let started = Instant::now();
        let result = task.unit_mut().execute().await;
        let last_execution = started.elapsed();
        let attempts = task.attempt() + 1;

        let failure = match result {
            Ok(value) => {
                let report = TaskReport {
                    unit: task.name().to_owned(),
                    attempts,
                    elapsed: task.elapsed(),
                };
                self.reporter.terminal(&TerminalEvent {
                    unit: &report.unit,
                    kind: TerminalKind::Succeeded,
                    attempts,
                    elapsed: report.elapsed,
                    last_execution,
                    cause_kind: None,
                    root_cause: None,
                });
                task.finish(Ok(report));
                return Ok(Attempt::Succeeded(value));
            }
            Err(failure) => failure,
        };

        let (decision, root_message) = {
            let root = root_cause(&*failure);
            let decision = decide(&task, task.policy().classify(root));
            if let Decision::Terminal(kind, cause_kind) = decision {
                self.reporter.terminal(&TerminalEvent {
                    unit: task.name(),
                    kind,
                    attempts,
                    elapsed: task.elapsed(),
                    last_execution,
                    cause_kind,
                    root_cause: Some(root),
                });
            }
            (decision, root.to_string())
        };

        match decision {
            Decision::Retry(cause_kind, delay) => {
                let next_execute_at = task.reschedule(delay);
                let attempt = task.attempt();
                tracing::debug!(
                    unit = task.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    cause_kind = cause_kind.name(),
                    cause = %root_message,
                    "retryable failure, rescheduling"
                );
                self.queue.add(task.detach());
                Ok(Attempt::Rescheduled {
                    attempt,
                    next_execute_at,
                })
            }
            Decision::Terminal(kind, cause_kind) => {
                let terminal =
                    TerminalFailure::new(task.name(), attempts, task.elapsed(), cause_kind, failure);
                let err = match kind {
                    TerminalKind::Exhausted => RetryError::Exhausted(terminal),
                    _ => RetryError::NonRetryable(terminal),
                };
                task.finish(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Worker entry point for a task promoted out of the queue.
    pub(crate) async fn run(&self, task: RetryTask) {
        // Terminal outcomes were already reported and delivered to the handle.
        let _ = self.attempt(task).await;
    }
}

fn decide<U: RetryableUnit>(task: &RetryTask<U>, class: CauseClass) -> Decision {
    let policy = task.policy();
    if policy.is_exhausted(task.attempt()) {
        return Decision::Terminal(TerminalKind::Exhausted, class.kind());
    }
    match class {
        CauseClass::Excluded(kind) => Decision::Terminal(TerminalKind::NonRetryable, Some(kind)),
        CauseClass::Included(kind) => match policy.delay_for_retry(task.attempt()) {
            Some(delay) => Decision::Retry(kind, delay),
            None => Decision::Terminal(TerminalKind::Exhausted, Some(kind)),
        },
        CauseClass::Unmatched => Decision::Terminal(TerminalKind::NonRetryable, None),
    }
}

impl fmt::Debug for RetryDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDispatcher")
            .field("queue", &self.queue)
            .field("reporter", &self.reporter)
            .finish()
    }
}
