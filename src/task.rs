//! Per-unit retry state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::retry::{RetryError, RetryPolicy};
use crate::unit::{BoxedUnit, RetryableUnit};

/// Summary of a task that reached a terminal success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Name of the unit.
    pub unit: String,
    /// Total executions (initial + retries).
    pub attempts: u32,
    /// Wall-clock time since the first execution.
    pub elapsed: Duration,
}

type Completion = Result<TaskReport, RetryError>;

// Roughly 30 years; delays that overflow `Instant` are clamped to this.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The mutable record of one unit's retry progress.
///
/// A task owns its unit and shares its policy. It moves by value between the
/// caller, the [`RetryQueue`](crate::RetryQueue), the promotion loop and an
/// executor worker, so exactly one of them holds it at any time. It is dropped
/// as soon as its terminal decision is made.
pub struct RetryTask<U = BoxedUnit> {
    unit: U,
    policy: Arc<RetryPolicy>,
    attempt: u32,
    next_execute_at: Instant,
    created_at: Instant,
    completion: CompletionSlot,
}

impl<U: RetryableUnit> RetryTask<U> {
    /// Create a task that has not been retried yet and is due now.
    pub fn new(unit: U, policy: Arc<RetryPolicy>) -> Self {
        let now = Instant::now();
        let completion = CompletionSlot::empty(unit.name());
        Self {
            unit,
            policy,
            attempt: 0,
            next_execute_at: now,
            created_at: now,
            completion,
        }
    }

    /// Create a task together with a handle that resolves to its final outcome.
    pub fn with_handle(unit: U, policy: Arc<RetryPolicy>) -> (Self, RetryHandle) {
        let mut task = Self::new(unit, policy);
        let (tx, rx) = oneshot::channel();
        task.completion.tx = Some(tx);
        let handle = RetryHandle {
            unit: task.name().to_owned(),
            rx,
        };
        (task, handle)
    }

    /// Name of the task's unit.
    pub fn name(&self) -> &str {
        self.unit.name()
    }

    /// Retries already scheduled. Zero until the first reschedule.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Earliest instant at which the task may execute.
    pub fn next_execute_at(&self) -> Instant {
        self.next_execute_at
    }

    /// The task's policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether the task may execute at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_execute_at
    }

    /// Wall-clock time since the task was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn unit_mut(&mut self) -> &mut U {
        &mut self.unit
    }

    /// Count one more retry, due `delay` from now.
    pub(crate) fn reschedule(&mut self, delay: Duration) -> Instant {
        let now = Instant::now();
        self.attempt += 1;
        self.next_execute_at = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.completion.attempts = self.attempt;
        self.next_execute_at
    }

    /// Deliver the terminal outcome to the task's handle, if any.
    pub(crate) fn finish(mut self, outcome: Completion) {
        self.completion.send(outcome);
    }

    /// Erase the unit type so the task can wait in the queue.
    pub(crate) fn detach(self) -> RetryTask {
        RetryTask {
            unit: self.unit.boxed(),
            policy: self.policy,
            attempt: self.attempt,
            next_execute_at: self.next_execute_at,
            created_at: self.created_at,
            completion: self.completion,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_next_execute_at(&mut self, at: Instant) {
        self.next_execute_at = at;
    }
}

impl<U: RetryableUnit> fmt::Debug for RetryTask<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTask")
            .field("unit", &self.name())
            .field("attempt", &self.attempt)
            .field("next_execute_at", &self.next_execute_at)
            .finish_non_exhaustive()
    }
}

/// Sends `Abandoned` if the task is dropped before a terminal decision.
struct CompletionSlot {
    tx: Option<oneshot::Sender<Completion>>,
    unit: String,
    attempts: u32,
}

impl CompletionSlot {
    fn empty(unit: &str) -> Self {
        Self {
            tx: None,
            unit: unit.to_owned(),
            attempts: 0,
        }
    }

    fn send(&mut self, outcome: Completion) {
        if let Some(tx) = self.tx.take() {
            // The handle may have been dropped; nobody is listening then.
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for CompletionSlot {
    fn drop(&mut self) {
        if self.tx.is_some() {
            let abandoned = RetryError::Abandoned {
                unit: std::mem::take(&mut self.unit),
                attempts: self.attempts,
            };
            self.send(Err(abandoned));
        }
    }
}

/// Resolves to the final outcome of a rescheduled task.
///
/// Retries are invisible to the submitting caller except through this handle.
#[derive(Debug)]
pub struct RetryHandle {
    unit: String,
    rx: oneshot::Receiver<Completion>,
}

impl RetryHandle {
    /// Name of the unit being retried.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Wait for the task's terminal outcome.
    pub async fn wait(self) -> Result<TaskReport, RetryError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RetryError::Abandoned {
                unit: self.unit,
                attempts: 0,
            }),
        }
    }
}
