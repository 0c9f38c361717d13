//! Outcome and rejection reporting.
//!
//! Every terminal decision and every shed submission is emitted as a
//! `tracing` event and, if registered, handed to a hook. Hooks are
//! synchronous and should not block; use them for logging or metrics.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::retry::CauseKind;

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// The unit eventually succeeded.
    Succeeded,
    /// The retry budget ran out.
    Exhausted,
    /// The root cause was excluded, or never declared retryable.
    NonRetryable,
}

/// Information about a task's terminal decision, passed to hooks.
#[derive(Debug, Clone, Copy)]
pub struct TerminalEvent<'a> {
    /// Name of the unit.
    pub unit: &'a str,
    /// How the task ended.
    pub kind: TerminalKind,
    /// Total executions (initial + retries).
    pub attempts: u32,
    /// Wall-clock time since the first execution.
    pub elapsed: Duration,
    /// Duration of the final execution.
    pub last_execution: Duration,
    /// The policy kind the root cause matched, on failure.
    pub cause_kind: Option<CauseKind>,
    /// The innermost failure, on failure.
    pub root_cause: Option<&'a (dyn Error + 'static)>,
}

/// Snapshot of the worker pool's saturation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Live workers.
    pub workers: usize,
    /// Workers currently running a task.
    pub busy: usize,
    /// Upper bound on live workers.
    pub max_workers: usize,
    /// Tasks waiting in the backing queue.
    pub backlog: usize,
    /// Capacity of the backing queue.
    pub backlog_capacity: usize,
    /// Tasks submitted so far.
    pub submitted: u64,
    /// Tasks shed so far.
    pub rejected: u64,
}

/// Information about a task shed by a saturated pool, passed to hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionEvent {
    /// Name of the shed unit.
    pub unit: String,
    /// Executions made before the task was shed.
    pub attempts: u32,
    /// Pool state at the time of rejection.
    pub stats: PoolStats,
}

type TerminalHook = Arc<dyn Fn(&TerminalEvent<'_>) + Send + Sync>;
type RejectionHook = Arc<dyn Fn(&RejectionEvent) + Send + Sync>;

/// Emits terminal and rejection events.
#[derive(Clone, Default)]
pub struct Reporter {
    on_terminal: Option<TerminalHook>,
    on_rejected: Option<RejectionHook>,
}

impl Reporter {
    /// A reporter that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `hook` on every terminal decision.
    pub fn on_terminal<H>(mut self, hook: H) -> Self
    where
        H: Fn(&TerminalEvent<'_>) + Send + Sync + 'static,
    {
        self.on_terminal = Some(Arc::new(hook));
        self
    }

    /// Call `hook` on every shed submission.
    pub fn on_rejected<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RejectionEvent) + Send + Sync + 'static,
    {
        self.on_rejected = Some(Arc::new(hook));
        self
    }

    pub(crate) fn terminal(&self, event: &TerminalEvent<'_>) {
        let elapsed_ms = event.elapsed.as_millis() as u64;
        let last_ms = event.last_execution.as_millis() as u64;
        let cause_kind = event.cause_kind.map(|k| k.name()).unwrap_or("unmatched");
        let cause = event
            .root_cause
            .map(ToString::to_string)
            .unwrap_or_default();
        let cause_debug = event
            .root_cause
            .map(|root| format!("{:?}", root))
            .unwrap_or_default();
        match event.kind {
            TerminalKind::Succeeded => tracing::info!(
                unit = event.unit,
                attempts = event.attempts,
                elapsed_ms,
                last_ms,
                "unit succeeded"
            ),
            TerminalKind::Exhausted => tracing::error!(
                unit = event.unit,
                attempts = event.attempts,
                elapsed_ms,
                cause_kind,
                cause = %cause,
                cause_debug = %cause_debug,
                "retry budget exhausted"
            ),
            TerminalKind::NonRetryable => tracing::error!(
                unit = event.unit,
                attempts = event.attempts,
                elapsed_ms,
                cause_kind,
                cause = %cause,
                cause_debug = %cause_debug,
                "non-retryable failure"
            ),
        }
        if let Some(hook) = &self.on_terminal {
            hook(event);
        }
    }

    pub(crate) fn rejected(&self, event: &RejectionEvent) {
        tracing::warn!(
            unit = %event.unit,
            attempts = event.attempts,
            workers = event.stats.workers,
            busy = event.stats.busy,
            backlog = event.stats.backlog,
            rejected = event.stats.rejected,
            "retry pool saturated, shedding task"
        );
        if let Some(hook) = &self.on_rejected {
            hook(event);
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("on_terminal", &self.on_terminal.is_some())
            .field("on_rejected", &self.on_rejected.is_some())
            .finish()
    }
}
