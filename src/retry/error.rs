//! Error types for retry scheduling.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::policy::CauseKind;

/// The failure type produced by a [`RetryableUnit`](crate::RetryableUnit).
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Walk a failure's `source()` chain to its innermost cause.
///
/// # Examples
///
/// ```rust
/// use eddy::root_cause;
/// use eddy::testing::{Transient, TransportError};
///
/// let outer = TransportError::new(Transient);
///
/// assert!(root_cause(&outer).is::<Transient>());
/// assert_eq!(root_cause(&outer).to_string(), "transient failure");
/// ```
pub fn root_cause<'a>(failure: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static) {
    let mut cause = failure;
    while let Some(next) = cause.source() {
        cause = next;
    }
    cause
}

/// A unit's terminal failure, with metadata about its retry sequence.
///
/// Keeps the failure exactly as the unit reported it; [`root_cause`](Self::root_cause)
/// unwraps any transport-level wrapping.
#[derive(Debug, Clone)]
pub struct TerminalFailure {
    /// Name of the unit that failed.
    pub unit: String,
    /// Total executions (initial + retries).
    pub attempts: u32,
    /// Wall-clock time since the first execution.
    pub elapsed: Duration,
    /// The policy kind the root cause matched, if any.
    pub kind: Option<CauseKind>,
    failure: Arc<dyn Error + Send + Sync + 'static>,
}

impl TerminalFailure {
    pub(crate) fn new(
        unit: impl Into<String>,
        attempts: u32,
        elapsed: Duration,
        kind: Option<CauseKind>,
        failure: BoxError,
    ) -> Self {
        Self {
            unit: unit.into(),
            attempts,
            elapsed,
            kind,
            failure: Arc::from(failure),
        }
    }

    /// The failure as the unit reported it.
    pub fn failure(&self) -> &(dyn Error + 'static) {
        &*self.failure
    }

    /// The innermost failure in the source chain.
    pub fn root_cause(&self) -> &(dyn Error + 'static) {
        root_cause(self.failure())
    }
}

/// Terminal outcome of a task that did not succeed.
///
/// A retryable failure with budget left is not an error - it reschedules the
/// task. Everything here is final.
#[derive(Debug, Clone)]
pub enum RetryError {
    /// The root cause was excluded by the policy, or matched no declared kind.
    NonRetryable(TerminalFailure),
    /// The retry budget (length of the delay schedule) was used up.
    Exhausted(TerminalFailure),
    /// The executor was saturated and shed the task.
    PoolSaturated {
        /// Name of the shed unit.
        unit: String,
        /// Executions made before the task was shed.
        attempts: u32,
    },
    /// The task was dropped before reaching a decision, e.g. at shutdown.
    Abandoned {
        /// Name of the dropped unit.
        unit: String,
        /// Executions made before the task was dropped.
        attempts: u32,
    },
}

impl RetryError {
    /// Name of the unit this error is about.
    pub fn unit(&self) -> &str {
        match self {
            Self::NonRetryable(f) | Self::Exhausted(f) => &f.unit,
            Self::PoolSaturated { unit, .. } | Self::Abandoned { unit, .. } => unit,
        }
    }

    /// Executions made before the terminal decision.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::NonRetryable(f) | Self::Exhausted(f) => f.attempts,
            Self::PoolSaturated { attempts, .. } | Self::Abandoned { attempts, .. } => *attempts,
        }
    }

    /// The unit's failure details, if the unit itself failed.
    pub fn terminal_failure(&self) -> Option<&TerminalFailure> {
        match self {
            Self::NonRetryable(f) | Self::Exhausted(f) => Some(f),
            Self::PoolSaturated { .. } | Self::Abandoned { .. } => None,
        }
    }

    /// The innermost failure reported by the unit, if any.
    pub fn root_cause(&self) -> Option<&(dyn Error + 'static)> {
        self.terminal_failure().map(TerminalFailure::root_cause)
    }

    /// Returns true if the retry budget was exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// Returns true if the failure was never retryable.
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Self::NonRetryable(_))
    }
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonRetryable(t) => write!(
                f,
                "{} failed with a non-retryable cause after {} attempt(s): {}",
                t.unit,
                t.attempts,
                t.root_cause()
            ),
            Self::Exhausted(t) => write!(
                f,
                "{} exhausted its retries after {} attempts ({:?}): {}",
                t.unit,
                t.attempts,
                t.elapsed,
                t.root_cause()
            ),
            Self::PoolSaturated { unit, attempts } => write!(
                f,
                "{} was shed by a saturated worker pool after {} attempt(s)",
                unit, attempts
            ),
            Self::Abandoned { unit, attempts } => write!(
                f,
                "{} was abandoned after {} attempt(s)",
                unit, attempts
            ),
        }
    }
}

impl Error for RetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.terminal_failure().map(TerminalFailure::failure)
    }
}

/// Error returned when a [`RetryPolicy`](crate::RetryPolicy) cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// The delay schedule was empty.
    EmptySchedule,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySchedule => write!(f, "retry policy needs at least one delay"),
        }
    }
}

impl Error for PolicyError {}

/// Error returned when a [`SchedulerConfig`](crate::SchedulerConfig) is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting that must be positive was zero.
    Zero(&'static str),
    /// `core_workers` exceeded `max_workers`.
    WorkerRange {
        /// Configured core worker count.
        core: usize,
        /// Configured maximum worker count.
        max: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero(field) => write!(f, "{} must be greater than zero", field),
            Self::WorkerRange { core, max } => write!(
                f,
                "core_workers ({}) must not exceed max_workers ({})",
                core, max
            ),
        }
    }
}

impl Error for ConfigError {}
