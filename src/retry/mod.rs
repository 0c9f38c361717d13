//! Retry policies and terminal error types.
//!
//! A [`RetryPolicy`] is plain data: a delay schedule plus the cause kinds that
//! permit or forbid a retry. It describes *what* retry behavior you want; the
//! [`RetryDispatcher`](crate::RetryDispatcher) and the rest of the scheduler
//! decide *when* it happens.
//!
//! # Classification
//!
//! When a unit fails, its failure is unwrapped to the root cause (see
//! [`root_cause`]) and classified:
//!
//! - **Excluded**: matches a non-retryable kind. Always checked first.
//! - **Included**: matches a retryable kind. Rescheduled if budget remains.
//! - **Unmatched**: matches neither. Terminal.
//!
//! # Schedules
//!
//! Schedules are either given explicitly or generated from a
//! [`RetryStrategy`]:
//!
//! - **Constant**: Fixed delay between retries
//! - **Linear**: Delay increases linearly (100ms, 200ms, 300ms, ...)
//! - **Exponential**: Delay doubles each retry (100ms, 200ms, 400ms, ...)
//! - **Fibonacci**: Delay follows Fibonacci sequence
//!
//! Enable the `jitter` feature to randomize each scheduled delay.
//!
//! # Error Types
//!
//! - [`RetryError`]: terminal outcome of a task that did not succeed
//! - [`PolicyError`]: a policy could not be built
//! - [`ConfigError`]: a scheduler configuration is invalid

mod error;
mod policy;

pub use error::{root_cause, BoxError, ConfigError, PolicyError, RetryError, TerminalFailure};
pub use policy::{CauseClass, CauseKind, JitterStrategy, RetryPolicy, RetryStrategy};
