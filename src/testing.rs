//! Testing utilities for code that schedules retries.
//!
//! [`ScriptedUnit`] replays a fixed script of failures and records the instant
//! of every execution, so tests can assert on attempt counts and spacing.
//! [`Transient`], [`Permanent`] and [`TransportError`] are ready-made failure
//! kinds for building policies in tests.
//!
//! # Example
//!
//! ```rust
//! use eddy::testing::{ScriptedUnit, Transient};
//! use eddy::RetryableUnit;
//!
//! # tokio_test::block_on(async {
//! let mut unit = ScriptedUnit::fails_then_succeeds("flaky", 1, || Transient);
//! let log = unit.log();
//!
//! assert!(unit.execute().await.is_err());
//! assert_eq!(unit.execute().await.unwrap(), 2);
//! assert_eq!(log.count(), 2);
//! # });
//! ```

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::retry::BoxError;
use crate::unit::RetryableUnit;

/// Shared record of when a [`ScriptedUnit`] executed.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog(Arc<Mutex<Vec<Instant>>>);

impl ExecutionLog {
    fn record(&self) -> u32 {
        let mut instants = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        instants.push(Instant::now());
        u32::try_from(instants.len()).unwrap_or(u32::MAX)
    }

    /// Number of executions so far.
    pub fn count(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Instant of every execution, in order.
    pub fn instants(&self) -> Vec<Instant> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// A unit that fails a scripted number of times, then succeeds.
///
/// On success it yields its 1-based execution number.
pub struct ScriptedUnit {
    name: String,
    failures: Option<usize>,
    make_failure: Box<dyn Fn() -> BoxError + Send>,
    log: ExecutionLog,
}

impl ScriptedUnit {
    /// A unit that always succeeds.
    pub fn succeeds(name: impl Into<String>) -> Self {
        Self::fails_then_succeeds(name, 0, || Transient)
    }

    /// A unit whose first `failures` executions fail with `make_failure()`.
    pub fn fails_then_succeeds<F, E>(name: impl Into<String>, failures: usize, make_failure: F) -> Self
    where
        F: Fn() -> E + Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            failures: Some(failures),
            make_failure: Box::new(move || -> BoxError { Box::new(make_failure()) }),
            log: ExecutionLog::default(),
        }
    }

    /// A unit that fails with `make_failure()` on every execution.
    pub fn always_fails<F, E>(name: impl Into<String>, make_failure: F) -> Self
    where
        F: Fn() -> E + Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        Self {
            failures: None,
            ..Self::fails_then_succeeds(name, 0, make_failure)
        }
    }

    /// Handle to this unit's execution log.
    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }
}

impl fmt::Debug for ScriptedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedUnit")
            .field("name", &self.name)
            .field("failures", &self.failures)
            .field("executions", &self.log.count())
            .finish()
    }
}

impl RetryableUnit for ScriptedUnit {
    type Output = u32;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self) -> BoxFuture<'_, Result<u32, BoxError>> {
        let execution = self.log.record();
        let fail = match self.failures {
            None => true,
            Some(n) => (execution as usize) <= n,
        };
        let outcome = if fail {
            Err((self.make_failure)())
        } else {
            Ok(execution)
        };
        Box::pin(async move { outcome })
    }
}

/// A failure kind meant to be declared retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transient;

impl fmt::Display for Transient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient failure")
    }
}

impl Error for Transient {}

/// A failure kind meant to be declared non-retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permanent;

impl fmt::Display for Permanent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "permanent failure")
    }
}

impl Error for Permanent {}

/// Wraps a unit's native failure the way a transport layer would.
#[derive(Debug)]
pub struct TransportError {
    inner: BoxError,
}

impl TransportError {
    /// Wrap `inner`.
    pub fn new<E: Error + Send + Sync + 'static>(inner: E) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport failure")
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.inner)
    }
}
