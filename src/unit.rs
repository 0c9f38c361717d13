//! The unit of work a scheduler retries.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;

use crate::retry::BoxError;

/// A zero-argument operation that yields a value or fails.
///
/// Units are supplied by the caller and owned by their task. Each call to
/// [`execute`](Self::execute) must start the operation afresh: retry means
/// "try this operation again from scratch".
pub trait RetryableUnit: Send + 'static {
    /// The value produced on success.
    type Output: Send + 'static;

    /// Identifying name used in logs and outcome reports.
    fn name(&self) -> &str;

    /// Run the operation once.
    fn execute(&mut self) -> BoxFuture<'_, Result<Self::Output, BoxError>>;

    /// Erase this unit for storage in the retry queue.
    ///
    /// Retried executions happen off the caller's path, so their values are
    /// discarded.
    fn boxed(self) -> BoxedUnit
    where
        Self: Sized,
    {
        BoxedUnit(Box::new(Detached(self)))
    }
}

/// A type-erased unit whose output is discarded.
pub struct BoxedUnit(Box<dyn RetryableUnit<Output = ()>>);

impl RetryableUnit for BoxedUnit {
    type Output = ();

    fn name(&self) -> &str {
        self.0.name()
    }

    fn execute(&mut self) -> BoxFuture<'_, Result<(), BoxError>> {
        self.0.execute()
    }

    fn boxed(self) -> BoxedUnit {
        self
    }
}

impl fmt::Debug for BoxedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxedUnit").field(&self.name()).finish()
    }
}

struct Detached<U>(U);

impl<U: RetryableUnit> RetryableUnit for Detached<U> {
    type Output = ();

    fn name(&self) -> &str {
        self.0.name()
    }

    fn execute(&mut self) -> BoxFuture<'_, Result<(), BoxError>> {
        let run = self.0.execute();
        Box::pin(async move { run.await.map(drop) })
    }
}

/// A unit built from a closure returning a future.
///
/// # Example
///
/// ```rust
/// use eddy::{FnUnit, RetryableUnit};
///
/// # tokio_test::block_on(async {
/// let mut unit = FnUnit::new("answer", || async { Ok::<_, eddy::BoxError>(42) });
///
/// assert_eq!(unit.name(), "answer");
/// assert_eq!(unit.execute().await.unwrap(), 42);
/// # });
/// ```
pub struct FnUnit<F> {
    name: String,
    f: F,
}

impl<F> FnUnit<F> {
    /// Wrap `f` as a unit called `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnUnit<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnUnit").field("name", &self.name).finish()
    }
}

impl<F, Fut, T> RetryableUnit for FnUnit<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self) -> BoxFuture<'_, Result<T, BoxError>> {
        Box::pin((self.f)())
    }
}
