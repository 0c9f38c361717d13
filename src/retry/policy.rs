//! Retry policy types and configuration.

use std::any::TypeId;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use super::error::PolicyError;

/// A retry policy describing when and how often a failed unit is retried.
///
/// Policies are pure data - they describe retry behavior but don't execute it.
/// A policy holds the per-retry delay schedule and two sets of cause kinds:
/// the kinds that permit a retry and the kinds that forbid one. Once built, a
/// policy is shared read-only (typically behind an `Arc`) by every task that
/// uses it.
///
/// # Bounds Behavior
///
/// The delay schedule MUST be non-empty. Its length is the retry budget: a
/// schedule of `N` delays allows at most `N` retries, so `N + 1` executions.
///
/// # Examples
///
/// ```rust
/// use eddy::RetryPolicy;
/// use std::time::Duration;
///
/// #[derive(Debug)]
/// struct Timeout;
/// impl std::fmt::Display for Timeout {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "timed out")
///     }
/// }
/// impl std::error::Error for Timeout {}
///
/// let policy = RetryPolicy::from_millis([1000, 2000, 4000])
///     .unwrap()
///     .retry_on::<Timeout>();
///
/// assert_eq!(policy.max_retries(), 3);
/// assert_eq!(policy.delay_for_retry(1), Some(Duration::from_millis(2000)));
/// assert_eq!(policy.delay_for_retry(3), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    retryable: Vec<CauseKind>,
    non_retryable: Vec<CauseKind>,
    jitter: JitterStrategy,
}

/// The backoff strategy used to generate a delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Fixed delay between attempts.
    Constant(Duration),
    /// Delay increases linearly: base * (attempt + 1).
    Linear {
        /// Base delay duration.
        base: Duration,
    },
    /// Delay doubles: base * 2^attempt.
    Exponential {
        /// Base delay duration.
        base: Duration,
    },
    /// Delay follows Fibonacci sequence: fib(attempt + 1) * base.
    Fibonacci {
        /// Base delay duration.
        base: Duration,
    },
}

/// Strategy for adding randomness to scheduled delays.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Add ±percentage randomness to delay.
    Proportional(f64),
    /// Random delay between 0 and the scheduled delay.
    Full,
}

/// Identifies a kind of failure for retry classification.
///
/// A kind matches a failure's root cause by membership, never by subtype
/// relationships: [`CauseKind::of`] matches exactly the causes that downcast
/// to the given error type.
///
/// Two kinds built by [`CauseKind::of`] are equal when they name the same
/// type. Kinds built by [`CauseKind::matching`] are equal only when both the
/// name and the predicate agree.
#[derive(Clone, Copy)]
pub struct CauseKind {
    name: &'static str,
    type_id: Option<TypeId>,
    matches: fn(&(dyn Error + 'static)) -> bool,
}

/// How a policy classifies a root cause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CauseClass {
    /// The cause matched a non-retryable kind.
    Excluded(CauseKind),
    /// The cause matched a retryable kind (and no non-retryable one).
    Included(CauseKind),
    /// The cause matched neither set.
    Unmatched,
}

impl CauseClass {
    /// The matched kind, if any.
    pub fn kind(&self) -> Option<CauseKind> {
        match self {
            CauseClass::Excluded(kind) | CauseClass::Included(kind) => Some(*kind),
            CauseClass::Unmatched => None,
        }
    }
}

fn is_kind<E: Error + 'static>(cause: &(dyn Error + 'static)) -> bool {
    cause.is::<E>()
}

impl CauseKind {
    /// The kind of every failure whose root cause is an `E`.
    pub fn of<E: Error + 'static>() -> Self {
        Self {
            name: std::any::type_name::<E>(),
            type_id: Some(TypeId::of::<E>()),
            matches: is_kind::<E>,
        }
    }

    /// A kind decided by an arbitrary predicate over the root cause.
    ///
    /// Useful when one error type carries several kinds, e.g. an I/O error
    /// whose `ErrorKind` decides retryability.
    pub fn matching(name: &'static str, matches: fn(&(dyn Error + 'static)) -> bool) -> Self {
        Self {
            name,
            type_id: None,
            matches,
        }
    }

    /// The kind's display name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `cause` belongs to this kind.
    pub fn matches(&self, cause: &(dyn Error + 'static)) -> bool {
        (self.matches)(cause)
    }
}

impl PartialEq for CauseKind {
    fn eq(&self, other: &Self) -> bool {
        match (self.type_id, other.type_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                self.name == other.name && std::ptr::fn_addr_eq(self.matches, other.matches)
            }
            _ => false,
        }
    }
}

impl Eq for CauseKind {}

impl fmt::Debug for CauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CauseKind").field(&self.name).finish()
    }
}

impl fmt::Display for CauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Default for RetryPolicy {
    /// One retry after five seconds, with no cause kinds declared.
    fn default() -> Self {
        Self {
            delays: vec![Duration::from_secs(5)],
            retryable: Vec::new(),
            non_retryable: Vec::new(),
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy from an explicit delay schedule.
    ///
    /// Element `i` is the delay before retry `i + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EmptySchedule`] if `delays` yields nothing.
    pub fn new<I>(delays: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = Duration>,
    {
        let delays: Vec<Duration> = delays.into_iter().collect();
        if delays.is_empty() {
            return Err(PolicyError::EmptySchedule);
        }
        Ok(Self {
            delays,
            ..Self::default()
        })
    }

    /// Create a policy from a schedule given in milliseconds.
    ///
    /// ```rust
    /// use eddy::RetryPolicy;
    ///
    /// assert!(RetryPolicy::from_millis([]).is_err());
    /// assert_eq!(RetryPolicy::from_millis([500, 500]).unwrap().max_retries(), 2);
    /// ```
    pub fn from_millis<I>(delays: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = u64>,
    {
        Self::new(delays.into_iter().map(Duration::from_millis))
    }

    /// Materialize a schedule of `retries` delays from a backoff strategy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use eddy::{RetryPolicy, RetryStrategy};
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::from_strategy(
    ///     RetryStrategy::Exponential { base: Duration::from_millis(100) },
    ///     4,
    /// )
    /// .unwrap();
    ///
    /// // Delay doubles: 100ms, 200ms, 400ms, 800ms
    /// assert_eq!(policy.delays()[0], Duration::from_millis(100));
    /// assert_eq!(policy.delays()[3], Duration::from_millis(800));
    /// ```
    pub fn from_strategy(strategy: RetryStrategy, retries: u32) -> Result<Self, PolicyError> {
        Self::new((0..retries).map(|attempt| strategy.delay_for_attempt(attempt)))
    }

    /// Cap every scheduled delay at `max`.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        for delay in &mut self.delays {
            *delay = (*delay).min(max);
        }
        self
    }

    /// Permit retries when the root cause is an `E`.
    pub fn retry_on<E: Error + 'static>(self) -> Self {
        self.retry_on_kind(CauseKind::of::<E>())
    }

    /// Permit retries when the root cause matches `kind`.
    pub fn retry_on_kind(mut self, kind: CauseKind) -> Self {
        if !self.retryable.contains(&kind) {
            self.retryable.push(kind);
        }
        self
    }

    /// Terminate immediately when the root cause is an `E`.
    ///
    /// Takes precedence over [`retry_on`](Self::retry_on) for the same kind.
    pub fn never_retry_on<E: Error + 'static>(self) -> Self {
        self.never_retry_on_kind(CauseKind::of::<E>())
    }

    /// Terminate immediately when the root cause matches `kind`.
    pub fn never_retry_on_kind(mut self, kind: CauseKind) -> Self {
        if !self.non_retryable.contains(&kind) {
            self.non_retryable.push(kind);
        }
        self
    }

    /// Add proportional jitter to delays.
    ///
    /// The factor determines the range of randomness. For example, `0.25` means
    /// the actual delay will be ±25% of the scheduled delay.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, this method does nothing.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = JitterStrategy::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Use full jitter: each delay is random between 0 and the scheduled delay.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, this method does nothing.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = JitterStrategy::Full;
        self
    }

    /// The delay schedule.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// The retry budget: number of retries after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        u32::try_from(self.delays.len()).unwrap_or(u32::MAX)
    }

    /// Cause kinds that permit a retry.
    pub fn retryable(&self) -> &[CauseKind] {
        &self.retryable
    }

    /// Cause kinds that force termination.
    pub fn non_retryable(&self) -> &[CauseKind] {
        &self.non_retryable
    }

    /// Get the jitter strategy.
    pub fn jitter(&self) -> &JitterStrategy {
        &self.jitter
    }

    /// Whether `attempt` retries have used up the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries()
    }

    /// Delay before retry `attempt + 1`, jitter applied.
    ///
    /// Returns None once the budget is spent.
    pub fn delay_for_retry(&self, attempt: u32) -> Option<Duration> {
        let scheduled = *self.delays.get(usize::try_from(attempt).ok()?)?;
        Some(self.jitter.apply(scheduled))
    }

    /// Classify a root cause. Non-retryable kinds are checked first.
    pub fn classify(&self, cause: &(dyn Error + 'static)) -> CauseClass {
        if let Some(kind) = self.non_retryable.iter().find(|k| k.matches(cause)) {
            return CauseClass::Excluded(*kind);
        }
        match self.retryable.iter().find(|k| k.matches(cause)) {
            Some(kind) => CauseClass::Included(*kind),
            None => CauseClass::Unmatched,
        }
    }
}

impl RetryStrategy {
    /// Calculate the delay before retry N (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Constant(d) => *d,
            RetryStrategy::Linear { base } => base.saturating_mul(attempt.saturating_add(1)),
            RetryStrategy::Exponential { base } => {
                base.saturating_mul(2u32.saturating_pow(attempt))
            }
            RetryStrategy::Fibonacci { base } => {
                base.saturating_mul(fibonacci(attempt.saturating_add(1)))
            }
        }
    }
}

impl JitterStrategy {
    /// Apply jitter to a scheduled delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterStrategy::None => delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Proportional(factor) => {
                use rand::Rng;
                let base_millis = delay.as_millis() as f64;
                let jitter_range = base_millis * factor;
                let min = (base_millis - jitter_range).max(0.0);
                let max = base_millis + jitter_range;
                Duration::from_millis(rand::rng().random_range(min..=max) as u64)
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Proportional(_) => delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Full => {
                use rand::Rng;
                let max_millis = delay.as_millis() as u64;
                if max_millis == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..=max_millis))
                }
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Full => delay,
        }
    }
}

/// Calculate the nth Fibonacci number.
fn fibonacci(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let mut a = 0u32;
    let mut b = 1u32;
    for _ in 1..n {
        let temp = a.saturating_add(b);
        a = b;
        b = temp;
    }
    b
}
