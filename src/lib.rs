//! # Eddy
//!
//! > *Failed work circles back until it clears.*
//!
//! An in-process retry scheduler for tokio.
//!
//! A failed unit of work is re-executed on a configurable delay schedule until
//! it succeeds, runs out of retries, or fails with a cause that must not be
//! retried. Retries wait in a time-ordered queue; a periodic promotion loop
//! hands due retries to a bounded worker pool.
//!
//! ## Pieces
//!
//! - [`RetryableUnit`]: the work, executed any number of times
//! - [`RetryPolicy`]: delay schedule plus retryable and non-retryable cause kinds
//! - [`RetryScheduler`]: owns the [`RetryQueue`], [`RetryDispatcher`],
//!   [`RetryExecutor`] and [`PromotionLoop`]
//!
//! ## Quick Example
//!
//! ```rust
//! use eddy::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Busy;
//!
//! impl std::fmt::Display for Busy {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "service busy")
//!     }
//! }
//!
//! impl std::error::Error for Busy {}
//!
//! # #[tokio::main]
//! # async fn main() {
//! let scheduler = RetryScheduler::new(
//!     SchedulerConfig::default().with_tick_interval(Duration::from_millis(5)),
//! )
//! .unwrap();
//! scheduler.start();
//!
//! let policy = Arc::new(
//!     RetryPolicy::from_millis([10, 20, 40])
//!         .unwrap()
//!         .retry_on::<Busy>(),
//! );
//!
//! let mut calls = 0;
//! let unit = FnUnit::new("fetch", move || {
//!     calls += 1;
//!     let busy = calls < 3;
//!     async move {
//!         if busy {
//!             Err::<u32, BoxError>(Box::new(Busy))
//!         } else {
//!             Ok(42)
//!         }
//!     }
//! });
//!
//! match scheduler.execute(unit, policy).await {
//!     Ok(Submission::Completed(value)) => println!("first try: {}", value),
//!     Ok(Submission::Retrying(handle)) => {
//!         let report = handle.wait().await.unwrap();
//!         assert_eq!(report.attempts, 3);
//!     }
//!     Err(err) => println!("gave up: {}", err),
//! }
//!
//! scheduler.shutdown().await;
//! # }
//! ```
//!
//! ## Features
//!
//! - `jitter`: randomize scheduled delays (adds `rand`)
//! - `serde`: `Serialize`/`Deserialize` for [`SchedulerConfig`]

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod promotion;
pub mod queue;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod testing;
pub mod unit;

// Re-exports
pub use config::SchedulerConfig;
pub use dispatcher::{Attempt, RetryDispatcher};
pub use executor::RetryExecutor;
pub use promotion::{PromotionError, PromotionLoop, TickSummary};
pub use queue::RetryQueue;
pub use report::{PoolStats, RejectionEvent, Reporter, TerminalEvent, TerminalKind};
pub use retry::{
    root_cause, BoxError, CauseClass, CauseKind, ConfigError, JitterStrategy, PolicyError,
    RetryError, RetryPolicy, RetryStrategy, TerminalFailure,
};
pub use scheduler::{RetryScheduler, Submission};
pub use task::{RetryHandle, RetryTask, TaskReport};
pub use unit::{BoxedUnit, FnUnit, RetryableUnit};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::SchedulerConfig;
    pub use crate::retry::{BoxError, CauseKind, RetryError, RetryPolicy, RetryStrategy};
    pub use crate::scheduler::{RetryScheduler, Submission};
    pub use crate::task::{RetryHandle, TaskReport};
    pub use crate::unit::{FnUnit, RetryableUnit};
}
