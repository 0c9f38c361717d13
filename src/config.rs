//! Scheduler configuration.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::retry::ConfigError;

/// Tunables for a [`RetryScheduler`](crate::RetryScheduler).
///
/// The defaults size the worker pool from the number of available CPUs
/// (core = 2×, max = 3×) and promote one task every 500 ms.
///
/// # Example
///
/// ```rust
/// use eddy::SchedulerConfig;
/// use std::time::Duration;
///
/// let config = SchedulerConfig::default()
///     .with_tick_interval(Duration::from_millis(50))
///     .with_workers(2, 4);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.max_queue_size, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Period of the promotion loop.
    pub tick_interval: Duration,
    /// Queue length at which due tasks are held back instead of promoted.
    pub max_queue_size: usize,
    /// Tasks the promotion loop may route per tick.
    pub promotions_per_tick: usize,
    /// Workers kept alive while idle.
    pub core_workers: usize,
    /// Upper bound on live workers.
    pub max_workers: usize,
    /// Idle time after which a worker above `core_workers` exits.
    pub worker_keep_alive: Duration,
    /// Capacity of the executor's backing queue of ready tasks.
    pub backlog_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            tick_interval: Duration::from_millis(500),
            max_queue_size: 500,
            promotions_per_tick: 1,
            core_workers: cpus * 2,
            max_workers: cpus * 3,
            worker_keep_alive: Duration::from_secs(60),
            backlog_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Set the promotion loop period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the queue length at which promotion is held back.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set how many tasks one tick may promote.
    pub fn with_promotions_per_tick(mut self, n: usize) -> Self {
        self.promotions_per_tick = n;
        self
    }

    /// Set the worker range.
    pub fn with_workers(mut self, core: usize, max: usize) -> Self {
        self.core_workers = core;
        self.max_workers = max;
        self
    }

    /// Set the idle timeout for workers above the core count.
    pub fn with_worker_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.worker_keep_alive = keep_alive;
        self
    }

    /// Set the executor's backing queue capacity.
    pub fn with_backlog_capacity(mut self, capacity: usize) -> Self {
        self.backlog_capacity = capacity;
        self
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Zero("tick_interval"));
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::Zero("max_queue_size"));
        }
        if self.promotions_per_tick == 0 {
            return Err(ConfigError::Zero("promotions_per_tick"));
        }
        if self.core_workers == 0 {
            return Err(ConfigError::Zero("core_workers"));
        }
        if self.backlog_capacity == 0 {
            return Err(ConfigError::Zero("backlog_capacity"));
        }
        if self.core_workers > self.max_workers {
            return Err(ConfigError::WorkerRange {
                core: self.core_workers,
                max: self.max_workers,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert_eq!(config.backlog_capacity, 1024);
        assert!(config.core_workers <= config.max_workers);
    }

    #[test]
    fn test_zero_settings_rejected() {
        assert_eq!(
            SchedulerConfig::default()
                .with_tick_interval(Duration::ZERO)
                .validate(),
            Err(ConfigError::Zero("tick_interval"))
        );
        assert_eq!(
            SchedulerConfig::default().with_workers(0, 4).validate(),
            Err(ConfigError::Zero("core_workers"))
        );
        assert_eq!(
            SchedulerConfig::default().with_backlog_capacity(0).validate(),
            Err(ConfigError::Zero("backlog_capacity"))
        );
    }

    #[test]
    fn test_worker_range_checked() {
        assert_eq!(
            SchedulerConfig::default().with_workers(4, 2).validate(),
            Err(ConfigError::WorkerRange { core: 4, max: 2 })
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"max_queue_size": 10, "core_workers": 1, "max_workers": 1}"#)
                .unwrap();
        assert_eq!(config.max_queue_size, 10);
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }
}
