//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::logging::{LogLevel, LogTarget};

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use esox_resourcepool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_name("db")
///     .with_max_size(10)
///     .with_min_size(2)
///     .with_idle_timeout(Duration::from_secs(60))
///     .with_priority_range(3);
///
/// assert_eq!(config.max_size, 10);
/// assert_eq!(config.min_size, 2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Name of the pool, used only for logging and metrics labels
    pub name: String,

    /// Maximum number of resources that can exist at the same time
    pub max_size: usize,

    /// Minimum number of resources kept alive, idle or in use
    pub min_size: usize,

    /// How long a resource may sit idle before the reaper destroys it
    pub idle_timeout: Duration,

    /// How often the reaper looks for idle resources
    pub reap_interval: Duration,

    /// How often `drain` re-checks for outstanding work
    pub drain_check_interval: Duration,

    /// Destroy every expired resource, even below the minimum
    pub refresh_idle: bool,

    /// Released resources go to the front of the idle list (LIFO reuse)
    pub return_to_head: bool,

    /// Number of priority levels; priority 0 is served first
    pub priority_range: usize,

    /// Where log messages are sent
    pub log: LogTarget,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            max_size: 1,
            min_size: 0,
            idle_timeout: Duration::from_millis(30_000),
            reap_interval: Duration::from_millis(1_000),
            drain_check_interval: Duration::from_millis(100),
            refresh_idle: true,
            return_to_head: false,
            priority_range: 1,
            log: LogTarget::Disabled,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_size(50);
    /// assert_eq!(config.max_size, 50);
    /// ```
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the number of resources kept alive
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_drain_check_interval(mut self, interval: Duration) -> Self {
        self.drain_check_interval = interval;
        self
    }

    pub fn with_refresh_idle(mut self, refresh: bool) -> Self {
        self.refresh_idle = refresh;
        self
    }

    pub fn with_return_to_head(mut self, to_head: bool) -> Self {
        self.return_to_head = to_head;
        self
    }

    pub fn with_priority_range(mut self, range: usize) -> Self {
        self.priority_range = range;
        self
    }

    pub fn with_log(mut self, target: LogTarget) -> Self {
        self.log = target;
        self
    }

    /// Route log messages to a handler
    pub fn with_log_handler<H>(self, handler: H) -> Self
    where
        H: Fn(&str, LogLevel) + Send + Sync + 'static,
    {
        self.with_log(LogTarget::custom(handler))
    }

    /// Check for settings the pool cannot run with
    ///
    /// Sizes and the priority range are clamped rather than rejected: a zero
    /// `max_size` or `priority_range` behaves as 1.
    pub fn validate(&self) -> PoolResult<()> {
        if self.reap_interval.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "reap_interval must be greater than zero".to_string(),
            ));
        }
        if self.drain_check_interval.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "drain_check_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Sizes as the pool applies them: max of at least 1, min below max
    pub(crate) fn effective_sizes(&self) -> (usize, usize) {
        let max = self.max_size.max(1);
        let min = self.min_size.min(max - 1);
        (max, min)
    }

    pub(crate) fn effective_priority_range(&self) -> usize {
        self.priority_range.max(1)
    }
}
