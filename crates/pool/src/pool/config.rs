//! Executor pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A size or duration was zero
    #[error("{field} must be positive")]
    Zero { field: &'static str },

    /// Core size above max size
    #[error("core size {core} exceeds max size {max}")]
    CoreExceedsMax { core: usize, max: usize },

    /// A duration above [`MAX_DURATION`]
    #[error("{field} exceeds the maximum of {max_secs}s")]
    TooLong { field: &'static str, max_secs: u64 },
}

/// Upper bound for keep-alive and timeout durations (one year)
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Live-tunable pool limits
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use methodpool::pool::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_core_size(4)
///     .with_max_size(16)
///     .with_keep_alive(Duration::from_secs(30));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Workers kept alive even when idle
    pub core_size: usize,

    /// Upper bound on workers; beyond it submissions run on the caller
    pub max_size: usize,

    /// How long a worker above `core_size` may stay idle
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,

    /// Batch timeout used by `invoke_all_default`
    #[serde(with = "duration_secs")]
    pub default_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: 10,
            max_size: 50,
            keep_alive: Duration::from_secs(2 * 60),
            default_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the core size
    pub fn with_core_size(mut self, size: usize) -> Self {
        self.core_size = size;
        self
    }

    /// Set the max size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the idle keep-alive
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the default batch timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_limits(self.core_size, self.max_size, self.keep_alive)?;
        validate_timeout(self.default_timeout)
    }
}

pub(crate) fn validate_limits(
    core: usize,
    max: usize,
    keep_alive: Duration,
) -> Result<(), ConfigError> {
    if core == 0 {
        return Err(ConfigError::Zero { field: "core_size" });
    }
    if max == 0 {
        return Err(ConfigError::Zero { field: "max_size" });
    }
    validate_duration("keep_alive", keep_alive)?;
    if core > max {
        return Err(ConfigError::CoreExceedsMax { core, max });
    }
    Ok(())
}

pub(crate) fn validate_timeout(timeout: Duration) -> Result<(), ConfigError> {
    validate_duration("default_timeout", timeout)
}

fn validate_duration(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Zero { field });
    }
    if value > MAX_DURATION {
        return Err(ConfigError::TooLong {
            field,
            max_secs: MAX_DURATION.as_secs(),
        });
    }
    Ok(())
}

/// Full executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Pool name used in worker thread names and logs
    pub name: String,

    /// Initial pool limits
    pub pool: PoolConfig,

    /// Delay between monitor runs
    #[serde(with = "duration_secs")]
    pub monitor_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "methodpool".to_string(),
            pool: PoolConfig::default(),
            monitor_interval: Duration::from_secs(60),
        }
    }
}

impl ExecutorConfig {
    /// Create a configuration with the given pool name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `METHODPOOL_NAME`: Pool name (default: "methodpool")
    /// - `METHODPOOL_CORE_SIZE`: Core worker count (default: 10)
    /// - `METHODPOOL_MAX_SIZE`: Maximum worker count (default: 50)
    /// - `METHODPOOL_KEEP_ALIVE_SECS`: Idle keep-alive (default: 120)
    /// - `METHODPOOL_TIMEOUT_SECS`: Default batch timeout (default: 10)
    /// - `METHODPOOL_MONITOR_INTERVAL_SECS`: Monitor delay (default: 60)
    ///
    /// Absent or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            env_number(key).map(Duration::from_secs).unwrap_or(fallback)
        };
        Self {
            name: std::env::var("METHODPOOL_NAME").unwrap_or(defaults.name),
            pool: PoolConfig {
                core_size: env_number("METHODPOOL_CORE_SIZE")
                    .map(|v| v as usize)
                    .unwrap_or(defaults.pool.core_size),
                max_size: env_number("METHODPOOL_MAX_SIZE")
                    .map(|v| v as usize)
                    .unwrap_or(defaults.pool.max_size),
                keep_alive: secs("METHODPOOL_KEEP_ALIVE_SECS", defaults.pool.keep_alive),
                default_timeout: secs("METHODPOOL_TIMEOUT_SECS", defaults.pool.default_timeout),
            },
            monitor_interval: secs("METHODPOOL_MONITOR_INTERVAL_SECS", defaults.monitor_interval),
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the pool limits
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the monitor interval
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_duration("monitor_interval", self.monitor_interval)?;
        self.pool.validate()
    }
}

fn env_number(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

/// Serde support for Duration as whole seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.core_size, 10);
        assert_eq!(config.max_size, 50);
        assert_eq!(config.keep_alive, Duration::from_secs(120));
        assert_eq!(config.default_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ExecutorConfig::new("orders")
            .with_pool(
                PoolConfig::new()
                    .with_core_size(2)
                    .with_max_size(4)
                    .with_default_timeout(Duration::from_secs(3)),
            )
            .with_monitor_interval(Duration::from_secs(5));

        assert_eq!(config.name, "orders");
        assert_eq!(config.pool.core_size, 2);
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.monitor_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = PoolConfig::new().with_core_size(8).with_max_size(4);
        assert_eq!(
            invalid.validate(),
            Err(ConfigError::CoreExceedsMax { core: 8, max: 4 })
        );

        let zero = PoolConfig::new().with_core_size(0);
        assert_eq!(zero.validate(), Err(ConfigError::Zero { field: "core_size" }));

        let no_monitor = ExecutorConfig::default().with_monitor_interval(Duration::ZERO);
        assert!(no_monitor.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let huge = Duration::from_secs(i64::MAX as u64);
        assert_eq!(
            PoolConfig::new().with_keep_alive(huge).validate(),
            Err(ConfigError::TooLong {
                field: "keep_alive",
                max_secs: MAX_DURATION.as_secs(),
            })
        );
        assert!(matches!(
            PoolConfig::new().with_default_timeout(Duration::MAX).validate(),
            Err(ConfigError::TooLong { field: "default_timeout", .. })
        ));
        assert!(PoolConfig::new().with_keep_alive(MAX_DURATION).validate().is_ok());
    }

    #[test]
    fn test_serde_uses_seconds() {
        let config = PoolConfig::new().with_keep_alive(Duration::from_secs(30));
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["keep_alive"], 30);

        let parsed: PoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("METHODPOOL_NAME", "env-pool");
        std::env::set_var("METHODPOOL_CORE_SIZE", "3");
        std::env::set_var("METHODPOOL_MAX_SIZE", "not-a-number");
        std::env::set_var("METHODPOOL_KEEP_ALIVE_SECS", "15");

        let config = ExecutorConfig::from_env();

        std::env::remove_var("METHODPOOL_NAME");
        std::env::remove_var("METHODPOOL_CORE_SIZE");
        std::env::remove_var("METHODPOOL_MAX_SIZE");
        std::env::remove_var("METHODPOOL_KEEP_ALIVE_SECS");

        assert_eq!(config.name, "env-pool");
        assert_eq!(config.pool.core_size, 3);
        assert_eq!(config.pool.max_size, 50);
        assert_eq!(config.pool.keep_alive, Duration::from_secs(15));
        assert_eq!(config.monitor_interval, Duration::from_secs(60));
    }
}
