//! External configuration sources polled by the monitor
//!
//! A source maps property keys to integers. Returning `None`, or the
//! [`NO_UPDATE`] sentinel, means "nothing to apply".

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Property key for the core worker count
pub const CORE_POOL_SIZE_KEY: &str = "pool.corePoolSize";

/// Property key for the maximum worker count
pub const MAX_POOL_SIZE_KEY: &str = "pool.maxPoolSize";

/// Property key for the idle keep-alive in seconds
pub const KEEP_ALIVE_SECS_KEY: &str = "pool.keepAliveSecs";

/// Sentinel meaning "no applicable value / no change"
pub const NO_UPDATE: i64 = -1;

/// Poll-based key/value property provider
pub trait ConfigSource: Send + Sync {
    /// Current value for `key`, if the source has one
    fn lookup(&self, key: &str) -> Option<i64>;
}

/// Source that never reports an update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpdates;

impl ConfigSource for NoUpdates {
    fn lookup(&self, _key: &str) -> Option<i64> {
        None
    }
}

/// In-process source, updated programmatically
///
/// # Example
///
/// ```
/// use methodpool::pool::{ConfigSource, MemorySource, CORE_POOL_SIZE_KEY};
///
/// let source = MemorySource::new();
/// source.set(CORE_POOL_SIZE_KEY, 4);
/// assert_eq!(source.lookup(CORE_POOL_SIZE_KEY), Some(4));
/// ```
#[derive(Debug, Default)]
pub struct MemorySource {
    values: RwLock<HashMap<String, i64>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value
    pub fn set(&self, key: &str, value: i64) {
        self.values.write().insert(key.to_string(), value);
    }

    /// Remove a value
    pub fn remove(&self, key: &str) -> Option<i64> {
        self.values.write().remove(key)
    }

    /// Remove all values
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

impl ConfigSource for MemorySource {
    fn lookup(&self, key: &str) -> Option<i64> {
        self.values.read().get(key).copied()
    }
}

/// Source backed by environment variables
///
/// `pool.corePoolSize` is read from `POOL_COREPOOLSIZE`, or
/// `<PREFIX>_POOL_COREPOOLSIZE` with a prefix.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: Option<String>,
}

impl EnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every variable name with `prefix` and an underscore
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// Environment variable consulted for `key`
    pub fn var_name(&self, key: &str) -> String {
        let base: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{base}"),
            None => base,
        }
    }
}

impl ConfigSource for EnvSource {
    fn lookup(&self, key: &str) -> Option<i64> {
        let name = self.var_name(key);
        let raw = std::env::var(&name).ok()?;
        match raw.trim().parse::<i64>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(var = %name, value = %raw, "Ignoring non-integer pool property");
                None
            }
        }
    }
}

/// Source that re-reads a flat JSON object on every lookup
///
/// ```json
/// { "pool.corePoolSize": 8, "pool.maxPoolSize": 32, "pool.keepAliveSecs": -1 }
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Pool property file not readable");
                return None;
            }
        };
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            Ok(_) => {
                warn!(path = %self.path.display(), "Pool property file is not a JSON object");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to parse pool property file");
                None
            }
        }
    }
}

impl ConfigSource for JsonFileSource {
    fn lookup(&self, key: &str) -> Option<i64> {
        let map = self.read()?;
        match map.get(key)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
