//! Bounded executor pool
//!
//! This module provides:
//! - [`ExecutorPool`] - Worker threads between core and max size, caller-runs on saturation
//! - [`TaskHandle`] - Completion handle for a submitted dispatch or callable
//! - [`ConfigSource`] - Externally controlled limits polled by the monitor
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ExecutorPool                           │
//! │                                                              │
//! │  submit ──► core spawn ──► idle hand-off ──► max spawn       │
//! │                                                   │          │
//! │                                                   ▼          │
//! │                                   caller-runs (rejected++)   │
//! │                                                              │
//! │  ┌──────────────────────┐   ┌─────────────────────────────┐  │
//! │  │ pool-<name>-thread-N │   │ pool-<name>-monitor         │  │
//! │  │ (keep-alive retire)  │   │ stats + ConfigSource poll   │  │
//! │  └──────────────────────┘   └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use methodpool::pool::{ExecutorConfig, ExecutorPool, JsonFileSource};
//!
//! let source = Arc::new(JsonFileSource::new("/etc/orders/pool.json"));
//! let pool = ExecutorPool::with_source(ExecutorConfig::from_env(), source)?;
//! pool.start()?;
//!
//! let outcome = pool.invoke_all_default(&dispatches);
//!
//! pool.stop();
//! pool.await_termination(Duration::from_secs(5));
//! ```

mod config;
mod executor;
mod handle;
mod monitor;
mod rejection;
mod source;

pub use config::{ConfigError, ExecutorConfig, PoolConfig, MAX_DURATION};
pub use executor::{BatchOutcome, BatchStatus, ExecutorPool, PoolError, PoolStats, WorkerIdentity};
pub use handle::{TaskError, TaskHandle};
pub use rejection::RejectionCounter;
pub use source::{
    ConfigSource, EnvSource, JsonFileSource, MemorySource, NoUpdates, CORE_POOL_SIZE_KEY,
    KEEP_ALIVE_SECS_KEY, MAX_POOL_SIZE_KEY, NO_UPDATE,
};
