//! Periodic statistics and re-tuning
//!
//! The monitor runs on its own thread, once at start and then with a fixed
//! delay between runs. Each run logs pool statistics, then polls the
//! configuration source and applies any changed limits. It holds only a weak
//! reference to the pool, so a dropped pool ends the loop on the next tick.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::executor::Shared;
use super::source::{
    ConfigSource, CORE_POOL_SIZE_KEY, KEEP_ALIVE_SECS_KEY, MAX_POOL_SIZE_KEY, NO_UPDATE,
};

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Running monitor thread
pub(crate) struct Monitor {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    pub(crate) fn spawn(
        shared: Weak<Shared>,
        pool: &str,
        source: Arc<dyn ConfigSource>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name(format!("pool-{pool}-monitor"))
            .spawn(move || run(shared, source.as_ref(), interval, &thread_signal))?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signal the loop and wait for it to exit
    pub(crate) fn stop(mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Pool monitor thread panicked");
            }
        }
    }
}

fn run(shared: Weak<Shared>, source: &dyn ConfigSource, interval: Duration, signal: &StopSignal) {
    debug!(interval_secs = interval.as_secs(), "Pool monitor started");
    loop {
        match shared.upgrade() {
            Some(shared) => {
                tick(&shared, source);
            }
            None => break,
        }

        let mut stopped = signal.stopped.lock();
        if !*stopped {
            signal.wake.wait_for(&mut stopped, interval);
        }
        if *stopped {
            break;
        }
    }
    debug!("Pool monitor stopped");
}

/// One monitor run; returns the new limits if any change was applied
pub(crate) fn tick(shared: &Shared, source: &dyn ConfigSource) -> Option<PoolConfig> {
    let stats = shared.stats();
    info!(
        pool = %shared.name(),
        total = stats.pool_size,
        active = stats.active,
        max_reached = stats.largest,
        done_tasks = stats.completed,
        rejected = stats.rejected,
        "Pool statistics"
    );

    let current = shared.config();
    let core_size = read_property(source, CORE_POOL_SIZE_KEY)
        .map(|v| v as usize)
        .filter(|v| *v != current.core_size);
    let max_size = read_property(source, MAX_POOL_SIZE_KEY)
        .map(|v| v as usize)
        .filter(|v| *v != current.max_size);
    let keep_alive = read_property(source, KEEP_ALIVE_SECS_KEY)
        .map(|v| Duration::from_secs(v as u64))
        .filter(|v| *v != current.keep_alive);

    if core_size.is_none() && max_size.is_none() && keep_alive.is_none() {
        return None;
    }

    match shared.reconfigure(core_size, max_size, keep_alive) {
        Ok(updated) => {
            if let Some(size) = core_size {
                info!(pool = %shared.name(), "corePoolSize changed to {size}");
            }
            if let Some(size) = max_size {
                info!(pool = %shared.name(), "maxPoolSize changed to {size}");
            }
            if let Some(keep_alive) = keep_alive {
                info!(pool = %shared.name(), "keepAliveSecs changed to {}", keep_alive.as_secs());
            }
            Some(updated)
        }
        Err(e) => {
            warn!(pool = %shared.name(), error = %e, "Ignoring pool configuration update");
            None
        }
    }
}

/// Positive value for `key`, or `None` for absent, sentinel and invalid values
fn read_property(source: &dyn ConfigSource, key: &str) -> Option<i64> {
    match source.lookup(key)? {
        NO_UPDATE => None,
        value if value <= 0 => {
            warn!(key, value, "Ignoring non-positive pool property");
            None
        }
        value => Some(value),
    }
}
