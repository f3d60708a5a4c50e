//! Bounded executor pool
//!
//! Manages a set of named worker threads between `core_size` and `max_size`.
//! There is no task queue: a submission is handed directly to a new or idle
//! worker, or run on the caller when the pool is saturated.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::config::{validate_limits, validate_timeout, ConfigError, ExecutorConfig, PoolConfig};
use super::handle::{Interrupt, TaskError, TaskHandle, TaskState};
use super::monitor::Monitor;
use super::rejection::{run_on_caller, RejectionCounter};
use super::source::{ConfigSource, NoUpdates};
use crate::invoke::{
    panic_message, CallContext, CancellationToken, DiagnosticContext, Dispatch, OperationError,
    Value,
};

/// How often a batch wait re-checks for caller interruption
const BATCH_WAIT_SLICE: Duration = Duration::from_millis(20);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executor pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid configuration
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    /// Monitor already started
    #[error("executor pool is already running")]
    AlreadyRunning,

    /// Pool was stopped
    #[error("executor pool has been stopped")]
    Stopped,

    /// A background thread could not be spawned
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Identity of one worker thread, used for naming and logs only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pool: String,
    sequence: usize,
}

impl WorkerIdentity {
    pub fn new(pool: impl Into<String>, sequence: usize) -> Self {
        Self {
            pool: pool.into(),
            sequence,
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// OS thread name
    pub fn thread_name(&self) -> String {
        format!("pool-{}-thread-{}", self.pool, self.sequence)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.thread_name())
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live worker threads
    pub pool_size: usize,
    /// Workers currently running a task
    pub active: usize,
    /// Highest worker count ever reached
    pub largest: usize,
    /// Tasks finished on worker threads
    pub completed: u64,
    /// Tasks run on the caller because the pool was saturated
    pub rejected: u64,
}

/// How a batch wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every dispatch finished before the deadline
    Completed,
    /// The deadline passed with work outstanding
    TimedOut,
    /// The waiting caller was interrupted
    Interrupted,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Result of [`ExecutorPool::invoke_all`]
///
/// Per-dispatch results stay on the [`Dispatch`] descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    /// Dispatches in the batch
    pub total: usize,
    /// Dispatches whose method returned normally
    pub completed: usize,
    /// Dispatches that failed to resolve or whose method failed
    pub failed: usize,
    /// Dispatches cancelled or never started
    pub cancelled: usize,
}

impl BatchOutcome {
    /// True when every dispatch ran to completion, successfully or not
    pub fn is_complete(&self) -> bool {
        self.status == BatchStatus::Completed
    }
}

struct PoolState {
    config: PoolConfig,
    workers: usize,
    idle: usize,
    largest: usize,
    handoff: VecDeque<Job>,
    shutdown: bool,
}

impl PoolState {
    fn add_worker(&mut self) {
        self.workers += 1;
        self.largest = self.largest.max(self.workers);
    }
}

#[derive(Clone, Copy)]
enum Placement {
    Spawn,
    HandOff,
    CallerRuns,
    ShutDown,
}

/// State shared by the pool handle, its workers and the monitor
pub(crate) struct Shared {
    name: String,
    state: Mutex<PoolState>,
    work_ready: Condvar,
    terminated: Condvar,
    next_worker: AtomicUsize,
    next_task: AtomicU64,
    completed: AtomicU64,
    rejected: RejectionCounter,
    in_flight: Mutex<HashMap<u64, Arc<dyn Interrupt>>>,
}

impl Shared {
    pub(crate) fn new(name: String, config: PoolConfig) -> Self {
        Self {
            name,
            state: Mutex::new(PoolState {
                config,
                workers: 0,
                idle: 0,
                largest: 0,
                handoff: VecDeque::new(),
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            terminated: Condvar::new(),
            next_worker: AtomicUsize::new(1),
            next_task: AtomicU64::new(1),
            completed: AtomicU64::new(0),
            rejected: RejectionCounter::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn config(&self) -> PoolConfig {
        self.state.lock().config
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let (pool_size, active, largest) = {
            let state = self.state.lock();
            (state.workers, state.workers - state.idle, state.largest)
        };
        PoolStats {
            pool_size,
            active,
            largest,
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.get(),
        }
    }

    /// Apply new limits atomically; `None` keeps the current value
    pub(crate) fn reconfigure(
        &self,
        core_size: Option<usize>,
        max_size: Option<usize>,
        keep_alive: Option<Duration>,
    ) -> Result<PoolConfig, ConfigError> {
        let updated = {
            let mut state = self.state.lock();
            let mut next = state.config;
            next.core_size = core_size.unwrap_or(next.core_size);
            next.max_size = max_size.unwrap_or(next.max_size);
            next.keep_alive = keep_alive.unwrap_or(next.keep_alive);
            validate_limits(next.core_size, next.max_size, next.keep_alive)?;
            state.config = next;
            next
        };
        // Idle workers re-check whether they are now surplus.
        self.work_ready.notify_all();
        Ok(updated)
    }

    pub(crate) fn set_default_timeout(&self, timeout: Duration) -> Result<(), ConfigError> {
        validate_timeout(timeout)?;
        self.state.lock().config.default_timeout = timeout;
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    fn track(&self, id: u64, task: Arc<dyn Interrupt>) {
        self.in_flight.lock().insert(id, task);
    }

    fn untrack(&self, id: u64) {
        self.in_flight.lock().remove(&id);
    }

    fn abort(&self, id: u64, reason: TaskError) {
        let task = self.in_flight.lock().remove(&id);
        if let Some(task) = task {
            task.interrupt(reason);
        }
    }

    fn schedule(self: &Arc<Self>, id: u64, job: Job) {
        let placement = {
            let mut state = self.state.lock();
            let placement = if state.shutdown {
                Placement::ShutDown
            } else if state.workers < state.config.core_size {
                Placement::Spawn
            } else if state.handoff.len() < state.idle {
                Placement::HandOff
            } else if state.workers < state.config.max_size {
                Placement::Spawn
            } else {
                Placement::CallerRuns
            };
            match placement {
                Placement::Spawn => state.add_worker(),
                Placement::HandOff => {
                    state.handoff.push_back(job);
                    drop(state);
                    self.work_ready.notify_one();
                    return;
                }
                Placement::CallerRuns | Placement::ShutDown => {}
            }
            placement
        };

        match placement {
            Placement::Spawn => {
                if let Err(job) = self.spawn_worker(job) {
                    self.worker_exited();
                    run_on_caller(&self.name, &self.rejected, job);
                }
            }
            Placement::CallerRuns => run_on_caller(&self.name, &self.rejected, job),
            Placement::ShutDown => {
                debug!(pool = %self.name, task_id = id, "Rejecting task, pool is shut down");
                self.abort(id, TaskError::ShutDown);
            }
            Placement::HandOff => {}
        }
    }

    /// Start a worker thread running `first`; gives the job back on failure
    fn spawn_worker(self: &Arc<Self>, first: Job) -> Result<(), Job> {
        let identity = WorkerIdentity::new(
            self.name.clone(),
            self.next_worker.fetch_add(1, Ordering::Relaxed),
        );
        let slot = Arc::new(Mutex::new(Some(first)));
        let first_job = Arc::clone(&slot);
        let shared = Arc::clone(self);

        let spawned = thread::Builder::new()
            .name(identity.thread_name())
            .spawn(move || {
                let first = first_job.lock().take();
                shared.run_worker(identity, first);
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(pool = %self.name, error = %e, "Failed to spawn worker thread");
                match slot.lock().take() {
                    Some(job) => Err(job),
                    None => Ok(()),
                }
            }
        }
    }

    fn run_worker(&self, identity: WorkerIdentity, first: Option<Job>) {
        debug!(worker = %identity, "Worker started");

        let mut next = match first {
            Some(job) => Some(job),
            None => self.next_job(&identity),
        };
        while let Some(job) = next {
            job();
            self.completed.fetch_add(1, Ordering::Relaxed);
            next = self.next_job(&identity);
        }

        debug!(worker = %identity, "Worker exited");
    }

    /// Wait for the next handed-off job, or retire
    fn next_job(&self, identity: &WorkerIdentity) -> Option<Job> {
        let mut state = self.state.lock();
        state.idle += 1;
        let idle_since = Instant::now();

        loop {
            if state.shutdown {
                break;
            }
            if let Some(job) = state.handoff.pop_front() {
                state.idle -= 1;
                return Some(job);
            }
            if state.workers > state.config.max_size {
                debug!(worker = %identity, "Retiring worker above max size");
                break;
            }
            let keep_alive_deadline = if state.workers > state.config.core_size {
                idle_since.checked_add(state.config.keep_alive)
            } else {
                None
            };
            match keep_alive_deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    debug!(worker = %identity, "Retiring idle worker after keep-alive");
                    break;
                }
                Some(deadline) => {
                    self.work_ready.wait_until(&mut state, deadline);
                }
                // At or below core, or a keep-alive past the clock's range.
                None => self.work_ready.wait(&mut state),
            }
        }

        state.idle -= 1;
        state.workers -= 1;
        if state.workers == 0 {
            self.terminated.notify_all();
        }
        None
    }

    fn worker_exited(&self) {
        let mut state = self.state.lock();
        state.workers -= 1;
        if state.workers == 0 {
            self.terminated.notify_all();
        }
    }

    /// Mark shut down and interrupt everything outstanding
    ///
    /// Returns the number of interrupted tasks, or `None` if already stopped.
    fn shutdown_now(&self) -> Option<usize> {
        let abandoned: Vec<Job> = {
            let mut state = self.state.lock();
            if state.shutdown {
                return None;
            }
            state.shutdown = true;
            state.handoff.drain(..).collect()
        };
        self.work_ready.notify_all();
        drop(abandoned);

        let tasks: Vec<Arc<dyn Interrupt>> =
            self.in_flight.lock().drain().map(|(_, task)| task).collect();
        let interrupted = tasks
            .iter()
            .filter(|task| task.interrupt(TaskError::ShutDown))
            .count();
        Some(interrupted)
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.workers > 0 {
            match deadline {
                Some(deadline) => {
                    if self.terminated.wait_until(&mut state, deadline).timed_out() {
                        return state.workers == 0;
                    }
                }
                None => self.terminated.wait(&mut state),
            }
        }
        true
    }
}

/// Bounded, self-tuning pool for dispatches and raw callables
///
/// # Example
///
/// ```ignore
/// use methodpool::pool::{ExecutorConfig, ExecutorPool};
///
/// let pool = ExecutorPool::new(ExecutorConfig::new("orders"))?;
/// pool.start()?;
///
/// let handle = pool.submit(Dispatch::new(service, "process", vec![order_id.into()]));
/// let outcome = pool.invoke_all(&batch, Duration::from_secs(5));
///
/// // Wire into the host's termination path
/// pool.stop();
/// ```
pub struct ExecutorPool {
    shared: Arc<Shared>,
    source: Arc<dyn ConfigSource>,
    monitor_interval: Duration,
    monitor: Mutex<Option<Monitor>>,
}

impl ExecutorPool {
    /// Create a pool whose monitor never receives configuration updates
    pub fn new(config: ExecutorConfig) -> Result<Self, PoolError> {
        Self::with_source(config, Arc::new(NoUpdates))
    }

    /// Create a pool re-tuned from `source` by the monitor
    pub fn with_source(
        config: ExecutorConfig,
        source: Arc<dyn ConfigSource>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config.name, config.pool)),
            source,
            monitor_interval: config.monitor_interval,
            monitor: Mutex::new(None),
        })
    }

    /// Start the periodic monitor
    #[instrument(skip(self), fields(pool = %self.shared.name))]
    pub fn start(&self) -> Result<(), PoolError> {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return Err(PoolError::AlreadyRunning);
        }
        if self.shared.is_shutdown() {
            return Err(PoolError::Stopped);
        }

        let config = self.shared.config();
        info!(
            core_size = config.core_size,
            max_size = config.max_size,
            keep_alive_secs = config.keep_alive.as_secs(),
            monitor_interval_secs = self.monitor_interval.as_secs(),
            "Starting executor pool"
        );

        *monitor = Some(Monitor::spawn(
            Arc::downgrade(&self.shared),
            self.shared.name(),
            Arc::clone(&self.source),
            self.monitor_interval,
        )?);
        Ok(())
    }

    /// Tear down immediately
    ///
    /// Outstanding tasks are interrupted rather than drained: their handles
    /// resolve to [`TaskError::ShutDown`] and their cancellation flags are
    /// raised. Idle workers exit; busy workers exit after their current task.
    /// Calling `stop` more than once is harmless.
    #[instrument(skip(self), fields(pool = %self.shared.name))]
    pub fn stop(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        if let Some(interrupted) = self.shared.shutdown_now() {
            info!(interrupted, "Executor pool stopped");
        }
    }

    /// Wait until every worker thread has exited
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.await_termination(timeout)
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn is_running(&self) -> bool {
        self.monitor.lock().is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Currently applied limits
    pub fn config(&self) -> PoolConfig {
        self.shared.config()
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Total caller-runs events
    pub fn rejected_count(&self) -> u64 {
        self.shared.rejected.get()
    }

    /// Apply new limits atomically; `None` keeps the current value
    pub fn reconfigure(
        &self,
        core_size: Option<usize>,
        max_size: Option<usize>,
        keep_alive: Option<Duration>,
    ) -> Result<PoolConfig, ConfigError> {
        self.shared.reconfigure(core_size, max_size, keep_alive)
    }

    pub fn set_core_size(&self, core_size: usize) -> Result<(), ConfigError> {
        self.reconfigure(Some(core_size), None, None).map(|_| ())
    }

    pub fn set_max_size(&self, max_size: usize) -> Result<(), ConfigError> {
        self.reconfigure(None, Some(max_size), None).map(|_| ())
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) -> Result<(), ConfigError> {
        self.reconfigure(None, None, Some(keep_alive)).map(|_| ())
    }

    /// Change the timeout used by [`invoke_all_default`](Self::invoke_all_default)
    pub fn set_default_timeout(&self, timeout: Duration) -> Result<(), ConfigError> {
        self.shared.set_default_timeout(timeout)?;
        info!(pool = %self.shared.name, timeout_secs = timeout.as_secs_f64(), "Default batch timeout changed");
        Ok(())
    }

    /// Submit a dispatch
    ///
    /// Never blocks on pool capacity. When the pool is saturated the dispatch
    /// runs on this thread and the returned handle is already resolved.
    pub fn submit(&self, dispatch: Dispatch) -> TaskHandle<Option<Value>> {
        self.execute(move |cancellation| dispatch.run_with(cancellation).map_err(TaskError::from))
    }

    /// Submit a raw callable
    ///
    /// The current diagnostic context is captured now and installed around
    /// the call.
    pub fn submit_fn<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CallContext) -> Result<T, OperationError> + Send + 'static,
    {
        let diagnostics = DiagnosticContext::current();
        self.execute(move |cancellation| {
            let _context = diagnostics.install();
            let ctx = CallContext::new(diagnostics.clone(), cancellation);
            match panic::catch_unwind(AssertUnwindSafe(|| f(&ctx))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            }
        })
    }

    fn execute<T, F>(&self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, TaskError> + Send + 'static,
    {
        let id = self.shared.next_task.fetch_add(1, Ordering::Relaxed);
        let state = TaskState::<T>::new();
        let handle = TaskHandle::new(id, Arc::clone(&state));
        self.shared.track(id, Arc::clone(&state) as Arc<dyn Interrupt>);

        let shared = Arc::clone(&self.shared);
        let job: Job = Box::new(move || {
            let cancellation = state.cancellation();
            if !cancellation.is_cancelled() {
                state.complete(body(cancellation));
            }
            shared.untrack(id);
        });
        self.shared.schedule(id, job);
        handle
    }

    /// Run a batch with the configured default timeout
    pub fn invoke_all_default(&self, dispatches: &[Dispatch]) -> BatchOutcome {
        let timeout = self.config().default_timeout;
        self.invoke_all(dispatches, timeout)
    }

    /// Submit every dispatch and wait up to `timeout` for all of them
    ///
    /// Dispatches still outstanding at the deadline are cancelled and
    /// dispatches not yet submitted are never started.
    pub fn invoke_all(&self, dispatches: &[Dispatch], timeout: Duration) -> BatchOutcome {
        self.invoke_all_interruptible(dispatches, timeout, &CancellationToken::new())
    }

    /// [`invoke_all`](Self::invoke_all), abandoning the wait once `interrupt`
    /// is cancelled
    #[instrument(skip(self, dispatches, interrupt), fields(pool = %self.shared.name, total = dispatches.len()))]
    pub fn invoke_all_interruptible(
        &self,
        dispatches: &[Dispatch],
        timeout: Duration,
        interrupt: &CancellationToken,
    ) -> BatchOutcome {
        // `None` when the timeout is past the clock's range: wait without limit.
        let deadline = Instant::now().checked_add(timeout);
        let mut status = BatchStatus::Completed;
        let mut handles = Vec::with_capacity(dispatches.len());

        for dispatch in dispatches {
            if interrupt.is_cancelled() {
                status = BatchStatus::Interrupted;
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                status = BatchStatus::TimedOut;
                break;
            }
            handles.push(self.submit(dispatch.clone()));
        }

        if status == BatchStatus::Completed {
            status = wait_all(&handles, deadline, interrupt);
        }

        let mut outcome = BatchOutcome {
            status,
            total: dispatches.len(),
            completed: 0,
            failed: 0,
            cancelled: dispatches.len() - handles.len(),
        };
        for handle in handles {
            handle.cancel();
            match handle.wait() {
                Ok(_) => outcome.completed += 1,
                Err(TaskError::Cancelled | TaskError::ShutDown) => outcome.cancelled += 1,
                Err(_) => outcome.failed += 1,
            }
        }

        match outcome.status {
            BatchStatus::Completed => debug!(
                completed = outcome.completed,
                failed = outcome.failed,
                "Batch finished"
            ),
            status => warn!(
                %status,
                completed = outcome.completed,
                failed = outcome.failed,
                cancelled = outcome.cancelled,
                "Batch did not finish"
            ),
        }
        outcome
    }
}

fn wait_all<T: Send>(
    handles: &[TaskHandle<T>],
    deadline: Option<Instant>,
    interrupt: &CancellationToken,
) -> BatchStatus {
    for handle in handles {
        loop {
            if interrupt.is_cancelled() {
                return BatchStatus::Interrupted;
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                if handle.is_finished() {
                    break;
                }
                return BatchStatus::TimedOut;
            }
            let slice = now + BATCH_WAIT_SLICE;
            let until = deadline.map_or(slice, |d| slice.min(d));
            if handle.wait_until(until) {
                break;
            }
        }
    }
    BatchStatus::Completed
}

impl Drop for ExecutorPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ExecutorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorPool")
            .field("name", &self.shared.name)
            .field("config", &self.config())
            .field("stats", &self.stats())
            .finish()
    }
}
