//! Completion handles for submitted work

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::invoke::{CancellationToken, InvokeError, OperationError};

/// Why a task produced no value
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The dispatch failed to resolve or its method failed
    #[error(transparent)]
    Dispatch(#[from] InvokeError),

    /// A raw callable returned an error
    #[error("task failed: {0}")]
    Failed(#[source] OperationError),

    /// A raw callable panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before it completed
    #[error("task was cancelled")]
    Cancelled,

    /// The pool was shut down before the task completed
    #[error("executor pool has been shut down")]
    ShutDown,
}

enum Slot<T> {
    Pending,
    Done(Result<T, TaskError>),
    Taken,
}

/// Shared completion state between a task and its handle
pub(crate) struct TaskState<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    cancellation: CancellationToken,
}

impl<T> TaskState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
            cancellation: CancellationToken::new(),
        })
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Resolve the task; the first resolution wins
    pub(crate) fn complete(&self, result: Result<T, TaskError>) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Done(result);
        self.ready.notify_all();
        true
    }

    fn is_finished(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Pending)
    }
}

/// Something the pool can interrupt on shutdown or timeout
pub(crate) trait Interrupt: Send + Sync {
    /// Raise the cancellation flag and resolve with `reason` if still pending
    fn interrupt(&self, reason: TaskError) -> bool;
}

impl<T: Send> Interrupt for TaskState<T> {
    fn interrupt(&self, reason: TaskError) -> bool {
        self.cancellation.cancel();
        self.complete(Err(reason))
    }
}

/// Handle to a submitted task
///
/// # Example
///
/// ```ignore
/// let handle = pool.submit_fn(|_ctx| Ok(6 * 7));
/// if handle.wait_for(Duration::from_secs(1)) {
///     assert_eq!(handle.wait()?, 42);
/// }
/// ```
pub struct TaskHandle<T> {
    id: u64,
    state: Arc<TaskState<T>>,
}

impl<T: Send> TaskHandle<T> {
    pub(crate) fn new(id: u64, state: Arc<TaskState<T>>) -> Self {
        Self { id, state }
    }

    /// Pool-assigned task id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the task has a result
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Block until the task completes and take its result
    pub fn wait(self) -> Result<T, TaskError> {
        let mut slot = self.state.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.state.ready.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Done(result) => result,
            Slot::Pending | Slot::Taken => Err(TaskError::Cancelled),
        }
    }

    /// Block for at most `timeout`; returns whether the task has completed
    pub fn wait_for(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => {
                let mut slot = self.state.slot.lock();
                while matches!(*slot, Slot::Pending) {
                    self.state.ready.wait(&mut slot);
                }
                true
            }
        }
    }

    /// Block until `deadline`; returns whether the task has completed
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut slot = self.state.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.state.ready.wait_until(&mut slot, deadline).timed_out() {
                return !matches!(*slot, Slot::Pending);
            }
        }
        true
    }

    /// Cancel the task
    ///
    /// The handle resolves to [`TaskError::Cancelled`] immediately. Work that
    /// is already running keeps going until it observes its cancellation flag.
    /// Returns false if the task had already completed.
    pub fn cancel(&self) -> bool {
        self.state.interrupt(TaskError::Cancelled)
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &!matches!(*self.state.slot.lock(), Slot::Pending))
            .finish()
    }
}
