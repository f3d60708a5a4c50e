//! Diagnostic context and per-call execution context

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::method::OperationError;

thread_local! {
    static AMBIENT: RefCell<DiagnosticContext> = RefCell::new(DiagnosticContext::new());
}

/// String key/value metadata used for log correlation
///
/// The thread-local ambient copy is what callers populate with [`put`]; a
/// snapshot of it travels with every dispatch and is installed on the worker
/// thread for the duration of the call.
///
/// [`put`]: DiagnosticContext::put
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticContext {
    entries: BTreeMap<String, String>,
}

impl DiagnosticContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Snapshot of the current thread's ambient context
    pub fn current() -> Self {
        AMBIENT.with(|ambient| ambient.borrow().clone())
    }

    /// Set a key in the current thread's ambient context
    pub fn put(key: impl Into<String>, value: impl Into<String>) {
        AMBIENT.with(|ambient| ambient.borrow_mut().insert(key, value));
    }

    /// Remove a key from the current thread's ambient context
    pub fn remove(key: &str) -> Option<String> {
        AMBIENT.with(|ambient| ambient.borrow_mut().entries.remove(key))
    }

    /// Clear the current thread's ambient context
    pub fn clear() {
        AMBIENT.with(|ambient| ambient.borrow_mut().entries.clear());
    }

    /// Replace the current thread's ambient context with this snapshot
    ///
    /// The ambient context is cleared when the guard drops, whatever it held
    /// before installation.
    pub fn install(&self) -> ContextGuard {
        self.set_current();
        ContextGuard { _private: () }
    }

    /// Replace the current thread's ambient context without a guard
    pub fn set_current(&self) {
        AMBIENT.with(|ambient| *ambient.borrow_mut() = self.clone());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DiagnosticContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Clears the ambient diagnostic context on drop
#[must_use = "the context is cleared as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    _private: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        DiagnosticContext::clear();
    }
}

/// Cooperative cancellation flag shared between a task and its owner
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Context handed to every operation while it runs
///
/// # Example
///
/// ```ignore
/// fn crunch(&self, args: &Args, ctx: &CallContext) -> Result<Value, OperationError> {
///     for chunk in args.list(0)?.chunks(64) {
///         ctx.checkpoint()?;
///         self.process(chunk);
///     }
///     Ok(Value::Null)
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    diagnostics: DiagnosticContext,
    cancellation: CancellationToken,
}

impl CallContext {
    pub fn new(diagnostics: DiagnosticContext, cancellation: CancellationToken) -> Self {
        Self {
            diagnostics,
            cancellation,
        }
    }

    /// Diagnostic context captured when the work was created
    pub fn diagnostics(&self) -> &DiagnosticContext {
        &self.diagnostics
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Return an interruption error once cancellation was requested
    pub fn checkpoint(&self) -> Result<(), OperationError> {
        if self.is_cancelled() {
            return Err(OperationError::interrupted());
        }
        Ok(())
    }

    /// Get a token that cancels this call
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}
