//! Dispatch descriptors
//!
//! A [`Dispatch`] is one "call `method` on `target` with `args`" request. It
//! captures the caller's diagnostic context and tracing span when built, and
//! records its outcome exactly once when executed.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, info_span};

use super::context::{CallContext, CancellationToken, DiagnosticContext};
use super::method::{self, InvokeError, Target};
use super::value::Value;

/// Type-erased dispatch surface
///
/// Lets a [`Dispatch`] hold any [`Target`] without knowing its concrete type.
trait AnyTarget: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        ctx: &CallContext,
    ) -> Result<Option<Value>, InvokeError>;
}

/// Wrapper to implement AnyTarget for any shared Target
struct TargetWrapper<T: Target> {
    inner: Arc<T>,
}

impl<T: Target> AnyTarget for TargetWrapper<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        ctx: &CallContext,
    ) -> Result<Option<Value>, InvokeError> {
        method::invoke(self.inner.as_ref(), method, args, ctx)
    }
}

/// Recorded result of a dispatch
#[derive(Debug, Clone)]
struct Outcome {
    result: Option<Value>,
    failure: Option<InvokeError>,
}

struct Inner {
    target: Box<dyn AnyTarget>,
    method: String,
    args: Vec<Value>,
    context: DiagnosticContext,
    span: tracing::Span,
    started: AtomicBool,
    outcome: OnceLock<Outcome>,
}

/// One unit of work: a named method call on a target
///
/// Cloning is cheap and every clone observes the same outcome, so the caller
/// can keep one clone and hand another to the pool.
///
/// # Example
///
/// ```ignore
/// let dispatch = Dispatch::new(calculator, "add", vec![2.into(), 3.into()]);
/// pool.submit(dispatch.clone()).wait()?;
/// assert!(dispatch.succeeded());
/// assert_eq!(dispatch.result(), Some(&Value::I32(5)));
/// ```
#[derive(Clone)]
pub struct Dispatch {
    inner: Arc<Inner>,
}

impl Dispatch {
    /// Create a dispatch, capturing the current diagnostic context and span
    pub fn new<T: Target>(target: Arc<T>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self::with_context(target, method, args, DiagnosticContext::current())
    }

    /// Create a dispatch with an explicit diagnostic context
    pub fn with_context<T: Target>(
        target: Arc<T>,
        method: impl Into<String>,
        args: Vec<Value>,
        context: DiagnosticContext,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                target: Box::new(TargetWrapper { inner: target }),
                method: method.into(),
                args,
                context,
                span: tracing::Span::current(),
                started: AtomicBool::new(false),
                outcome: OnceLock::new(),
            }),
        }
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    /// Diagnostic context captured at construction
    pub fn context(&self) -> &DiagnosticContext {
        &self.inner.context
    }

    /// Rust type name of the target
    pub fn target_type(&self) -> &'static str {
        self.inner.target.type_name()
    }

    /// Whether the dispatch has run
    pub fn is_complete(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// True once the method returned normally, with or without a value
    pub fn succeeded(&self) -> bool {
        self.inner
            .outcome
            .get()
            .is_some_and(|o| o.failure.is_none())
    }

    /// Value returned by the method, if any
    pub fn result(&self) -> Option<&Value> {
        self.inner.outcome.get().and_then(|o| o.result.as_ref())
    }

    /// Failure captured during execution, if any
    pub fn failure(&self) -> Option<&InvokeError> {
        self.inner.outcome.get().and_then(|o| o.failure.as_ref())
    }

    /// Execute on the current thread without cancellation support
    pub fn run(&self) -> Result<Option<Value>, InvokeError> {
        self.run_with(CancellationToken::new())
    }

    /// Execute on the current thread, observing `cancellation`
    ///
    /// The captured diagnostic context is installed around the call and
    /// cleared afterwards on every path. The first run claims the
    /// descriptor; any other run, concurrent or later, fails with
    /// [`InvokeError::AlreadyConsumed`] without calling the method.
    pub fn run_with(&self, cancellation: CancellationToken) -> Result<Option<Value>, InvokeError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::AcqRel) {
            return Err(InvokeError::AlreadyConsumed {
                method: inner.method.clone(),
            });
        }

        let span = info_span!(
            parent: &inner.span,
            "dispatch",
            method = %inner.method,
            target = inner.target.type_name(),
        );
        let _entered = span.enter();
        let _context = inner.context.install();

        let ctx = CallContext::new(inner.context.clone(), cancellation);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            inner.target.invoke(&inner.method, inner.args.clone(), &ctx)
        }))
        .unwrap_or_else(|payload| {
            Err(InvokeError::Panicked {
                method: inner.method.clone(),
                message: panic_message(payload.as_ref()),
            })
        });

        match &outcome {
            Ok(_) => debug!("dispatch succeeded"),
            Err(e) => error!(error = %e, "error executing method"),
        }

        let recorded = match &outcome {
            Ok(result) => Outcome {
                result: result.clone(),
                failure: None,
            },
            Err(e) => Outcome {
                result: None,
                failure: Some(e.clone()),
            },
        };
        // Only the claiming run reaches this point.
        let _ = inner.outcome.set(recorded);
        outcome
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("target", &self.target_type())
            .field("method", &self.inner.method)
            .field("args", &self.inner.args)
            .field("complete", &self.is_complete())
            .field("succeeded", &self.succeeded())
            .finish()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
