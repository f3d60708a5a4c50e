//! Runtime method dispatch
//!
//! This module provides:
//! - [`Value`] / [`ParamType`] - Dynamically typed arguments and declared parameter types
//! - [`MethodTable`] - Per-type registry of named operations with overload resolution
//! - [`Dispatch`] - A single "call method M on target O with args A" unit of work
//! - [`DiagnosticContext`] / [`CallContext`] - Context propagated into each call
//!
//! # Example
//!
//! ```ignore
//! use methodpool::invoke::{Dispatch, Value};
//!
//! let dispatch = Dispatch::new(Arc::new(Calculator), "add", vec![2.into(), 3.into()]);
//! assert_eq!(dispatch.run()?, Some(Value::I32(5)));
//! ```

mod context;
mod dispatch;
mod method;
mod value;

pub(crate) use dispatch::panic_message;

pub use context::{CallContext, CancellationToken, ContextGuard, DiagnosticContext};
pub use dispatch::Dispatch;
pub use method::{invoke, Args, InvokeError, Method, MethodFn, MethodTable, OperationError, Target};
pub use value::{Opaque, ParamType, TypeTag, Value};
