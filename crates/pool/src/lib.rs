//! # Method Dispatch Pool
//!
//! Runs "call method M on target O with arguments A" units of work on a
//! bounded, self-tuning thread pool.
//!
//! ## Features
//!
//! - **Runtime method resolution**: methods are looked up by name and argument list, with variadic adaptation
//! - **Context propagation**: the submitter's diagnostic context travels with each dispatch
//! - **Caller-runs backpressure**: a saturated pool runs work on the submitting thread instead of queuing
//! - **Live re-tuning**: a monitor polls an external source and applies new limits atomically
//! - **Fail-fast teardown**: stopping the pool interrupts outstanding work instead of draining it
//!
//! ## Example
//!
//! ```ignore
//! use methodpool::prelude::*;
//!
//! struct Calculator;
//!
//! impl Target for Calculator {
//!     fn methods(&self) -> &MethodTable<Self> {
//!         static TABLE: OnceLock<MethodTable<Calculator>> = OnceLock::new();
//!         TABLE.get_or_init(|| {
//!             MethodTable::new().method("add", [ParamType::I32, ParamType::I32], |_, args, _| {
//!                 Ok(Value::I32(args.i32(0)? + args.i32(1)?))
//!             })
//!         })
//!     }
//! }
//!
//! let pool = ExecutorPool::new(ExecutorConfig::new("calc"))?;
//! pool.start()?;
//!
//! let dispatch = Dispatch::new(Arc::new(Calculator), "add", vec![2.into(), 3.into()]);
//! let outcome = pool.invoke_all(&[dispatch.clone()], Duration::from_secs(1));
//! assert!(outcome.is_complete());
//! assert_eq!(dispatch.result(), Some(&Value::I32(5)));
//! ```

pub mod invoke;
pub mod pool;

/// Prelude for common imports
pub mod prelude {
    pub use crate::invoke::{
        invoke, Args, CallContext, CancellationToken, DiagnosticContext, Dispatch, InvokeError,
        MethodTable, OperationError, ParamType, Target, Value,
    };
    pub use crate::pool::{
        BatchOutcome, BatchStatus, ConfigSource, ExecutorConfig, ExecutorPool, PoolConfig,
        PoolError, TaskError, TaskHandle,
    };
}

pub use invoke::{Dispatch, InvokeError, Target, Value};
pub use pool::{ExecutorConfig, ExecutorPool, PoolConfig, PoolError};
