//! Method tables and runtime overload resolution
//!
//! A [`MethodTable`] maps method names to an ordered list of candidate
//! implementations. Resolution picks the candidate whose declared parameter
//! types accept the runtime arguments:
//!
//! 1. the first registered fixed-arity method with exactly `args.len()`
//!    parameters that all accept their argument;
//! 2. otherwise the first registered variadic method whose fixed prefix fits
//!    and whose element type accepts every trailing argument.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use super::context::CallContext;
use super::value::{ParamType, Value};

/// Failure raised by an operation body
#[derive(Debug, Clone)]
pub struct OperationError {
    message: String,
    interrupted: bool,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            interrupted: false,
            source: None,
        }
    }

    /// Wrap an underlying error
    pub fn from_error<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Self {
            message: error.to_string(),
            interrupted: false,
            source: Some(Arc::new(error)),
        }
    }

    /// The operation stopped because it observed cancellation
    pub fn interrupted() -> Self {
        Self {
            message: "interrupted".to_string(),
            interrupted: true,
            source: None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for OperationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Errors from resolving or executing a dispatch
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    /// No candidate matched name, arity and argument types
    #[error("no method `{method}` accepting {arity} argument(s)")]
    MethodNotFound { method: String, arity: usize },

    /// Too few arguments for the variadic candidate
    #[error("method `{method}` requires at least {required} argument(s), got {supplied}")]
    ArityMismatch {
        method: String,
        required: usize,
        supplied: usize,
    },

    /// The resolved operation returned an error
    #[error("method `{method}` failed: {source}")]
    Invocation {
        method: String,
        #[source]
        source: OperationError,
    },

    /// The resolved operation panicked
    #[error("method `{method}` panicked: {message}")]
    Panicked { method: String, message: String },

    /// The dispatch already ran once
    #[error("dispatch of `{method}` was already executed")]
    AlreadyConsumed { method: String },
}

impl InvokeError {
    /// Name of the method the error refers to
    pub fn method(&self) -> &str {
        match self {
            InvokeError::MethodNotFound { method, .. }
            | InvokeError::ArityMismatch { method, .. }
            | InvokeError::Invocation { method, .. }
            | InvokeError::Panicked { method, .. }
            | InvokeError::AlreadyConsumed { method } => method,
        }
    }

    /// Whether the operation stopped because it was cancelled
    pub fn is_interrupted(&self) -> bool {
        matches!(self, InvokeError::Invocation { source, .. } if source.is_interrupted())
    }
}

/// Positional arguments as seen by an operation body
///
/// For variadic methods the trailing arguments arrive packed into a single
/// [`Value::List`] at the variadic position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Value, OperationError> {
        self.values
            .get(index)
            .ok_or_else(|| OperationError::new(format!("missing argument {index}")))
    }

    pub fn bool(&self, index: usize) -> Result<bool, OperationError> {
        let value = self.get(index)?;
        value.as_bool().ok_or_else(|| mismatch(index, "bool", value))
    }

    pub fn i32(&self, index: usize) -> Result<i32, OperationError> {
        let value = self.get(index)?;
        value.as_i32().ok_or_else(|| mismatch(index, "i32", value))
    }

    pub fn i64(&self, index: usize) -> Result<i64, OperationError> {
        let value = self.get(index)?;
        value.as_i64().ok_or_else(|| mismatch(index, "integer", value))
    }

    pub fn f64(&self, index: usize) -> Result<f64, OperationError> {
        let value = self.get(index)?;
        value.as_f64().ok_or_else(|| mismatch(index, "number", value))
    }

    pub fn str(&self, index: usize) -> Result<&str, OperationError> {
        let value = self.get(index)?;
        value.as_str().ok_or_else(|| mismatch(index, "str", value))
    }

    pub fn list(&self, index: usize) -> Result<&[Value], OperationError> {
        let value = self.get(index)?;
        value.as_list().ok_or_else(|| mismatch(index, "list", value))
    }

    pub fn object<T: std::any::Any>(&self, index: usize) -> Result<&T, OperationError> {
        let value = self.get(index)?;
        value
            .as_object::<T>()
            .ok_or_else(|| mismatch(index, std::any::type_name::<T>(), value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

fn mismatch(index: usize, expected: &str, got: &Value) -> OperationError {
    OperationError::new(format!(
        "argument {index}: expected {expected}, got {}",
        got.kind()
    ))
}

/// Operation body
pub type MethodFn<T> =
    Arc<dyn Fn(&T, &Args, &CallContext) -> Result<Value, OperationError> + Send + Sync>;

/// One callable entry in a [`MethodTable`]
pub struct Method<T> {
    name: String,
    params: Vec<ParamType>,
    variadic: Option<ParamType>,
    body: MethodFn<T>,
}

impl<T> Method<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fixed parameters, excluding the variadic tail
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Element type of the variadic tail, if any
    pub fn variadic(&self) -> Option<ParamType> {
        self.variadic
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic.is_some()
    }

    fn fixed_args_accepted(&self, args: &[Value]) -> bool {
        self.params.iter().zip(args).all(|(p, a)| p.accepts(a))
    }

    fn matches(&self, args: &[Value]) -> bool {
        match self.variadic {
            None => self.params.len() == args.len() && self.fixed_args_accepted(args),
            Some(element) => {
                self.params.len() <= args.len()
                    && self.fixed_args_accepted(args)
                    && args[self.params.len()..].iter().all(|a| element.accepts(a))
            }
        }
    }

    /// Shape the call arguments for this method
    ///
    /// Variadic methods receive their trailing arguments as one list.
    pub fn bind(&self, mut args: Vec<Value>) -> Result<Args, InvokeError> {
        let fixed = self.params.len();
        if args.len() < fixed || (self.variadic.is_none() && args.len() != fixed) {
            return Err(InvokeError::ArityMismatch {
                method: self.name.clone(),
                required: fixed,
                supplied: args.len(),
            });
        }
        if self.variadic.is_some() {
            let rest = args.split_off(fixed);
            args.push(Value::List(rest));
        }
        Ok(Args::new(args))
    }

    /// Run the body against a target
    pub fn call(&self, target: &T, args: &Args, ctx: &CallContext) -> Result<Value, OperationError> {
        (self.body)(target, args, ctx)
    }
}

impl<T> Clone for Method<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            params: self.params.clone(),
            variadic: self.variadic,
            body: Arc::clone(&self.body),
        }
    }
}

impl<T> fmt::Debug for Method<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .finish()
    }
}

/// Registry of named operations exposed by a target type
///
/// # Example
///
/// ```
/// use methodpool::invoke::{MethodTable, ParamType, Value};
///
/// struct Calculator;
///
/// let table = MethodTable::<Calculator>::new()
///     .method("add", [ParamType::I32, ParamType::I32], |_, args, _| {
///         Ok(Value::from(args.i32(0)? + args.i32(1)?))
///     })
///     .variadic("sum", [], ParamType::I32, |_, args, _| {
///         let total: i32 = args.list(0)?.iter().filter_map(Value::as_i32).sum();
///         Ok(Value::from(total))
///     });
///
/// let add = table.resolve("add", &[Value::from(2), Value::from(3)]).unwrap();
/// assert_eq!(add.params().len(), 2);
/// ```
pub struct MethodTable<T> {
    methods: Vec<Method<T>>,
}

impl<T> Default for MethodTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MethodTable<T> {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// Register a fixed-arity method
    pub fn method<P, F>(mut self, name: &str, params: P, body: F) -> Self
    where
        P: IntoIterator<Item = ParamType>,
        F: Fn(&T, &Args, &CallContext) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        self.methods.push(Method {
            name: name.to_string(),
            params: params.into_iter().collect(),
            variadic: None,
            body: Arc::new(body),
        });
        self
    }

    /// Register a variadic method: fixed `params` followed by any number of
    /// `element` arguments
    pub fn variadic<P, F>(mut self, name: &str, params: P, element: ParamType, body: F) -> Self
    where
        P: IntoIterator<Item = ParamType>,
        F: Fn(&T, &Args, &CallContext) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        self.methods.push(Method {
            name: name.to_string(),
            params: params.into_iter().collect(),
            variadic: Some(element),
            body: Arc::new(body),
        });
        self
    }

    /// Find the method to call for `name` with `args`
    pub fn resolve(&self, name: &str, args: &[Value]) -> Result<&Method<T>, InvokeError> {
        let named = || self.methods.iter().filter(|m| m.name == name);

        if let Some(exact) = named().find(|m| !m.is_variadic() && m.matches(args)) {
            return Ok(exact);
        }
        if let Some(variadic) = named().find(|m| m.is_variadic() && m.matches(args)) {
            return Ok(variadic);
        }

        let arity_fits = named().any(|m| m.params.len() == args.len());
        let required = named()
            .filter(|m| m.is_variadic() && m.params.len() > args.len())
            .map(|m| m.params.len())
            .min();
        match required {
            Some(required) if !arity_fits => Err(InvokeError::ArityMismatch {
                method: name.to_string(),
                required,
                supplied: args.len(),
            }),
            _ => Err(InvokeError::MethodNotFound {
                method: name.to_string(),
                arity: args.len(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered method names in registration order, duplicates included
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.name.as_str())
    }
}

impl<T> fmt::Debug for MethodTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods)
            .finish()
    }
}

/// A type whose operations can be dispatched by name at runtime
///
/// Implementors usually build their table once and keep it in a static:
///
/// ```
/// use std::sync::OnceLock;
/// use methodpool::invoke::{MethodTable, ParamType, Target, Value};
///
/// struct Greeter;
///
/// impl Target for Greeter {
///     fn methods(&self) -> &MethodTable<Self> {
///         static TABLE: OnceLock<MethodTable<Greeter>> = OnceLock::new();
///         TABLE.get_or_init(|| {
///             MethodTable::new().method("greet", [ParamType::Str], |_, args, _| {
///                 Ok(Value::from(format!("hello {}", args.str(0)?)))
///             })
///         })
///     }
/// }
/// ```
pub trait Target: Send + Sync + Sized + 'static {
    fn methods(&self) -> &MethodTable<Self>;
}

/// Resolve, bind and call `method` on `target`
///
/// A `Value::Null` return is reported as "no value". Panics in the body are
/// not caught here; [`Dispatch`](super::Dispatch) does that.
pub fn invoke<T: Target>(
    target: &T,
    method: &str,
    args: Vec<Value>,
    ctx: &CallContext,
) -> Result<Option<Value>, InvokeError> {
    let resolved = target.methods().resolve(method, &args)?;
    let args = resolved.bind(args)?;
    match resolved.call(target, &args, ctx) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(source) => Err(InvokeError::Invocation {
            method: method.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    struct Service;

    impl Target for Service {
        fn methods(&self) -> &MethodTable<Self> {
            static TABLE: OnceLock<MethodTable<Service>> = OnceLock::new();
            TABLE.get_or_init(|| {
                MethodTable::new()
                    .method("add", [ParamType::I32, ParamType::I32], |_, args, _| {
                        Ok(Value::from(args.i32(0)? + args.i32(1)?))
                    })
                    .method("add", [ParamType::I64, ParamType::I64], |_, args, _| {
                        Ok(Value::from(args.i64(0)? + args.i64(1)?))
                    })
                    .variadic("add", [], ParamType::Number, |_, args, _| {
                        Ok(Value::from(
                            args.list(0)?.iter().filter_map(Value::as_f64).sum::<f64>(),
                        ))
                    })
                    .variadic("join", [ParamType::Str], ParamType::Any, |_, args, _| {
                        let parts: Vec<String> =
                            args.list(1)?.iter().map(|v| format!("{v:?}")).collect();
                        Ok(Value::from(format!("{}:{}", args.str(0)?, parts.len())))
                    })
                    .method("noop", [], |_, _, _| Ok(Value::Null))
                    .method("fail", [], |_, _, _| Err(OperationError::new("broken")))
            })
        }
    }

    #[test]
    fn test_exact_match_selected() {
        let table = Service.methods();
        let m = table
            .resolve("add", &[Value::from(2), Value::from(3)])
            .unwrap();
        assert!(!m.is_variadic());
        assert_eq!(m.params(), &[ParamType::I32, ParamType::I32]);
    }

    #[test]
    fn test_overload_selected_by_type() {
        let table = Service.methods();
        let m = table
            .resolve("add", &[Value::I64(2), Value::I64(3)])
            .unwrap();
        assert_eq!(m.params(), &[ParamType::I64, ParamType::I64]);
    }

    #[test]
    fn test_exact_arity_preferred_over_variadic() {
        // The variadic "add" also accepts two i32s; the fixed overload wins.
        let table = Service.methods();
        let m = table
            .resolve("add", &[Value::from(1), Value::from(1)])
            .unwrap();
        assert!(!m.is_variadic());
    }

    #[test]
    fn test_variadic_fallback() {
        let table = Service.methods();
        let args = [Value::from(1), Value::F64(2.5), Value::I8(1)];
        let m = table.resolve("add", &args).unwrap();
        assert!(m.is_variadic());
    }

    #[test]
    fn test_null_matches_first_candidate() {
        let table = Service.methods();
        let m = table.resolve("add", &[Value::Null, Value::Null]).unwrap();
        assert_eq!(m.params(), &[ParamType::I32, ParamType::I32]);
    }

    #[test]
    fn test_variadic_repacks_trailing_args() {
        let table = Service.methods();
        let args = vec![Value::from("p"), Value::from(1), Value::from(true)];
        let m = table.resolve("join", &args).unwrap();
        let bound = m.bind(args).unwrap();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound.str(0).unwrap(), "p");
        assert_eq!(
            bound.list(1).unwrap(),
            &[Value::from(1), Value::from(true)]
        );
    }

    #[test]
    fn test_variadic_with_no_trailing_args_gets_empty_list() {
        let table = Service.methods();
        let args = vec![Value::from("p")];
        let bound = table.resolve("join", &args).unwrap().bind(args).unwrap();
        assert_eq!(bound.list(1).unwrap(), &[] as &[Value]);
    }

    #[test]
    fn test_variadic_too_few_args_is_arity_mismatch() {
        let table = Service.methods();
        let err = table.resolve("join", &[]).unwrap_err();
        assert!(matches!(
            err,
            InvokeError::ArityMismatch {
                required: 1,
                supplied: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_bind_rejects_short_argument_list() {
        let table = Service.methods();
        let m = table.resolve("join", &[Value::from("x")]).unwrap();
        let err = m.bind(vec![]).unwrap_err();
        assert!(matches!(err, InvokeError::ArityMismatch { .. }));
    }

    #[test]
    fn test_unknown_method_not_found() {
        let table = Service.methods();
        let err = table.resolve("missing", &[]).unwrap_err();
        assert!(matches!(
            err,
            InvokeError::MethodNotFound { ref method, arity: 0 } if method == "missing"
        ));
    }

    #[test]
    fn test_type_mismatch_not_found() {
        let table = Service.methods();
        let err = table
            .resolve("add", &[Value::from(1), Value::from("two")])
            .unwrap_err();
        assert!(matches!(err, InvokeError::MethodNotFound { arity: 2, .. }));
    }

    #[test]
    fn test_invoke_returns_value() {
        let ctx = CallContext::default();
        let result = invoke(&Service, "add", vec![Value::from(2), Value::from(3)], &ctx);
        assert_eq!(result.unwrap(), Some(Value::I32(5)));
    }

    #[test]
    fn test_invoke_null_is_no_value() {
        let ctx = CallContext::default();
        assert_eq!(invoke(&Service, "noop", vec![], &ctx).unwrap(), None);
    }

    #[test]
    fn test_invoke_wraps_operation_error() {
        let ctx = CallContext::default();
        let err = invoke(&Service, "fail", vec![], &ctx).unwrap_err();
        assert_eq!(err.method(), "fail");
        assert!(err.to_string().contains("broken"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_args_type_errors() {
        let args = Args::new(vec![Value::from("x")]);
        let err = args.i32(0).unwrap_err();
        assert!(err.message().contains("expected i32, got str"));
        assert!(args.get(3).is_err());
    }

    #[test]
    fn test_table_introspection() {
        let table = Service.methods();
        assert_eq!(table.len(), 6);
        assert_eq!(table.names().filter(|n| *n == "add").count(), 3);
        assert!(format!("{table:?}").contains("join"));
    }
}
