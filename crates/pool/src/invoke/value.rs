//! Runtime values and parameter type tags
//!
//! Arguments and results cross the dispatch boundary as [`Value`]s. Each
//! method parameter declares a [`ParamType`], and resolution compares the
//! two with [`ParamType::accepts`].

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// An opaque, type-erased object passed by reference
///
/// Two `Opaque` values are equal only when they point at the same allocation.
#[derive(Clone)]
pub struct Opaque {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Opaque {
    /// Wrap a value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared value without copying it
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            inner: value,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrow the wrapped value as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Get a shared handle to the wrapped value as `T`
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    /// Whether the wrapped value is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Rust type name of the wrapped value
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn type_id(&self) -> TypeId {
        (*self.inner).type_id()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque<{}>", self.type_name)
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A dynamically typed argument or return value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value; assignable to any parameter
    Null,
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    List(Vec<Value>),
    Object(Opaque),
}

impl Value {
    /// Wrap an arbitrary object
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Value::Object(Opaque::new(value))
    }

    /// The runtime type tag of this value
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Object(o) => o.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::I8(_)
                | Value::I16(_)
                | Value::I32(_)
                | Value::I64(_)
                | Value::F32(_)
                | Value::F64(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of any integral tag
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(i64::from(*v)),
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point view of any numeric tag
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Object(o) => o.downcast_ref::<T>(),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    char => Char,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Vec<Value> => List,
    Opaque => Object,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Identity of a concrete Rust type accepted by an object parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Declared type of a method parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Accepts every value
    Any,
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Accepts any numeric tag
    Number,
    Str,
    List,
    Object(TypeTag),
}

impl ParamType {
    /// Object parameter accepting exactly `T`
    pub fn object<T: Any>() -> Self {
        ParamType::Object(TypeTag::of::<T>())
    }

    /// Whether an argument can be passed for this parameter
    ///
    /// `Null` is assignable everywhere. Scalar parameters accept only their
    /// own tag: an `I32` parameter never takes an `I64` or `F64` argument.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ParamType::Any, _) => true,
            (ParamType::Bool, Value::Bool(_))
            | (ParamType::Char, Value::Char(_))
            | (ParamType::I8, Value::I8(_))
            | (ParamType::I16, Value::I16(_))
            | (ParamType::I32, Value::I32(_))
            | (ParamType::I64, Value::I64(_))
            | (ParamType::F32, Value::F32(_))
            | (ParamType::F64, Value::F64(_))
            | (ParamType::Str, Value::Str(_))
            | (ParamType::List, Value::List(_)) => true,
            (ParamType::Number, v) => v.is_numeric(),
            (ParamType::Object(tag), Value::Object(o)) => o.type_id() == tag.id,
            _ => false,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Any => write!(f, "any"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::Char => write!(f, "char"),
            ParamType::I8 => write!(f, "i8"),
            ParamType::I16 => write!(f, "i16"),
            ParamType::I32 => write!(f, "i32"),
            ParamType::I64 => write!(f, "i64"),
            ParamType::F32 => write!(f, "f32"),
            ParamType::F64 => write!(f, "f64"),
            ParamType::Number => write!(f, "number"),
            ParamType::Str => write!(f, "str"),
            ParamType::List => write!(f, "list"),
            ParamType::Object(tag) => write!(f, "{}", tag.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Point {
        x: i32,
    }

    #[test]
    fn test_scalar_params_accept_only_their_own_tag() {
        assert!(ParamType::I32.accepts(&Value::I32(7)));
        assert!(!ParamType::I32.accepts(&Value::I64(7)));
        assert!(!ParamType::I32.accepts(&Value::F64(7.0)));
        assert!(!ParamType::I32.accepts(&Value::Str("7".into())));
        assert!(ParamType::Bool.accepts(&Value::Bool(true)));
        assert!(!ParamType::Bool.accepts(&Value::I8(1)));
    }

    #[test]
    fn test_null_is_assignable_to_anything() {
        for param in [
            ParamType::I32,
            ParamType::Str,
            ParamType::List,
            ParamType::object::<Point>(),
        ] {
            assert!(param.accepts(&Value::Null), "{param} should accept null");
        }
    }

    #[test]
    fn test_number_and_any() {
        assert!(ParamType::Number.accepts(&Value::I16(1)));
        assert!(ParamType::Number.accepts(&Value::F32(1.5)));
        assert!(!ParamType::Number.accepts(&Value::Bool(false)));
        assert!(ParamType::Any.accepts(&Value::List(vec![])));
    }

    #[test]
    fn test_object_params_match_concrete_type() {
        let point = Value::object(Point { x: 3 });
        assert!(ParamType::object::<Point>().accepts(&point));
        assert!(!ParamType::object::<String>().accepts(&point));
        assert_eq!(point.as_object::<Point>().map(|p| p.x), Some(3));
    }

    #[test]
    fn test_opaque_equality_is_identity() {
        let a = Opaque::new(Point { x: 1 });
        let b = Opaque::new(Point { x: 1 });
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.type_name().ends_with("Point"));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(5), Value::I32(5));
        assert_eq!(Value::from("hi"), Value::Str("hi".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(()), Value::Null);
        assert_eq!(Value::I16(4).as_i64(), Some(4));
        assert_eq!(Value::I32(2).as_f64(), Some(2.0));
        assert_eq!(Value::F64(1.0).as_i64(), None);
    }
}
