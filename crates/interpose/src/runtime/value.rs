//! Dynamically typed values passed through methods and interceptor chains.
//!
//! Every argument and return value flows through the engine as a [`Value`].
//! A [`ValueKind`] describes what a parameter or return slot accepts.

use crate::error::{Error, Result};
use crate::runtime::object::Object;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Underlying integral representation of an enum kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntRepr {
    I32,
    I64,
}

/// The declared kind of a parameter or return slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Unit,
    Bool,
    Char,
    I32,
    I64,
    F64,
    Str,
    Enum { name: Arc<str>, repr: IntRepr },
    Object,
    /// Accepts any value.
    Any,
    /// The n-th type parameter of a generic method.
    Generic(usize),
}

impl ValueKind {
    /// Declares an enum kind.
    pub fn enumeration(name: &str, repr: IntRepr) -> Self {
        ValueKind::Enum {
            name: Arc::from(name),
            repr,
        }
    }

    /// Returns true for kinds that cannot hold `Null`.
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            ValueKind::Bool
                | ValueKind::Char
                | ValueKind::I32
                | ValueKind::I64
                | ValueKind::F64
                | ValueKind::Enum { .. }
        )
    }

    /// Substitutes generic parameters with concrete type arguments.
    ///
    /// Parameters without a matching argument are left open.
    pub fn resolve(&self, type_args: &[ValueKind]) -> ValueKind {
        match self {
            ValueKind::Generic(i) => type_args.get(*i).cloned().unwrap_or_else(|| self.clone()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Unit => f.write_str("unit"),
            ValueKind::Bool => f.write_str("bool"),
            ValueKind::Char => f.write_str("char"),
            ValueKind::I32 => f.write_str("i32"),
            ValueKind::I64 => f.write_str("i64"),
            ValueKind::F64 => f.write_str("f64"),
            ValueKind::Str => f.write_str("str"),
            ValueKind::Enum { name, .. } => write!(f, "enum {name}"),
            ValueKind::Object => f.write_str("object"),
            ValueKind::Any => f.write_str("any"),
            ValueKind::Generic(i) => write!(f, "T{i}"),
        }
    }
}

/// A value of a named enum, stored as its raw discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub name: Arc<str>,
    pub raw: i64,
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Unit,
    Null,
    Bool(bool),
    Char(char),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(Arc<str>),
    Enum(EnumValue),
    Object(Object),
    /// Opaque host data, compared by identity.
    Any(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Creates an enum value.
    pub fn enumeration(name: &str, raw: i64) -> Self {
        Value::Enum(EnumValue {
            name: Arc::from(name),
            raw,
        })
    }

    /// Wraps host data.
    pub fn any<T: Any + Send + Sync>(value: T) -> Self {
        Value::Any(Arc::new(value))
    }

    /// Short name of the value's variant, used in error messages.
    pub fn kind_name(&self) -> String {
        match self {
            Value::Unit => "unit".into(),
            Value::Null => "null".into(),
            Value::Bool(_) => "bool".into(),
            Value::Char(_) => "char".into(),
            Value::I32(_) => "i32".into(),
            Value::I64(_) => "i64".into(),
            Value::F64(_) => "f64".into(),
            Value::Str(_) => "str".into(),
            Value::Enum(e) => format!("enum {}", e.name),
            Value::Object(o) => format!("object {}", o.class().name()),
            Value::Any(_) => "any".into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Checks whether this value may occupy a slot of `kind`.
    pub fn conforms_to(&self, kind: &ValueKind) -> bool {
        match (kind, self) {
            (ValueKind::Any | ValueKind::Generic(_), _) => true,
            (ValueKind::Unit, Value::Unit) => true,
            (ValueKind::Bool, Value::Bool(_)) => true,
            (ValueKind::Char, Value::Char(_)) => true,
            (ValueKind::I32, Value::I32(_)) => true,
            (ValueKind::I64, Value::I64(_)) => true,
            (ValueKind::F64, Value::F64(_)) => true,
            (ValueKind::Str, Value::Str(_) | Value::Null) => true,
            (ValueKind::Object, Value::Object(_) | Value::Null) => true,
            (ValueKind::Enum { name, .. }, Value::Enum(e)) => *name == e.name,
            _ => false,
        }
    }

    fn cast_error(&self, expected: &str) -> Error {
        Error::InvalidCast {
            expected: expected.to_string(),
            got: self.kind_name(),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.cast_error("bool")),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            other => Err(other.cast_error("i32")),
        }
    }

    /// Reads an integer, widening `i32`.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::I32(v) => Ok(i64::from(*v)),
            Value::I64(v) => Ok(*v),
            other => Err(other.cast_error("i64")),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(other.cast_error("f64")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.cast_error("str")),
        }
    }

    pub fn as_object(&self) -> Result<&Object> {
        match self {
            Value::Object(o) => Ok(o),
            other => Err(other.cast_error("object")),
        }
    }

    /// Reads the discriminant of an enum, or the integer standing in for one.
    pub fn as_enum_raw(&self) -> Result<i64> {
        match self {
            Value::Enum(e) => Ok(e.raw),
            Value::I32(v) => Ok(i64::from(*v)),
            Value::I64(v) => Ok(*v),
            other => Err(other.cast_error("enum")),
        }
    }

    /// Downcasts host data.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        match self {
            Value::Any(data) => Arc::clone(data)
                .downcast::<T>()
                .map_err(|_| self.cast_error(std::any::type_name::<T>())),
            other => Err(other.cast_error(std::any::type_name::<T>())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Any(a), Value::Any(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("Unit"),
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Char(v) => write!(f, "Char({v:?})"),
            Value::I32(v) => write!(f, "I32({v})"),
            Value::I64(v) => write!(f, "I64({v})"),
            Value::F64(v) => write!(f, "F64({v})"),
            Value::Str(v) => write!(f, "Str({v:?})"),
            Value::Enum(e) => write!(f, "Enum({}::{})", e.name, e.raw),
            Value::Object(o) => write!(f, "Object({})", o.class().name()),
            Value::Any(_) => f.write_str("Any(..)"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl From<Option<Object>> for Value {
    fn from(v: Option<Object>) -> Self {
        v.map_or(Value::Null, Value::Object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types_reject_null() {
        assert!(ValueKind::I32.is_value_type());
        assert!(ValueKind::enumeration("Color", IntRepr::I32).is_value_type());
        assert!(!ValueKind::Str.is_value_type());

        assert!(!Value::Null.conforms_to(&ValueKind::I32));
        assert!(Value::Null.conforms_to(&ValueKind::Str));
        assert!(Value::Null.conforms_to(&ValueKind::Object));
    }

    #[test]
    fn test_enum_slot_accepts_underlying_integer() {
        let color = ValueKind::enumeration("Color", IntRepr::I32);
        assert!(Value::enumeration("Color", 2).conforms_to(&color));
        assert!(!Value::enumeration("Shape", 2).conforms_to(&color));
        assert!(!Value::I32(2).conforms_to(&color));
        assert_eq!(Value::I32(2).as_enum_raw(), Ok(2));
    }

    #[test]
    fn test_generic_resolution() {
        let args = [ValueKind::Str];
        assert_eq!(ValueKind::Generic(0).resolve(&args), ValueKind::Str);
        assert_eq!(ValueKind::Generic(1).resolve(&args), ValueKind::Generic(1));
        assert_eq!(ValueKind::I32.resolve(&args), ValueKind::I32);
    }

    #[test]
    fn test_accessors_report_cast_errors() {
        assert_eq!(Value::I32(4).as_i64(), Ok(4));
        assert_eq!(
            Value::Null.as_i32(),
            Err(Error::InvalidCast {
                expected: "i32".into(),
                got: "null".into()
            })
        );
        let data = Value::any(17u8);
        assert_eq!(*data.downcast::<u8>().unwrap(), 17);
        assert!(data.downcast::<u16>().is_err());
    }

    #[test]
    fn test_any_equality_is_identity() {
        let a = Value::any(1u8);
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Value::any(1u8));
        assert_eq!(Value::F64(1.5), Value::F64(1.5));
    }
}
