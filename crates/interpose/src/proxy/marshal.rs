//! Argument and return conversion at the proxy boundary.
//!
//! Enum arguments passed by reference travel through a chain as their
//! underlying integer. They are turned back into enum values before the
//! target runs and when written back to the caller, so neither sees the
//! chain form. Returns are checked against the declared kind.

use crate::error::{Error, Result};
use crate::runtime::{IntRepr, Parameter, Value, ValueKind};

/// Copies the caller's arguments into chain form.
///
/// # Errors
///
/// Returns [`Error::InvalidCast`] for an `i32` enum whose discriminant does
/// not fit its representation.
pub(crate) fn box_arguments(params: &[Parameter], args: &[Value]) -> Result<Vec<Value>> {
    args.iter()
        .enumerate()
        .map(|(index, arg)| match params.get(index) {
            Some(param) if param.mode.is_by_ref() => box_by_ref(&param.kind, arg),
            _ => Ok(arg.clone()),
        })
        .collect()
}

fn box_by_ref(kind: &ValueKind, arg: &Value) -> Result<Value> {
    match (kind, arg) {
        (ValueKind::Enum { repr: IntRepr::I32, .. }, Value::Enum(e)) => i32::try_from(e.raw)
            .map(Value::I32)
            .map_err(|_| Error::InvalidCast {
                expected: kind.to_string(),
                got: format!("discriminant {}", e.raw),
            }),
        (ValueKind::Enum { repr: IntRepr::I64, .. }, Value::Enum(e)) => Ok(Value::I64(e.raw)),
        _ => Ok(arg.clone()),
    }
}

/// Writes by-reference slots of `boxed` back into the caller's `args`.
pub(crate) fn unbox_by_ref(params: &[Parameter], boxed: &[Value], args: &mut [Value]) {
    for ((param, value), slot) in params.iter().zip(boxed).zip(args.iter_mut()) {
        if param.mode.is_by_ref() {
            *slot = unbox_slot(&param.kind, value);
        }
    }
}

/// Turns by-reference enum slots of `args` from chain form into enum values
/// for the target. Returns the indices that changed.
pub(crate) fn unbox_for_target(params: &[Parameter], args: &mut [Value]) -> Vec<usize> {
    let mut changed = Vec::new();
    for (index, (param, slot)) in params.iter().zip(args.iter_mut()).enumerate() {
        if param.mode.is_by_ref() && matches!(param.kind, ValueKind::Enum { .. }) {
            let unboxed = unbox_slot(&param.kind, slot);
            if matches!(unboxed, Value::Enum(_)) && !matches!(slot, Value::Enum(_)) {
                *slot = unboxed;
                changed.push(index);
            }
        }
    }
    changed
}

/// Puts the slots [`unbox_for_target`] changed back into chain form.
///
/// # Errors
///
/// Returns [`Error::InvalidCast`] if the target stored a discriminant that
/// does not fit the representation.
pub(crate) fn rebox_after_target(params: &[Parameter], args: &mut [Value], changed: &[usize]) -> Result<()> {
    for &index in changed {
        if let (Some(param), Some(slot)) = (params.get(index), args.get_mut(index)) {
            *slot = box_by_ref(&param.kind, slot)?;
        }
    }
    Ok(())
}

fn unbox_slot(kind: &ValueKind, value: &Value) -> Value {
    match (kind, value) {
        (ValueKind::Enum { name, .. }, Value::I32(_) | Value::I64(_)) => match value.as_enum_raw() {
            Ok(raw) => Value::enumeration(name, raw),
            Err(_) => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Converts what the chain returned into the declared return kind.
///
/// # Errors
///
/// Returns [`Error::InvalidCast`] for a null where a value type is declared
/// or for a value of the wrong kind.
pub(crate) fn unbox_return(kind: &ValueKind, value: Value) -> Result<Value> {
    match (kind, &value) {
        (ValueKind::Unit, _) => Ok(Value::Unit),
        (ValueKind::Enum { name, .. }, Value::I32(_) | Value::I64(_)) => {
            Ok(Value::enumeration(name, value.as_enum_raw()?))
        }
        (kind, Value::Null) if kind.is_value_type() => Err(Error::InvalidCast {
            expected: kind.to_string(),
            got: "null".into(),
        }),
        (kind, value) if value.conforms_to(kind) => Ok(value.clone()),
        (kind, value) => Err(Error::InvalidCast {
            expected: kind.to_string(),
            got: value.kind_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::PassingMode;
    use std::sync::Arc;

    fn param(kind: ValueKind, mode: PassingMode) -> Parameter {
        Parameter {
            name: Arc::from("p"),
            kind,
            mode,
        }
    }

    #[test]
    fn test_by_ref_enum_travels_as_integer() {
        let color = ValueKind::enumeration("Color", IntRepr::I32);
        let params = [
            param(color.clone(), PassingMode::Ref),
            param(color, PassingMode::Value),
        ];
        let mut args = [Value::enumeration("Color", 2), Value::enumeration("Color", 1)];

        let mut boxed = box_arguments(&params, &args).unwrap();
        assert!(matches!(boxed[0], Value::I32(2)));
        assert!(matches!(boxed[1], Value::Enum(_)));

        boxed[0] = Value::I32(7);
        unbox_by_ref(&params, &boxed, &mut args);
        assert!(matches!(&args[0], Value::Enum(e) if e.raw == 7 && &*e.name == "Color"));
    }

    #[test]
    fn test_target_sees_enum_values() {
        let color = ValueKind::enumeration("Color", IntRepr::I32);
        let params = [
            param(color.clone(), PassingMode::Ref),
            param(ValueKind::I32, PassingMode::Ref),
        ];
        let mut args = box_arguments(&params, &[Value::enumeration("Color", 3), Value::I32(3)]).unwrap();

        let changed = unbox_for_target(&params, &mut args);
        assert_eq!(changed, vec![0]);
        assert!(matches!(&args[0], Value::Enum(e) if e.raw == 3));
        assert!(matches!(args[1], Value::I32(3)));

        args[0] = Value::enumeration("Color", 5);
        rebox_after_target(&params, &mut args, &changed).unwrap();
        assert!(matches!(args[0], Value::I32(5)));
    }

    #[test]
    fn test_unbox_return() {
        assert!(matches!(unbox_return(&ValueKind::Unit, Value::I32(3)), Ok(Value::Unit)));
        assert!(matches!(
            unbox_return(&ValueKind::I32, Value::Null),
            Err(Error::InvalidCast { .. })
        ));
        assert!(matches!(
            unbox_return(&ValueKind::I32, Value::from("x")),
            Err(Error::InvalidCast { .. })
        ));
        assert!(matches!(unbox_return(&ValueKind::Str, Value::Null), Ok(Value::Null)));
        let level = ValueKind::enumeration("Level", IntRepr::I64);
        assert!(matches!(
            unbox_return(&level, Value::I64(4)),
            Ok(Value::Enum(e)) if e.raw == 4
        ));
    }
}
