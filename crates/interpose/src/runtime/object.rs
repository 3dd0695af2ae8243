//! Object instances and message sending.
//!
//! # Architecture
//!
//! An [`Object`] is a reference-counted handle to an instance: its class,
//! its opaque state, and (for proxies) the proxy companion state. Cloning is
//! shallow. State is shared, so types that need mutation put interior
//! mutability inside their state.
//!
//! Calls are dispatched by name against the class's public surface
//! ([`Object::invoke`]) or through a protocol ([`Object::invoke_protocol`]),
//! which also reaches explicit implementations.

use crate::error::{Error, Result};
use crate::proxy::state::ProxyState;
use crate::runtime::class::{Class, ConstructorKind, Payload};
use crate::runtime::protocol::Protocol;
use crate::runtime::value::{Value, ValueKind};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) struct ObjectInner {
    class: Class,
    payload: Payload,
    proxy: Option<Arc<ProxyState>>,
}

/// A runtime instance.
///
/// # Example
///
/// ```
/// use interpose::{ClassBuilder, Object};
///
/// let mut builder = ClassBuilder::new("Point", None);
/// builder.constructor(&[], |_| Ok((3i32, 4i32)));
/// let point = builder.register().unwrap();
///
/// let p = Object::new(&point).unwrap();
/// assert_eq!(p.state::<(i32, i32)>(), Some(&(3, 4)));
/// assert!(p.ptr_eq(&p.clone()));
/// ```
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

/// A non-owning reference to an [`Object`].
#[derive(Clone)]
pub struct WeakObject(Weak<ObjectInner>);

impl WeakObject {
    pub fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(Object)
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakObject(..)")
    }
}

impl Object {
    /// Instantiates `class` through its parameterless constructor.
    pub fn new(class: &Class) -> Result<Object> {
        Object::with_args(class, &[])
    }

    /// Instantiates `class` through the constructor accepting `args`.
    ///
    /// # Errors
    ///
    /// - [`Error::AbstractInstantiation`] if `class` is abstract
    /// - [`Error::NoMatchingConstructor`] if no constructor accepts `args`
    /// - anything the constructor body returns
    pub fn with_args(class: &Class, args: &[Value]) -> Result<Object> {
        if class.is_abstract() {
            return Err(Error::AbstractInstantiation {
                type_name: class.name().to_string(),
            });
        }
        let ctor = class
            .find_constructor(args)
            .ok_or_else(|| Error::NoMatchingConstructor {
                type_name: class.name().to_string(),
            })?;
        match ctor.kind() {
            ConstructorKind::User(body) => Ok(Object::from_parts(class.clone(), body(args)?, None)),
            ConstructorKind::Proxy(body) => body(class, args),
        }
    }

    /// Instantiates `class` with `state`, bypassing constructors.
    pub fn with_state<T: Any + Send + Sync>(class: &Class, state: T) -> Result<Object> {
        if class.is_abstract() {
            return Err(Error::AbstractInstantiation {
                type_name: class.name().to_string(),
            });
        }
        Ok(Object::from_parts(class.clone(), Some(Arc::new(state)), None))
    }

    pub(crate) fn from_parts(class: Class, payload: Payload, proxy: Option<Arc<ProxyState>>) -> Object {
        Object(Arc::new(ObjectInner {
            class,
            payload,
            proxy,
        }))
    }

    pub fn class(&self) -> &Class {
        &self.0.class
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.0.payload
    }

    /// Borrows the instance state as `T`.
    pub fn state<T: Any>(&self) -> Option<&T> {
        self.0.payload.as_deref()?.downcast_ref::<T>()
    }

    pub(crate) fn proxy_state(&self) -> Option<&Arc<ProxyState>> {
        self.0.proxy.as_ref()
    }

    pub fn is_proxy(&self) -> bool {
        self.0.proxy.is_some()
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True if the public surface has a method named `name`.
    pub fn responds_to(&self, name: &str) -> bool {
        self.class().method_named(name).is_some()
    }

    pub fn conforms_to(&self, protocol: &Protocol) -> bool {
        self.class().conforms_to(protocol)
    }

    /// Calls the public method `name` that accepts `args`.
    ///
    /// By-reference arguments are written back into `args`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] if no overload matches, or whatever
    /// the method returns.
    pub fn invoke(&self, name: &str, args: &mut [Value]) -> Result<Value> {
        self.invoke_generic(name, &[], args)
    }

    /// Calls a generic public method closed over `type_args`.
    pub fn invoke_generic(
        &self,
        name: &str,
        type_args: &[ValueKind],
        args: &mut [Value],
    ) -> Result<Value> {
        let method = self
            .class()
            .resolve_call(name, args, type_args)
            .ok_or_else(|| Error::MethodNotFound {
                type_name: self.class().name().to_string(),
                method: name.to_string(),
            })?;
        if type_args.is_empty() {
            method.call_body(self, args)
        } else {
            method.make_generic(type_args)?.call_body(self, args)
        }
    }

    /// Calls `name` as a member of `protocol`, reaching explicit
    /// implementations.
    pub fn invoke_protocol(
        &self,
        protocol: &Protocol,
        name: &str,
        args: &mut [Value],
    ) -> Result<Value> {
        self.invoke_protocol_generic(protocol, name, &[], args)
    }

    pub fn invoke_protocol_generic(
        &self,
        protocol: &Protocol,
        name: &str,
        type_args: &[ValueKind],
        args: &mut [Value],
    ) -> Result<Value> {
        let not_found = || Error::MethodNotFound {
            type_name: format!("{} as {}", self.class().name(), protocol.name()),
            method: name.to_string(),
        };
        let method = protocol
            .all_methods()
            .into_iter()
            .find(|m| {
                m.name() == name
                    && m.generic_arity() == type_args.len()
                    && m.params().len() == args.len()
                    && m.params().iter().zip(args.iter()).all(|(p, a)| {
                        p.mode == crate::runtime::method::PassingMode::Out
                            || a.conforms_to(&p.kind.resolve(type_args))
                    })
            })
            .ok_or_else(not_found)?;
        if type_args.is_empty() {
            method.call(self, args)
        } else {
            method.make_generic(type_args)?.call(self, args)
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.0.class.name())
            .field("addr", &format_args!("{:p}", Arc::as_ptr(&self.0)))
            .field("proxy", &self.is_proxy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::class::ClassBuilder;
    use crate::runtime::method::MethodBuilder;
    use crate::runtime::protocol::ProtocolBuilder;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique(prefix: &str) -> String {
        format!("{prefix}_{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    fn account_class() -> Class {
        let mut b = ClassBuilder::new(&unique("Account"), None);
        b.constructor(&[("opening", ValueKind::I64)], |args| {
            Ok(AtomicI64::new(args[0].as_i64()?))
        })
        .method(
            MethodBuilder::new("deposit")
                .param("amount", ValueKind::I64)
                .returns(ValueKind::I64)
                .body(|this, args, _| {
                    let balance = this
                        .state::<AtomicI64>()
                        .ok_or_else(|| Error::fault("no state"))?;
                    let amount = args[0].as_i64()?;
                    Ok(Value::I64(balance.fetch_add(amount, Ordering::SeqCst) + amount))
                }),
        )
        .method(
            MethodBuilder::new("split")
                .param("total", ValueKind::I32)
                .out_param("remainder", ValueKind::I32)
                .returns(ValueKind::I32)
                .body(|_, args, _| {
                    let total = args[0].as_i32()?;
                    args[1] = Value::I32(total % 3);
                    Ok(Value::I32(total / 3))
                }),
        );
        b.register().unwrap()
    }

    #[test]
    fn test_constructor_and_state() {
        let class = account_class();
        let acct = Object::with_args(&class, &[Value::I64(10)]).unwrap();
        assert_eq!(acct.invoke("deposit", &mut [Value::I64(5)]).unwrap(), Value::I64(15));
        assert!(matches!(
            Object::new(&class),
            Err(Error::NoMatchingConstructor { .. })
        ));
    }

    #[test]
    fn test_out_argument_written_back() {
        let class = account_class();
        let acct = Object::with_args(&class, &[Value::I64(0)]).unwrap();
        let mut args = [Value::I32(10), Value::Unit];
        assert_eq!(acct.invoke("split", &mut args).unwrap(), Value::I32(3));
        assert_eq!(args[1], Value::I32(1));
    }

    #[test]
    fn test_unknown_method() {
        let class = account_class();
        let acct = Object::with_args(&class, &[Value::I64(0)]).unwrap();
        assert!(!acct.responds_to("withdraw"));
        assert!(matches!(
            acct.invoke("withdraw", &mut []),
            Err(Error::MethodNotFound { .. })
        ));
    }

    #[test]
    fn test_protocol_dispatch_and_generic_call() {
        let mut p = ProtocolBuilder::new(&unique("Echo"));
        p.method(
            MethodBuilder::new("echo")
                .generic("T")
                .param("value", ValueKind::Generic(0))
                .returns(ValueKind::Generic(0)),
        );
        let echo = p.register().unwrap();

        let mut c = ClassBuilder::new(&unique("Echoer"), None);
        c.adopt(&echo).method(
            MethodBuilder::new("echo")
                .generic("T")
                .param("value", ValueKind::Generic(0))
                .returns(ValueKind::Generic(0))
                .body(|_, args, type_args| {
                    assert_eq!(type_args, [ValueKind::Str]);
                    Ok(args[0].clone())
                }),
        );
        let class = c.register().unwrap();
        let obj = Object::new(&class).unwrap();

        let out = obj
            .invoke_protocol_generic(&echo, "echo", &[ValueKind::Str], &mut [Value::from("hi")])
            .unwrap();
        assert_eq!(out, Value::from("hi"));
        let direct = obj
            .invoke_generic("echo", &[ValueKind::Str], &mut [Value::from("yo")])
            .unwrap();
        assert_eq!(direct, Value::from("yo"));
    }

    #[test]
    fn test_weak_reference() {
        let class = account_class();
        let acct = Object::with_args(&class, &[Value::I64(0)]).unwrap();
        let weak = acct.downgrade();
        assert!(weak.upgrade().is_some_and(|o| o.ptr_eq(&acct)));
        drop(acct);
        assert!(weak.upgrade().is_none());
    }
}
