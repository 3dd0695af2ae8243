//! Slot table shared by the dispatch closures of one generated class.
//!
//! Each intercepted member gets a slot recording the advised method (what
//! pointcuts see), where the call ends up (the joinpoint) and which member
//! of the proxy class carries it. Slots are declared while the class is
//! being planned and bound to the registered class afterwards, since hidden
//! forwarders and proxy members only exist once the class does.

use crate::error::{Error, Result};
use crate::runtime::{Class, Method, Signature, ValueKind};
use std::sync::OnceLock;

/// Where a call ends once the chain is done.
#[derive(Debug, Clone)]
pub(crate) enum Joinpoint {
    /// Dispatch this method on the delegation target.
    Method(Method),
    /// The hidden forwarder with this signature on the proxy class, which
    /// runs the base implementation without virtual dispatch.
    Forwarder(Signature),
}

/// The proxy class member that carries a slot.
#[derive(Debug, Clone)]
pub(crate) enum ProxyMember {
    Public(Signature),
    Explicit { protocol: u64, signature: Signature },
}

#[derive(Debug)]
struct Bound {
    joinpoint: Method,
    proxy_method: Option<Method>,
}

#[derive(Debug)]
struct Slot {
    advised: Method,
    joinpoint: Joinpoint,
    member: ProxyMember,
    bound: OnceLock<Bound>,
}

/// Everything a dispatch closure needs for one call.
pub(crate) struct ResolvedSlot {
    pub(crate) advised: Method,
    pub(crate) joinpoint: Method,
    pub(crate) proxy_method: Option<Method>,
}

#[derive(Debug, Default)]
pub(crate) struct MethodRegistry {
    slots: Vec<Slot>,
}

impl MethodRegistry {
    pub(crate) fn new() -> Self {
        MethodRegistry::default()
    }

    /// Declares a slot and returns its index.
    pub(crate) fn declare(&mut self, advised: Method, joinpoint: Joinpoint, member: ProxyMember) -> usize {
        self.slots.push(Slot {
            advised,
            joinpoint,
            member,
            bound: OnceLock::new(),
        });
        self.slots.len() - 1
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn advised_methods(&self) -> impl Iterator<Item = &Method> {
        self.slots.iter().map(|s| &s.advised)
    }

    /// Resolves forwarders and proxy members against the registered class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateMismatch`] if a declared forwarder is missing.
    pub(crate) fn bind_all(&self, class: &Class) -> Result<()> {
        for slot in &self.slots {
            let joinpoint = match &slot.joinpoint {
                Joinpoint::Method(method) => method.clone(),
                Joinpoint::Forwarder(signature) => {
                    class
                        .declared_method(signature)
                        .ok_or_else(|| Error::StateMismatch {
                            reason: format!("forwarder {signature} missing on '{}'", class.name()),
                        })?
                }
            };
            let proxy_method = match &slot.member {
                ProxyMember::Public(signature) => class.declared_method(signature),
                ProxyMember::Explicit {
                    protocol,
                    signature,
                } => class.explicit_impl(*protocol, signature),
            };
            // A rebuild under the same key binds a fresh registry, so a slot
            // that is already bound keeps its first binding.
            let _ = slot.bound.set(Bound {
                joinpoint,
                proxy_method,
            });
        }
        Ok(())
    }

    /// Methods for one call through `slot`, closed over `type_args` when the
    /// advised method is a generic definition.
    pub(crate) fn resolve(&self, slot: usize, type_args: &[ValueKind]) -> Result<ResolvedSlot> {
        let entry = self.slots.get(slot).ok_or(Error::IndexOutOfRange {
            index: slot,
            len: self.slots.len(),
        })?;
        let bound = entry.bound.get().ok_or_else(|| Error::StateMismatch {
            reason: format!("slot {slot} ({}) called before binding", entry.advised.name()),
        })?;

        if type_args.is_empty() || !entry.advised.is_generic_definition() {
            return Ok(ResolvedSlot {
                advised: entry.advised.clone(),
                joinpoint: bound.joinpoint.clone(),
                proxy_method: bound.proxy_method.clone(),
            });
        }
        let close = |m: &Method| {
            if m.is_generic_definition() {
                m.make_generic(type_args)
            } else {
                Ok(m.clone())
            }
        };
        Ok(ResolvedSlot {
            advised: close(&entry.advised)?,
            joinpoint: close(&bound.joinpoint)?,
            proxy_method: bound.proxy_method.as_ref().map(close).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClassBuilder, MethodBuilder, Value};

    #[test]
    fn test_bind_resolves_forwarders_and_members() {
        let mut b = ClassBuilder::new("RegistryHost", None);
        b.method(
            MethodBuilder::new("echo")
                .generic("T")
                .param("v", ValueKind::Generic(0))
                .returns(ValueKind::Generic(0))
                .body(|_, args, _| Ok(args[0].clone())),
        )
        .method(
            MethodBuilder::new("__base_echo")
                .generic("T")
                .param("v", ValueKind::Generic(0))
                .returns(ValueKind::Generic(0))
                .body(|_, args, _| Ok(args[0].clone())),
        );
        let class = b.register().unwrap();
        let echo = class.method_named("echo").unwrap();
        let forwarder = class.method_named("__base_echo").unwrap();

        let mut registry = MethodRegistry::new();
        let slot = registry.declare(
            echo.clone(),
            Joinpoint::Forwarder(forwarder.signature().clone()),
            ProxyMember::Public(echo.signature().clone()),
        );
        assert!(matches!(registry.resolve(slot, &[]), Err(Error::StateMismatch { .. })));

        registry.bind_all(&class).unwrap();
        let open = registry.resolve(slot, &[]).unwrap();
        assert!(open.joinpoint.same_as(&forwarder));

        let closed = registry.resolve(slot, &[ValueKind::I32]).unwrap();
        assert!(!closed.advised.is_generic_definition());
        assert_eq!(closed.advised.resolved_return(), ValueKind::I32);
        assert!(closed.joinpoint.check_arguments(&[Value::I32(1)]).is_ok());
        assert!(closed.proxy_method.is_some());
    }
}
