//! Emits proxy classes.
//!
//! Building happens in two steps. Planning walks the key and decides, for
//! every intercepted member, what the advised method is, where the call
//! ends and which member of the proxy class carries it. Emission then
//! declares the slots, creates one dispatch closure per member, registers
//! the class and binds the slots to it.
//!
//! | strategy    | base class | intercepted members                          |
//! |-------------|------------|----------------------------------------------|
//! | composition | `Object`   | every method of every proxied protocol       |
//! | decorator   | target     | protocol methods, public overridable methods, introductions |
//! | inheritance | target     | every overridable method, plus introductions |
//!
//! A protocol method whose signature is already taken on the proxy class is
//! implemented explicitly, so it stays reachable through its protocol.

use crate::aop::AdvisedSupport;
use crate::aop::advised::{advised_protocol, aop_proxy_protocol};
use crate::error::{Error, Result};
use crate::proxy::ProxyStrategy;
use crate::proxy::cache::{GeneratedProxyType, ProtocolSource, ProxyTypeKey};
use crate::proxy::method_builder::{
    Delegation, forwarder_body, intercepting_body, management_body,
};
use crate::proxy::registry::{Joinpoint, MethodRegistry, ProxyMember};
use crate::proxy::serialization::proxy_hooks;
use crate::proxy::state::{ProxyState, notify_introductions};
use crate::runtime::class::ConstructorKind;
use crate::runtime::{
    Attribute, Class, ClassBuilder, Constructor, Method, MethodBuilder, Object, Parameter,
    PassingMode, Protocol, SERIALIZABLE, Signature, Value, ValueKind, Visibility,
};
use fxhash::FxHashSet;
use std::sync::Arc;

/// Builds the proxy type for `key`.
///
/// # Errors
///
/// Returns [`Error::UnsatisfiedProtocol`] if the target class stops
/// implementing a protocol attributed to it, or any class registration
/// error.
pub(crate) fn build(key: Arc<ProxyTypeKey>) -> Result<GeneratedProxyType> {
    let mut plan = Plan::new(&key);
    match key.strategy {
        ProxyStrategy::Composition => plan_composition(&key, &mut plan),
        ProxyStrategy::Decorator => plan_decorator(&key, &mut plan)?,
        ProxyStrategy::Inheritance => plan_inheritance(&key, &mut plan)?,
    }

    let mut builder = ClassBuilder::new(&key.type_name(), Some(&key.base));
    for (protocol, _) in &key.protocols {
        builder.adopt(protocol);
    }
    builder.adopt(&aop_proxy_protocol()).adopt(&advised_protocol());

    let registry = plan.emit(&mut builder);
    for method in advised_protocol().methods() {
        builder.explicit_method(
            method,
            MethodBuilder::from_method(method).body_arc(management_body(method.clone())),
        );
    }
    add_constructors(&key, &mut builder)?;
    add_attributes(&key, &mut builder);

    let class = builder.register()?;
    registry.bind_all(&class)?;
    Ok(GeneratedProxyType::new(key, class, registry))
}

// ============================================================================
// Planning
// ============================================================================

struct PlannedMember {
    advised: Method,
    joinpoint: Joinpoint,
    member: ProxyMember,
    delegation: Delegation,
    /// Set for explicit implementations.
    protocol_method: Option<Method>,
    visibility: Visibility,
    attributes: Vec<Attribute>,
}

struct Plan {
    members: Vec<PlannedMember>,
    forwarders: Vec<(Method, String)>,
    public: FxHashSet<Signature>,
    forwarder_prefix: String,
}

impl Plan {
    fn new(key: &ProxyTypeKey) -> Self {
        Plan {
            members: Vec::new(),
            forwarders: Vec::new(),
            public: FxHashSet::default(),
            // Keyed so a proxy of a proxy class never collides with the
            // forwarders it inherits.
            forwarder_prefix: format!("__base_{:08x}_", fxhash::hash32(key)),
        }
    }

    /// Intercepts a protocol method, publicly when its signature is free on
    /// the proxy class and explicitly otherwise.
    fn protocol_member(
        &mut self,
        base: &Class,
        protocol: &Protocol,
        protocol_method: &Method,
        delegation: Delegation,
        attributes: Vec<Attribute>,
    ) {
        let signature = protocol_method.signature();
        let public = base.find_inherited(signature).is_none() && self.public.insert(signature.clone());
        let member = if public {
            ProxyMember::Public(signature.clone())
        } else {
            ProxyMember::Explicit {
                protocol: protocol.id(),
                signature: signature.clone(),
            }
        };
        self.members.push(PlannedMember {
            advised: protocol_method.clone(),
            joinpoint: Joinpoint::Method(protocol_method.clone()),
            member,
            delegation,
            protocol_method: (!public).then(|| protocol_method.clone()),
            visibility: Visibility::Public,
            attributes,
        });
    }

    /// Implements `protocol_method` explicitly by running `implementation`
    /// on the proxy.
    fn explicit_member(
        &mut self,
        protocol: &Protocol,
        protocol_method: &Method,
        implementation: Method,
        attributes: Vec<Attribute>,
    ) {
        self.members.push(PlannedMember {
            joinpoint: Joinpoint::Method(implementation.clone()),
            advised: implementation,
            member: ProxyMember::Explicit {
                protocol: protocol.id(),
                signature: protocol_method.signature().clone(),
            },
            delegation: Delegation::Base,
            protocol_method: Some(protocol_method.clone()),
            visibility: Visibility::Public,
            attributes,
        });
    }

    /// Overrides an inherited method; the call ends in a hidden forwarder
    /// to the inherited body.
    fn override_member(&mut self, base_method: Method, attributes: Vec<Attribute>) {
        let signature = base_method.signature().clone();
        self.public.insert(signature.clone());
        let forwarder_name = format!("{}{}", self.forwarder_prefix, base_method.name());
        let forwarder = MethodBuilder::from_method(&base_method)
            .rename(&forwarder_name)
            .signature();
        self.forwarders.push((base_method.clone(), forwarder_name));
        self.members.push(PlannedMember {
            visibility: base_method.visibility(),
            advised: base_method,
            joinpoint: Joinpoint::Forwarder(forwarder),
            member: ProxyMember::Public(signature),
            delegation: Delegation::Base,
            protocol_method: None,
            attributes,
        });
    }

    fn emit(self, builder: &mut ClassBuilder) -> Arc<MethodRegistry> {
        let mut registry = MethodRegistry::new();
        let slots: Vec<usize> = self
            .members
            .iter()
            .map(|m| registry.declare(m.advised.clone(), m.joinpoint.clone(), m.member.clone()))
            .collect();
        let registry = Arc::new(registry);

        for (planned, slot) in self.members.into_iter().zip(slots) {
            let method = MethodBuilder::from_method(&planned.advised)
                .visibility(planned.visibility)
                .attributes(planned.attributes)
                .body_arc(intercepting_body(Arc::clone(&registry), slot, planned.delegation));
            match &planned.protocol_method {
                Some(protocol_method) => builder.explicit_method(protocol_method, method),
                None => builder.method(method.overridable()),
            };
        }
        for (base_method, name) in self.forwarders {
            let forwarder = MethodBuilder::from_method(&base_method)
                .rename(&name)
                .visibility(Visibility::Private);
            builder.method(forwarder.body_arc(forwarder_body(base_method)));
        }
        registry
    }
}

fn delegation_for(source: ProtocolSource) -> Delegation {
    match source {
        ProtocolSource::Target => Delegation::Target,
        ProtocolSource::Introduction(index) => Delegation::Introduction(index),
    }
}

fn require_target(key: &ProxyTypeKey) -> Result<&Class> {
    key.target.as_ref().ok_or(Error::MissingTargetType {
        strategy: key.strategy.name(),
    })
}

fn plan_composition(key: &ProxyTypeKey, plan: &mut Plan) {
    for (protocol, source) in &key.protocols {
        for method in protocol.methods() {
            let attributes = match (source, &key.target) {
                (ProtocolSource::Target, Some(target)) if key.copy_attributes => target
                    .protocol_method_impl(protocol.id(), method.signature())
                    .map(|m| m.attributes().to_vec())
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            plan.protocol_member(&key.base, protocol, method, delegation_for(*source), attributes);
        }
    }
}

fn plan_decorator(key: &ProxyTypeKey, plan: &mut Plan) -> Result<()> {
    let target = require_target(key)?;
    let mut overridden = FxHashSet::default();
    for (protocol, source) in &key.protocols {
        if let ProtocolSource::Introduction(index) = source {
            for method in protocol.methods() {
                plan.protocol_member(target, protocol, method, Delegation::Introduction(*index), Vec::new());
            }
            continue;
        }
        for method in protocol.methods() {
            let signature = method.signature();
            let implementation = target
                .protocol_method_impl(protocol.id(), signature)
                .ok_or_else(|| Error::UnsatisfiedProtocol {
                    protocol: protocol.name().to_string(),
                    type_name: target.name().to_string(),
                })?;
            let attributes = if key.copy_attributes {
                implementation.attributes().to_vec()
            } else {
                Vec::new()
            };
            let overridable = implementation.flags().is_overridable()
                && target
                    .find_inherited(signature)
                    .is_some_and(|m| m.same_as(&implementation));
            if !overridable {
                plan.explicit_member(protocol, method, implementation, attributes);
            } else if overridden.insert(implementation.id()) {
                plan.override_member(implementation, attributes);
            }
        }
    }
    for method in target.all_methods() {
        if method.flags().is_overridable()
            && method.visibility() == Visibility::Public
            && overridden.insert(method.id())
        {
            let attributes = if key.copy_attributes {
                method.attributes().to_vec()
            } else {
                Vec::new()
            };
            plan.override_member(method, attributes);
        }
    }
    Ok(())
}

fn plan_inheritance(key: &ProxyTypeKey, plan: &mut Plan) -> Result<()> {
    let target = require_target(key)?;
    let candidates = if key.declared_members_only {
        target.declared_methods().to_vec()
    } else {
        target.all_methods()
    };
    for method in candidates
        .into_iter()
        .filter(|m| m.flags().is_overridable() && m.visibility() != Visibility::Private)
    {
        let attributes = if key.copy_attributes {
            method.attributes().to_vec()
        } else {
            Vec::new()
        };
        plan.override_member(method, attributes);
    }
    for (protocol, source) in &key.protocols {
        if let ProtocolSource::Introduction(index) = source {
            for method in protocol.methods() {
                plan.protocol_member(target, protocol, method, Delegation::Introduction(*index), Vec::new());
            }
        }
    }
    Ok(())
}

// ============================================================================
// Constructors and attributes
// ============================================================================

fn advised_param() -> Parameter {
    Parameter {
        name: Arc::from("advised"),
        kind: ValueKind::Any,
        mode: PassingMode::Value,
    }
}

fn split_advised(args: &[Value]) -> Result<(Arc<AdvisedSupport>, &[Value])> {
    let (last, rest) = args.split_last().ok_or(Error::ArgumentCountMismatch {
        expected: 1,
        got: 0,
    })?;
    Ok((last.downcast::<AdvisedSupport>()?, rest))
}

fn finish(class: &Class, payload: crate::runtime::Payload, state: ProxyState) -> Result<Object> {
    let proxy = Object::from_parts(class.clone(), payload, Some(Arc::new(state)));
    notify_introductions(&proxy)?;
    Ok(proxy)
}

fn add_constructors(key: &Arc<ProxyTypeKey>, builder: &mut ClassBuilder) -> Result<()> {
    match key.strategy {
        ProxyStrategy::Composition => {
            let key = Arc::clone(key);
            builder.proxy_constructor(
                vec![advised_param()],
                Visibility::Public,
                Arc::new(move |class: &Class, args: &[Value]| {
                    let (advised, _) = split_advised(args)?;
                    finish(class, None, ProxyState::new(advised, Arc::clone(&key))?)
                }),
            );
        }
        ProxyStrategy::Decorator => {
            let target_class = require_target(key)?.clone();
            let key = Arc::clone(key);
            builder.proxy_constructor(
                vec![advised_param()],
                Visibility::Public,
                Arc::new(move |class: &Class, args: &[Value]| {
                    let (advised, _) = split_advised(args)?;
                    let mut state = ProxyState::new(advised, Arc::clone(&key))?;
                    let payload = match state.adopt_target()? {
                        Some(target) if !target.class().is_subclass_of(&target_class) => {
                            return Err(Error::StateMismatch {
                                reason: format!(
                                    "target of type '{}' cannot back a '{}' decorator",
                                    target.class().name(),
                                    target_class.name()
                                ),
                            });
                        }
                        Some(target) => target.payload().clone(),
                        None => None,
                    };
                    finish(class, payload, state)
                }),
            );
        }
        ProxyStrategy::Inheritance => {
            let target = require_target(key)?;
            for ctor in target.constructors() {
                if ctor.visibility() == Visibility::Private
                    || !matches!(ctor.kind(), ConstructorKind::User(_))
                {
                    continue;
                }
                builder.proxy_constructor(
                    forwarded_params(ctor),
                    ctor.visibility(),
                    inheriting_constructor(ctor.clone(), Arc::clone(key)),
                );
            }
        }
    }
    Ok(())
}

fn forwarded_params(ctor: &Constructor) -> Vec<Parameter> {
    let mut params = ctor.params().to_vec();
    params.push(advised_param());
    params
}

fn inheriting_constructor(
    ctor: Constructor,
    key: Arc<ProxyTypeKey>,
) -> crate::runtime::class::ProxyConstructorBody {
    Arc::new(move |class: &Class, args: &[Value]| {
        let (advised, base_args) = split_advised(args)?;
        let payload = ctor.construct_payload(base_args)?;
        finish(class, payload, ProxyState::new(advised, Arc::clone(&key))?)
    })
}

fn add_attributes(key: &ProxyTypeKey, builder: &mut ClassBuilder) {
    if let (true, Some(target)) = (key.copy_attributes, &key.target) {
        match key.strategy {
            // Serializability is a property of the configuration, not of
            // the target.
            ProxyStrategy::Composition => {
                for attribute in target.all_attributes() {
                    if &*attribute.name != SERIALIZABLE {
                        builder.attribute(attribute);
                    }
                }
            }
            // Inherited attributes are already visible through the base.
            ProxyStrategy::Decorator | ProxyStrategy::Inheritance => {
                for attribute in target.attributes().iter().filter(|a| !a.inherited) {
                    builder.attribute(attribute.clone());
                }
            }
        }
    }
    if key.serializable {
        builder
            .attribute(Attribute::serializable())
            .serialization(proxy_hooks());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ProtocolBuilder;

    fn greeter() -> (Protocol, Class) {
        let mut p = ProtocolBuilder::new("TbGreeter");
        p.method(MethodBuilder::new("greet").returns(ValueKind::Str));
        let protocol = p.register().unwrap();

        let mut c = ClassBuilder::new("TbGreeterImpl", None);
        c.adopt(&protocol)
            .method(
                MethodBuilder::new("greet")
                    .returns(ValueKind::Str)
                    .overridable()
                    .body(|_, _, _| Ok(Value::from("hi"))),
            )
            .method(
                MethodBuilder::new("fixed")
                    .returns(ValueKind::I32)
                    .body(|_, _, _| Ok(Value::I32(1))),
            )
            .attribute(Attribute::non_inherited("Audited"))
            .attribute(Attribute::serializable());
        (protocol, c.register().unwrap())
    }

    fn key(strategy: ProxyStrategy, protocol: &Protocol, target: &Class) -> Arc<ProxyTypeKey> {
        Arc::new(ProxyTypeKey {
            strategy,
            base: if strategy.extends_target() {
                target.clone()
            } else {
                Class::object()
            },
            target: Some(target.clone()),
            protocols: vec![(protocol.clone(), ProtocolSource::Target)],
            copy_attributes: true,
            serializable: false,
            declared_members_only: false,
        })
    }

    #[test]
    fn test_composition_shape() {
        let (protocol, target) = greeter();
        let generated = build(key(ProxyStrategy::Composition, &protocol, &target)).unwrap();
        let class = generated.class();
        assert!(class.conforms_to(&protocol));
        assert!(class.conforms_to(&aop_proxy_protocol()));
        assert!(!class.is_subclass_of(&target));
        assert!(class.has_attribute("Audited"));
        assert!(!class.has_attribute(SERIALIZABLE));
        assert_eq!(generated.intercepted_count(), 1);
        assert!(class.explicit_impl(advised_protocol().id(), advised_protocol().methods()[0].signature()).is_some());
    }

    #[test]
    fn test_decorator_leaves_non_virtual_members_inherited() {
        let (protocol, target) = greeter();
        let generated = build(key(ProxyStrategy::Decorator, &protocol, &target)).unwrap();
        let class = generated.class();
        assert!(class.is_subclass_of(&target));
        assert_eq!(generated.intercepted_count(), 1);
        let greet = class.method_named("greet").unwrap();
        assert_eq!(greet.declaring_type_name(), class.name());
        let fixed = class.method_named("fixed").unwrap();
        assert_eq!(fixed.declaring_type_name(), target.name());
    }

    #[test]
    fn test_inheritance_skips_non_virtual_members() {
        let (protocol, target) = greeter();
        let generated = build(key(ProxyStrategy::Inheritance, &protocol, &target)).unwrap();
        let names: Vec<String> = generated
            .intercepted_methods()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, ["greet"]);
        assert!(generated.class().constructors().iter().all(|c| c.params().len() == 1));
    }
}
