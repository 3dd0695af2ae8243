//! Classes: single inheritance, virtual dispatch and protocol conformance.
//!
//! # Architecture
//!
//! Classes are immutable once registered. Every class except the root
//! [`Class::object`] has exactly one superclass. A class holds:
//!
//! - its declared methods, indexed by [`Signature`]
//! - explicit protocol implementations, keyed by declaring protocol and
//!   signature, which are not part of the public surface
//! - constructors (not inherited; a class with none gets an implicit
//!   parameterless constructor that defers to its superclass)
//! - custom attributes, visibility and the sealed/abstract flags
//!
//! # Overriding
//!
//! A method whose signature matches a superclass method is an override.
//! Registration fails if the overridden method is not virtual or is final.

use crate::error::{Error, Result};
use crate::runtime::method::{
    Attribute, Method, MethodBuilder, Owner, OwnerKind, Parameter, PassingMode, Signature,
    Visibility,
};
use crate::runtime::object::Object;
use crate::runtime::protocol::Protocol;
use crate::runtime::serialization::{SerializationHooks, SerializationInfo};
use crate::runtime::value::{Value, ValueKind};
use fxhash::{FxHashMap, FxHashSet};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

static CLASS_ID: AtomicU64 = AtomicU64::new(1);

static ROOT: LazyLock<Class> = LazyLock::new(|| {
    Class(Arc::new(ClassInner {
        id: CLASS_ID.fetch_add(1, Ordering::Relaxed),
        name: Arc::from("Object"),
        super_class: None,
        protocols: Vec::new(),
        methods: Vec::new(),
        by_signature: FxHashMap::default(),
        explicit_impls: FxHashMap::default(),
        constructors: vec![Constructor {
            params: Vec::new(),
            visibility: Visibility::Public,
            kind: ConstructorKind::User(Arc::new(|_: &[Value]| -> Result<Payload> { Ok(None) })),
        }],
        attributes: Vec::new(),
        visibility: Visibility::Public,
        internals_visible_to: Vec::new(),
        sealed: false,
        is_abstract: false,
        serialization: None,
    }))
});

/// Opaque per-instance state.
pub type Payload = Option<Arc<dyn Any + Send + Sync>>;

/// Builds the state of a new instance from constructor arguments.
pub type ConstructorBody = Arc<dyn Fn(&[Value]) -> Result<Payload> + Send + Sync>;

/// Builds a whole proxy instance, companion state included.
pub(crate) type ProxyConstructorBody =
    Arc<dyn Fn(&Class, &[Value]) -> Result<Object> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum ConstructorKind {
    User(ConstructorBody),
    Proxy(ProxyConstructorBody),
}

/// A constructor. Arguments are always passed by value.
#[derive(Clone)]
pub struct Constructor {
    params: Vec<Parameter>,
    visibility: Visibility,
    kind: ConstructorKind,
}

impl Constructor {
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub(crate) fn kind(&self) -> &ConstructorKind {
        &self.kind
    }

    pub fn accepts(&self, args: &[Value]) -> bool {
        self.params.len() == args.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(p, a)| a.conforms_to(&p.kind))
    }

    /// Runs a user constructor and returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateMismatch`] for proxy constructors, which build
    /// whole objects rather than state.
    pub(crate) fn construct_payload(&self, args: &[Value]) -> Result<Payload> {
        match &self.kind {
            ConstructorKind::User(body) => body(args),
            ConstructorKind::Proxy(_) => Err(Error::StateMismatch {
                reason: "proxy constructors cannot initialize base state".into(),
            }),
        }
    }
}

pub(crate) struct ClassInner {
    id: u64,
    name: Arc<str>,
    super_class: Option<Class>,
    protocols: Vec<Protocol>,
    methods: Vec<Method>,
    by_signature: FxHashMap<Signature, usize>,
    explicit_impls: FxHashMap<u64, FxHashMap<Signature, Method>>,
    constructors: Vec<Constructor>,
    attributes: Vec<Attribute>,
    visibility: Visibility,
    internals_visible_to: Vec<Arc<str>>,
    sealed: bool,
    is_abstract: bool,
    serialization: Option<SerializationHooks>,
}

/// A registered class. Cloning is cheap; equality is identity.
#[derive(Clone)]
pub struct Class(Arc<ClassInner>);

impl Class {
    /// The root class every other class derives from.
    pub fn object() -> Class {
        ROOT.clone()
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn super_class(&self) -> Option<&Class> {
        self.0.super_class.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.0.super_class.is_none()
    }

    /// Iterates this class and its ancestors, most derived first.
    pub fn hierarchy(&self) -> impl Iterator<Item = &Class> {
        std::iter::successors(Some(self), |c| c.super_class())
    }

    pub fn visibility(&self) -> Visibility {
        self.0.visibility
    }

    pub fn is_sealed(&self) -> bool {
        self.0.sealed
    }

    pub fn is_abstract(&self) -> bool {
        self.0.is_abstract
    }

    /// Whether code in `context` can see this class.
    pub fn is_visible_to(&self, context: &str) -> bool {
        match self.0.visibility {
            Visibility::Public => true,
            Visibility::Internal => self.0.internals_visible_to.iter().any(|c| &**c == context),
            Visibility::Private => false,
        }
    }

    /// A class is a subclass of itself.
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self.is_subclass_of_id(other.id())
    }

    pub(crate) fn is_subclass_of_id(&self, id: u64) -> bool {
        self.hierarchy().any(|c| c.id() == id)
    }

    /// Protocols adopted directly by this class.
    pub fn protocols(&self) -> &[Protocol] {
        &self.0.protocols
    }

    /// Every protocol this class conforms to, including inherited adoptions
    /// and extended protocols, each once, in adoption order.
    pub fn all_protocols(&self) -> Vec<Protocol> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let chain: Vec<&Class> = self.hierarchy().collect();
        for class in chain.into_iter().rev() {
            for protocol in class.protocols() {
                for p in protocol.all_protocols() {
                    if seen.insert(p.id()) {
                        out.push(p);
                    }
                }
            }
        }
        out
    }

    pub fn conforms_to(&self, protocol: &Protocol) -> bool {
        self.conforms_to_id(protocol.id())
    }

    pub(crate) fn conforms_to_id(&self, id: u64) -> bool {
        self.hierarchy()
            .any(|c| c.protocols().iter().any(|p| p.extends_id(id)))
    }

    /// Methods declared directly on this class.
    pub fn declared_methods(&self) -> &[Method] {
        &self.0.methods
    }

    pub fn declared_method(&self, signature: &Signature) -> Option<Method> {
        self.0
            .by_signature
            .get(signature)
            .map(|&i| self.0.methods[i].clone())
    }

    /// The implementation of every signature visible on this class, most
    /// derived first.
    pub fn all_methods(&self) -> Vec<Method> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for class in self.hierarchy() {
            for method in class.declared_methods() {
                if seen.insert(method.signature().clone()) {
                    out.push(method.clone());
                }
            }
        }
        out
    }

    /// First non-private method named `name`, searching up the hierarchy.
    pub fn method_named(&self, name: &str) -> Option<Method> {
        self.hierarchy().find_map(|c| {
            c.declared_methods()
                .iter()
                .find(|m| m.name() == name && m.visibility() != Visibility::Private)
                .cloned()
        })
    }

    /// Picks the non-private overload of `name` that accepts `args` and
    /// `type_args`, searching up the hierarchy.
    pub fn resolve_call(
        &self,
        name: &str,
        args: &[Value],
        type_args: &[ValueKind],
    ) -> Option<Method> {
        self.hierarchy().find_map(|c| {
            c.declared_methods()
                .iter()
                .find(|m| {
                    m.name() == name
                        && m.visibility() != Visibility::Private
                        && accepts(m.params(), args, type_args, m.generic_arity())
                })
                .cloned()
        })
    }

    /// Most derived implementation of a virtual method declared on the
    /// class with id `declaring`. `None` if this class does not derive from it.
    pub(crate) fn resolve_virtual(&self, declaring: u64, signature: &Signature) -> Option<Method> {
        let mut found = None;
        for class in self.hierarchy() {
            if found.is_none() {
                found = class.declared_method(signature);
            }
            if class.id() == declaring {
                return found;
            }
        }
        None
    }

    /// Explicit implementation of a protocol method declared on this class.
    pub fn explicit_impl(&self, protocol_id: u64, signature: &Signature) -> Option<Method> {
        self.0
            .explicit_impls
            .get(&protocol_id)
            .and_then(|m| m.get(signature))
            .cloned()
    }

    /// Implementation of the protocol method `signature`, declared by the
    /// protocol with id `protocol_id`. At each level of the hierarchy an
    /// explicit implementation wins over a public method of the same
    /// signature.
    pub fn protocol_method_impl(&self, protocol_id: u64, signature: &Signature) -> Option<Method> {
        self.hierarchy().find_map(|c| {
            c.explicit_impl(protocol_id, signature).or_else(|| {
                c.declared_method(signature)
                    .filter(|m| m.visibility() != Visibility::Private)
            })
        })
    }

    /// First method with `signature` found walking up the hierarchy.
    pub fn find_inherited(&self, signature: &Signature) -> Option<Method> {
        self.hierarchy().find_map(|c| c.declared_method(signature))
    }

    pub fn constructors(&self) -> &[Constructor] {
        &self.0.constructors
    }

    pub(crate) fn find_constructor(&self, args: &[Value]) -> Option<&Constructor> {
        self.0.constructors.iter().find(|c| c.accepts(args))
    }

    /// Runs the user constructor accepting `args` and returns the new state.
    pub(crate) fn construct_payload(&self, args: &[Value]) -> Result<Payload> {
        self.find_constructor(args)
            .ok_or_else(|| Error::NoMatchingConstructor {
                type_name: self.name().to_string(),
            })?
            .construct_payload(args)
    }

    /// Attributes declared on this class.
    pub fn attributes(&self) -> &[Attribute] {
        &self.0.attributes
    }

    /// Declared attributes plus inheritable attributes of ancestors.
    pub fn all_attributes(&self) -> Vec<Attribute> {
        let mut out: Vec<Attribute> = self.0.attributes.clone();
        for class in self.hierarchy().skip(1) {
            for attr in class.attributes() {
                if attr.inherited && !out.iter().any(|a| a.name == attr.name) {
                    out.push(attr.clone());
                }
            }
        }
        out
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.all_attributes().iter().any(|a| &*a.name == name)
    }

    pub fn serialization_hooks(&self) -> Option<&SerializationHooks> {
        self.0.serialization.as_ref()
    }

    /// Rebuilds an instance of this class from serialized state.
    pub fn deserialize(&self, info: &SerializationInfo) -> Result<Object> {
        crate::runtime::serialization::deserialize(self, info)
    }
}

fn accepts(params: &[Parameter], args: &[Value], type_args: &[ValueKind], arity: usize) -> bool {
    arity == type_args.len()
        && params.len() == args.len()
        && params.iter().zip(args).all(|(p, a)| {
            p.mode == PassingMode::Out || a.conforms_to(&p.kind.resolve(type_args))
        })
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Class {}

impl Hash for Class {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.id);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("super", &self.super_class().map(Class::name))
            .finish()
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

// ============================================================================
// ClassBuilder
// ============================================================================

/// Builder for a new class.
///
/// # Example
///
/// ```
/// use interpose::{Class, ClassBuilder, MethodBuilder, Object, Value, ValueKind};
///
/// let mut builder = ClassBuilder::new("Counter", None);
/// builder.method(
///     MethodBuilder::new("double")
///         .param("n", ValueKind::I32)
///         .returns(ValueKind::I32)
///         .body(|_, args, _| Ok(Value::I32(args[0].as_i32()? * 2))),
/// );
/// let counter = builder.register().unwrap();
///
/// let obj = Object::new(&counter).unwrap();
/// assert_eq!(obj.invoke("double", &mut [Value::I32(21)]).unwrap(), Value::I32(42));
/// ```
pub struct ClassBuilder {
    id: u64,
    name: Arc<str>,
    super_class: Class,
    protocols: Vec<Protocol>,
    methods: Vec<MethodBuilder>,
    explicit: Vec<(Method, MethodBuilder)>,
    constructors: Vec<Constructor>,
    attributes: Vec<Attribute>,
    visibility: Visibility,
    internals_visible_to: Vec<Arc<str>>,
    sealed: bool,
    is_abstract: bool,
    serialization: Option<SerializationHooks>,
}

impl ClassBuilder {
    /// Starts a class deriving from `super_class`, or from the root class.
    pub fn new(name: &str, super_class: Option<&Class>) -> Self {
        ClassBuilder {
            id: CLASS_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
            super_class: super_class.cloned().unwrap_or_else(Class::object),
            protocols: Vec::new(),
            methods: Vec::new(),
            explicit: Vec::new(),
            constructors: Vec::new(),
            attributes: Vec::new(),
            visibility: Visibility::Public,
            internals_visible_to: Vec::new(),
            sealed: false,
            is_abstract: false,
            serialization: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&mut self, method: MethodBuilder) -> &mut Self {
        self.methods.push(method);
        self
    }

    /// Implements `protocol_method` explicitly. The implementation is only
    /// reachable through the protocol.
    pub fn explicit_method(&mut self, protocol_method: &Method, method: MethodBuilder) -> &mut Self {
        self.explicit.push((protocol_method.clone(), method));
        self
    }

    pub fn adopt(&mut self, protocol: &Protocol) -> &mut Self {
        if !self.protocols.iter().any(|p| p == protocol) {
            self.protocols.push(protocol.clone());
        }
        self
    }

    /// Declares a public constructor whose body produces the instance state.
    pub fn constructor<T, F>(&mut self, params: &[(&str, ValueKind)], body: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&[Value]) -> Result<T> + Send + Sync + 'static,
    {
        let params = params
            .iter()
            .map(|(name, kind)| Parameter {
                name: Arc::from(*name),
                kind: kind.clone(),
                mode: PassingMode::Value,
            })
            .collect();
        let body: ConstructorBody = Arc::new(move |args: &[Value]| {
            let state: Arc<dyn Any + Send + Sync> = Arc::new(body(args)?);
            Ok(Some(state))
        });
        self.constructors.push(Constructor {
            params,
            visibility: Visibility::Public,
            kind: ConstructorKind::User(body),
        });
        self
    }

    pub(crate) fn proxy_constructor(
        &mut self,
        params: Vec<Parameter>,
        visibility: Visibility,
        body: ProxyConstructorBody,
    ) -> &mut Self {
        self.constructors.push(Constructor {
            params,
            visibility,
            kind: ConstructorKind::Proxy(body),
        });
        self
    }

    pub fn attribute(&mut self, attribute: Attribute) -> &mut Self {
        self.attributes.push(attribute);
        self
    }

    pub fn visibility(&mut self, visibility: Visibility) -> &mut Self {
        self.visibility = visibility;
        self
    }

    /// Grants `context` access to this class when it is internal.
    pub fn visible_to(&mut self, context: &str) -> &mut Self {
        self.internals_visible_to.push(Arc::from(context));
        self
    }

    pub fn sealed(&mut self) -> &mut Self {
        self.sealed = true;
        self
    }

    pub fn abstract_(&mut self) -> &mut Self {
        self.is_abstract = true;
        self
    }

    pub fn serialization(&mut self, hooks: SerializationHooks) -> &mut Self {
        self.serialization = Some(hooks);
        self
    }

    fn owner(&self) -> Owner {
        Owner {
            id: self.id,
            name: self.name.clone(),
            kind: OwnerKind::Class,
        }
    }

    /// Validates and registers the class.
    ///
    /// # Errors
    ///
    /// - [`Error::SealedType`] if the superclass is sealed
    /// - [`Error::CannotOverride`] if a method overrides a non-virtual or
    ///   final superclass method
    /// - [`Error::DuplicateSignature`] if two methods share a signature
    /// - any method validation error
    pub fn register(self) -> Result<Class> {
        if self.super_class.is_sealed() {
            return Err(Error::SealedType {
                type_name: self.super_class.name().to_string(),
            });
        }

        let owner = self.owner();
        let mut methods = Vec::with_capacity(self.methods.len());
        let mut by_signature = FxHashMap::default();
        for builder in self.methods {
            let signature = builder.signature();
            if by_signature.contains_key(&signature) {
                return Err(Error::DuplicateSignature {
                    type_name: self.name.to_string(),
                    method: builder.name().to_string(),
                });
            }
            let builder = match self.super_class.find_inherited(&signature) {
                Some(base) if !base.flags().is_overridable() => {
                    return Err(Error::CannotOverride {
                        type_name: self.name.to_string(),
                        method: base.to_string(),
                    });
                }
                // An override stays virtual.
                Some(_) if !builder.is_virtual() => builder.overridable(),
                _ => builder,
            };
            by_signature.insert(signature, methods.len());
            methods.push(builder.build(owner.clone())?);
        }

        let mut explicit_impls: FxHashMap<u64, FxHashMap<Signature, Method>> = FxHashMap::default();
        for (protocol_method, builder) in self.explicit {
            let method = builder.build(owner.clone())?;
            explicit_impls
                .entry(protocol_method.owner().id)
                .or_default()
                .insert(protocol_method.signature().clone(), method);
        }

        let mut constructors = self.constructors;
        if constructors.is_empty() {
            let base = self.super_class.clone();
            constructors.push(Constructor {
                params: Vec::new(),
                visibility: Visibility::Public,
                kind: ConstructorKind::User(Arc::new(move |args: &[Value]| {
                    base.construct_payload(args)
                })),
            });
        }

        let is_abstract = self.is_abstract || {
            let mut seen = FxHashSet::default();
            methods
                .iter()
                .chain(self.super_class.all_methods().iter())
                .filter(|m| seen.insert(m.signature().clone()))
                .any(Method::is_abstract)
        };

        Ok(Class(Arc::new(ClassInner {
            id: self.id,
            name: self.name,
            super_class: Some(self.super_class),
            protocols: self.protocols,
            methods,
            by_signature,
            explicit_impls,
            constructors,
            attributes: self.attributes,
            visibility: self.visibility,
            internals_visible_to: self.internals_visible_to,
            sealed: self.sealed,
            is_abstract,
            serialization: self.serialization,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::protocol::ProtocolBuilder;
    use std::sync::atomic::AtomicUsize;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique(prefix: &str) -> String {
        format!("{prefix}_{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    fn speak(text: &'static str) -> MethodBuilder {
        MethodBuilder::new("speak")
            .returns(ValueKind::Str)
            .overridable()
            .body(move |_, _, _| Ok(Value::from(text)))
    }

    #[test]
    fn test_root_class() {
        let root = Class::object();
        assert!(root.is_root());
        assert_eq!(root, Class::object());
        assert_eq!(root.constructors().len(), 1);
    }

    #[test]
    fn test_override_resolution() {
        let mut animal = ClassBuilder::new(&unique("Animal"), None);
        animal.method(speak("..."));
        let animal = animal.register().unwrap();

        let mut dog = ClassBuilder::new(&unique("Dog"), Some(&animal));
        dog.method(MethodBuilder::new("speak").returns(ValueKind::Str).body(|_, _, _| Ok("woof".into())));
        let dog = dog.register().unwrap();

        let base = animal.method_named("speak").unwrap();
        let resolved = dog.resolve_virtual(animal.id(), base.signature()).unwrap();
        assert_eq!(resolved.declaring_type_name(), dog.name());
        assert!(resolved.flags().is_virtual);
        assert!(dog.is_subclass_of(&animal));
        assert!(!animal.is_subclass_of(&dog));
    }

    #[test]
    fn test_cannot_override_non_virtual() {
        let mut base = ClassBuilder::new(&unique("Fixed"), None);
        base.method(MethodBuilder::new("run").body(|_, _, _| Ok(Value::Unit)));
        let base = base.register().unwrap();

        let mut derived = ClassBuilder::new(&unique("Derived"), Some(&base));
        derived.method(MethodBuilder::new("run").body(|_, _, _| Ok(Value::Unit)));
        assert!(matches!(
            derived.register(),
            Err(Error::CannotOverride { .. })
        ));
    }

    #[test]
    fn test_sealed_superclass_rejected() {
        let mut vault = ClassBuilder::new(&unique("Vault"), None);
        vault.sealed();
        let vault = vault.register().unwrap();
        let sub = ClassBuilder::new(&unique("Breach"), Some(&vault));
        assert!(matches!(sub.register(), Err(Error::SealedType { .. })));
    }

    #[test]
    fn test_explicit_impl_wins_over_public_method() {
        let mut p = ProtocolBuilder::new(&unique("Named"));
        p.method(MethodBuilder::new("label").returns(ValueKind::Str));
        let named = p.register().unwrap();
        let label = named.method_named("label").unwrap();

        let mut c = ClassBuilder::new(&unique("Tag"), None);
        c.adopt(&named)
            .method(MethodBuilder::new("label").returns(ValueKind::Str).body(|_, _, _| Ok("public".into())))
            .explicit_method(
                &label,
                MethodBuilder::new("label").returns(ValueKind::Str).body(|_, _, _| Ok("explicit".into())),
            );
        let tag = c.register().unwrap();

        let obj = Object::new(&tag).unwrap();
        let via_protocol = tag.protocol_method_impl(named.id(), label.signature()).unwrap();
        assert_eq!(via_protocol.call_body(&obj, &mut []).unwrap(), Value::from("explicit"));
        assert_eq!(obj.invoke("label", &mut []).unwrap(), Value::from("public"));
        assert!(tag.conforms_to(&named));
    }

    #[test]
    fn test_inherited_attributes_and_abstractness() {
        let mut shape = ClassBuilder::new(&unique("Shape"), None);
        shape
            .attribute(Attribute::serializable())
            .attribute(Attribute::non_inherited("Sealed"))
            .method(MethodBuilder::new("area").returns(ValueKind::F64));
        let shape = shape.register().unwrap();
        assert!(shape.is_abstract());

        let mut square = ClassBuilder::new(&unique("Square"), Some(&shape));
        square.method(
            MethodBuilder::new("area")
                .returns(ValueKind::F64)
                .body(|_, _, _| Ok(Value::F64(4.0))),
        );
        let square = square.register().unwrap();
        assert!(!square.is_abstract());
        assert!(square.has_attribute(crate::runtime::method::SERIALIZABLE));
        assert!(!square.has_attribute("Sealed"));
    }

    #[test]
    fn test_implicit_constructor_defers_to_superclass() {
        let mut base = ClassBuilder::new(&unique("Cell"), None);
        base.constructor(&[], |_| Ok(7u32));
        let base = base.register().unwrap();

        let derived = ClassBuilder::new(&unique("SubCell"), Some(&base)).register().unwrap();
        let obj = Object::new(&derived).unwrap();
        assert_eq!(obj.state::<u32>(), Some(&7));
    }
}
