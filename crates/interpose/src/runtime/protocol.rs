//! Protocols: named sets of abstract methods a class can implement.
//!
//! A protocol may extend other protocols. A class implements a protocol
//! method either implicitly, with a public method of the same signature, or
//! explicitly, with an implementation registered against the protocol that
//! stays off the class's public surface.

use crate::error::{Error, Result};
use crate::runtime::method::{Method, MethodBuilder, Owner, OwnerKind, Signature, Visibility};
use fxhash::FxHashSet;
use interpose_log::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static PROTOCOL_ID: AtomicU64 = AtomicU64::new(1);

/// Name of the hosting context generated proxy types live in.
///
/// Internal types and protocols must list it in their friends to be proxied.
pub const PROXY_HOST: &str = "interpose.proxies";

struct ProtocolInner {
    id: u64,
    name: Arc<str>,
    methods: Vec<Method>,
    bases: Vec<Protocol>,
    visibility: Visibility,
    internals_visible_to: Vec<Arc<str>>,
}

/// A registered protocol. Cloning is cheap; equality is identity.
#[derive(Clone)]
pub struct Protocol(Arc<ProtocolInner>);

impl Protocol {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Methods declared directly on this protocol.
    pub fn methods(&self) -> &[Method] {
        &self.0.methods
    }

    pub fn bases(&self) -> &[Protocol] {
        &self.0.bases
    }

    pub fn visibility(&self) -> Visibility {
        self.0.visibility
    }

    /// This protocol followed by every protocol it extends, each once.
    pub fn all_protocols(&self) -> Vec<Protocol> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(protocol) = stack.pop() {
            if !seen.insert(protocol.id()) {
                continue;
            }
            stack.extend(protocol.bases().iter().rev().cloned());
            out.push(protocol);
        }
        out
    }

    /// Declared and inherited methods.
    pub fn all_methods(&self) -> Vec<Method> {
        self.all_protocols()
            .iter()
            .flat_map(|p| p.methods().iter().cloned())
            .collect()
    }

    /// True if this protocol is `other` or extends it.
    pub fn extends(&self, other: &Protocol) -> bool {
        self.extends_id(other.id())
    }

    pub(crate) fn extends_id(&self, id: u64) -> bool {
        self.id() == id || self.bases().iter().any(|b| b.extends_id(id))
    }

    /// First declared or inherited method named `name`.
    pub fn method_named(&self, name: &str) -> Option<Method> {
        self.all_methods().into_iter().find(|m| m.name() == name)
    }

    pub fn method_by_signature(&self, signature: &Signature) -> Option<Method> {
        self.all_methods()
            .into_iter()
            .find(|m| m.signature() == signature)
    }

    /// Whether code in `context` can see this protocol.
    pub fn is_visible_to(&self, context: &str) -> bool {
        match self.0.visibility {
            Visibility::Public => true,
            Visibility::Internal => self.0.internals_visible_to.iter().any(|c| &**c == context),
            Visibility::Private => false,
        }
    }
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Protocol {}

impl Hash for Protocol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.id);
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("methods", &self.0.methods.len())
            .finish()
    }
}

/// Builder for [`Protocol`].
///
/// # Example
///
/// ```
/// use interpose::{MethodBuilder, ProtocolBuilder, ValueKind};
///
/// let mut builder = ProtocolBuilder::new("Calculator");
/// builder.method(
///     MethodBuilder::new("add")
///         .param("a", ValueKind::I32)
///         .param("b", ValueKind::I32)
///         .returns(ValueKind::I32),
/// );
/// let calculator = builder.register().unwrap();
/// assert_eq!(calculator.methods().len(), 1);
/// ```
pub struct ProtocolBuilder {
    id: u64,
    name: Arc<str>,
    methods: Vec<MethodBuilder>,
    bases: Vec<Protocol>,
    visibility: Visibility,
    internals_visible_to: Vec<Arc<str>>,
}

impl ProtocolBuilder {
    pub fn new(name: &str) -> Self {
        ProtocolBuilder {
            id: PROTOCOL_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
            methods: Vec::new(),
            bases: Vec::new(),
            visibility: Visibility::Public,
            internals_visible_to: Vec::new(),
        }
    }

    /// Declares a method. Any body on the builder is ignored.
    pub fn method(&mut self, method: MethodBuilder) -> &mut Self {
        self.methods.push(method);
        self
    }

    pub fn extends(&mut self, base: &Protocol) -> &mut Self {
        self.bases.push(base.clone());
        self
    }

    pub fn visibility(&mut self, visibility: Visibility) -> &mut Self {
        self.visibility = visibility;
        self
    }

    /// Grants `context` access to this protocol when it is internal.
    pub fn visible_to(&mut self, context: &str) -> &mut Self {
        self.internals_visible_to.push(Arc::from(context));
        self
    }

    fn owner(&self) -> Owner {
        Owner {
            id: self.id,
            name: self.name.clone(),
            kind: OwnerKind::Protocol,
        }
    }

    /// Validates and registers the protocol.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSelector`] for a malformed method name
    /// - [`Error::DuplicateSignature`] if two methods share a signature
    pub fn register(self) -> Result<Protocol> {
        let mut seen = FxHashSet::default();
        let mut methods = Vec::with_capacity(self.methods.len());
        for builder in &self.methods {
            if !seen.insert(builder.signature()) {
                return Err(Error::DuplicateSignature {
                    type_name: self.name.to_string(),
                    method: builder.name().to_string(),
                });
            }
            methods.push(builder.declaration().build(self.owner())?);
        }
        Ok(self.finish(methods))
    }

    /// Registers a protocol whose declarations are fixed in this crate.
    /// Declarations that fail validation are logged and left out.
    pub(crate) fn register_builtin(self) -> Protocol {
        let methods = self
            .methods
            .iter()
            .filter_map(|builder| match builder.declaration().build(self.owner()) {
                Ok(method) => Some(method),
                Err(e) => {
                    error!("builtin protocol {} dropped {}: {e}", self.name, builder.name());
                    None
                }
            })
            .collect();
        self.finish(methods)
    }

    fn finish(self, methods: Vec<Method>) -> Protocol {
        Protocol(Arc::new(ProtocolInner {
            id: self.id,
            name: self.name,
            methods,
            bases: self.bases,
            visibility: self.visibility,
            internals_visible_to: self.internals_visible_to,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::ValueKind;

    fn named(name: &str) -> ProtocolBuilder {
        ProtocolBuilder::new(name)
    }

    #[test]
    fn test_protocol_methods_are_abstract() {
        let mut b = named("Greeter");
        b.method(
            MethodBuilder::new("greet")
                .param("who", ValueKind::Str)
                .returns(ValueKind::Str),
        );
        let greeter = b.register().unwrap();
        let greet = greeter.method_named("greet").unwrap();
        assert!(greet.is_abstract());
        assert!(greet.is_protocol_method());
        assert_eq!(greet.declaring_type_name(), "Greeter");
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let mut b = named("Twice");
        b.method(MethodBuilder::new("run"));
        b.method(MethodBuilder::new("run").returns(ValueKind::I32));
        assert!(matches!(
            b.register(),
            Err(Error::DuplicateSignature { .. })
        ));
    }

    #[test]
    fn test_extension_and_inherited_methods() {
        let mut base = named("Readable");
        base.method(MethodBuilder::new("read").returns(ValueKind::Str));
        let readable = base.register().unwrap();

        let mut derived = named("Stream");
        derived.extends(&readable);
        derived.method(MethodBuilder::new("close"));
        let stream = derived.register().unwrap();

        assert!(stream.extends(&readable));
        assert!(!readable.extends(&stream));
        let names: Vec<_> = stream.all_methods().iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, ["close", "read"]);
    }

    #[test]
    fn test_internal_visibility_requires_friend() {
        let mut hidden = named("Hidden");
        hidden.visibility(Visibility::Internal);
        let hidden = hidden.register().unwrap();
        assert!(!hidden.is_visible_to(PROXY_HOST));

        let mut shared = named("Shared");
        shared.visibility(Visibility::Internal).visible_to(PROXY_HOST);
        assert!(shared.register().unwrap().is_visible_to(PROXY_HOST));
    }
}
