//! Method descriptors and dispatch.
//!
//! A [`Method`] is the runtime handle for one member of a class or protocol:
//! its signature, flags, attributes and (for concrete methods) its body.
//! Methods can be called two ways:
//!
//! - [`Method::invoke`] validates the receiver and the arguments against the
//!   signature before dispatching. This is the reflective path.
//! - [`Method::call`] dispatches without validation. This is the direct path.
//!
//! Both resolve virtual overrides and protocol implementations on the
//! receiver's class first, so they always run the same body.

use crate::error::{Error, Result};
use crate::runtime::object::Object;
use crate::runtime::selector::Selector;
use crate::runtime::value::{Value, ValueKind};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static METHOD_ID: AtomicU64 = AtomicU64::new(1);

/// Name of the attribute that marks a type as serializable.
pub const SERIALIZABLE: &str = "Serializable";

/// Executable method body.
///
/// Receives the receiver, the argument slots (by-reference parameters are
/// written in place) and the generic type arguments of the call.
pub type MethodBody =
    Arc<dyn Fn(&Object, &mut [Value], &[ValueKind]) -> Result<Value> + Send + Sync>;

/// How an argument is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassingMode {
    Value,
    /// In and out.
    Ref,
    /// Out only.
    Out,
}

impl PassingMode {
    pub fn is_by_ref(self) -> bool {
        !matches!(self, PassingMode::Value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: Arc<str>,
    pub kind: ValueKind,
    pub mode: PassingMode,
}

/// Accessibility of a type or member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Public,
    /// Visible inside the declaring module and to friends it names.
    Internal,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MethodFlags {
    pub is_virtual: bool,
    pub is_final: bool,
    pub is_abstract: bool,
}

impl MethodFlags {
    /// True if a subclass may override the method.
    pub fn is_overridable(&self) -> bool {
        self.is_virtual && !self.is_final
    }
}

/// Custom metadata attached to a type or method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub name: Arc<str>,
    /// Whether subclasses see the attribute.
    pub inherited: bool,
}

impl Attribute {
    pub fn new(name: &str) -> Self {
        Attribute {
            name: Arc::from(name),
            inherited: true,
        }
    }

    pub fn non_inherited(name: &str) -> Self {
        Attribute {
            name: Arc::from(name),
            inherited: false,
        }
    }

    pub fn serializable() -> Self {
        Attribute::new(SERIALIZABLE)
    }
}

/// Identity of a method for overriding and interface matching.
///
/// The return kind is not part of the signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub selector: Selector,
    pub params: Vec<(ValueKind, PassingMode)>,
    pub generic_arity: usize,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selector)?;
        if self.generic_arity > 0 {
            write!(f, "<{}>", self.generic_arity)?;
        }
        f.write_str("(")?;
        for (i, (kind, mode)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match mode {
                PassingMode::Value => {}
                PassingMode::Ref => f.write_str("ref ")?,
                PassingMode::Out => f.write_str("out ")?,
            }
            write!(f, "{kind}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum OwnerKind {
    Class,
    Protocol,
}

/// The type that declares a method.
#[derive(Debug, Clone)]
pub(crate) struct Owner {
    pub id: u64,
    pub name: Arc<str>,
    pub kind: OwnerKind,
}

struct MethodInner {
    id: u64,
    signature: Signature,
    params: Vec<Parameter>,
    returns: ValueKind,
    generic_params: Vec<Arc<str>>,
    generic_args: Vec<ValueKind>,
    visibility: Visibility,
    flags: MethodFlags,
    attributes: Vec<Attribute>,
    owner: Owner,
    body: Option<MethodBody>,
}

/// Handle to a registered method.
///
/// Cloning is cheap. Closed instantiations of a generic method share the
/// definition's [`id`](Method::id).
#[derive(Clone)]
pub struct Method(Arc<MethodInner>);

impl Method {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn selector(&self) -> &Selector {
        &self.0.signature.selector
    }

    pub fn name(&self) -> &str {
        self.0.signature.selector.name()
    }

    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    pub fn params(&self) -> &[Parameter] {
        &self.0.params
    }

    /// Declared return kind, possibly generic.
    pub fn returns(&self) -> &ValueKind {
        &self.0.returns
    }

    /// Return kind with this instantiation's type arguments applied.
    pub fn resolved_return(&self) -> ValueKind {
        self.0.returns.resolve(&self.0.generic_args)
    }

    pub fn visibility(&self) -> Visibility {
        self.0.visibility
    }

    pub fn flags(&self) -> MethodFlags {
        self.0.flags
    }

    pub fn is_abstract(&self) -> bool {
        self.0.flags.is_abstract
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.0.attributes
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.0.attributes.iter().any(|a| &*a.name == name)
    }

    pub fn generic_arity(&self) -> usize {
        self.0.generic_params.len()
    }

    pub fn generic_params(&self) -> &[Arc<str>] {
        &self.0.generic_params
    }

    /// Type arguments of a closed instantiation; empty otherwise.
    pub fn generic_args(&self) -> &[ValueKind] {
        &self.0.generic_args
    }

    /// True for a generic method that has not been closed.
    pub fn is_generic_definition(&self) -> bool {
        !self.0.generic_params.is_empty() && self.0.generic_args.is_empty()
    }

    /// Name of the declaring class or protocol.
    pub fn declaring_type_name(&self) -> &str {
        &self.0.owner.name
    }

    pub fn is_protocol_method(&self) -> bool {
        self.0.owner.kind == OwnerKind::Protocol
    }

    pub(crate) fn owner(&self) -> &Owner {
        &self.0.owner
    }

    /// Returns true if both handles refer to the same method and instantiation.
    pub fn same_as(&self, other: &Method) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.id == other.0.id && self.0.generic_args == other.0.generic_args)
    }

    /// Closes a generic method definition over concrete type arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GenericArityMismatch`] if the argument count differs
    /// from the number of generic parameters.
    pub fn make_generic(&self, type_args: &[ValueKind]) -> Result<Method> {
        let expected = self.0.generic_params.len();
        if expected != type_args.len() {
            return Err(Error::GenericArityMismatch {
                method: self.name().to_string(),
                expected,
                got: type_args.len(),
            });
        }
        let inner = &self.0;
        Ok(Method(Arc::new(MethodInner {
            id: inner.id,
            signature: inner.signature.clone(),
            params: inner.params.clone(),
            returns: inner.returns.clone(),
            generic_params: inner.generic_params.clone(),
            generic_args: type_args.to_vec(),
            visibility: inner.visibility,
            flags: inner.flags,
            attributes: inner.attributes.clone(),
            owner: inner.owner.clone(),
            body: inner.body.clone(),
        })))
    }

    /// Checks argument count and kinds against the signature.
    pub fn check_arguments(&self, args: &[Value]) -> Result<()> {
        if args.len() != self.0.params.len() {
            return Err(Error::ArgumentCountMismatch {
                expected: self.0.params.len(),
                got: args.len(),
            });
        }
        for (index, (param, arg)) in self.0.params.iter().zip(args).enumerate() {
            // Out slots are overwritten; their incoming value is not inspected.
            if param.mode == PassingMode::Out {
                continue;
            }
            let kind = param.kind.resolve(&self.0.generic_args);
            if !arg.conforms_to(&kind) {
                return Err(Error::ArgumentTypeMismatch {
                    index,
                    expected: kind.to_string(),
                    got: arg.kind_name(),
                });
            }
        }
        Ok(())
    }

    /// Finds the implementation that runs when this method is called on
    /// `receiver`: the most derived override for virtual class methods, the
    /// implementing method for protocol methods, and `self` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] if the receiver's class neither
    /// derives from the declaring class nor implements the declaring protocol.
    pub fn resolve_for(&self, receiver: &Object) -> Result<Method> {
        let class = receiver.class();
        let owner = &self.0.owner;
        let not_found = || Error::MethodNotFound {
            type_name: class.name().to_string(),
            method: self.name().to_string(),
        };

        let resolved = match owner.kind {
            OwnerKind::Protocol => {
                if !class.conforms_to_id(owner.id) {
                    return Err(not_found());
                }
                class
                    .protocol_method_impl(owner.id, &self.0.signature)
                    .ok_or_else(not_found)?
            }
            OwnerKind::Class if self.0.flags.is_virtual => class
                .resolve_virtual(owner.id, &self.0.signature)
                .ok_or_else(not_found)?,
            OwnerKind::Class => {
                if !class.is_subclass_of_id(owner.id) {
                    return Err(not_found());
                }
                return Ok(self.clone());
            }
        };

        if self.0.generic_args.is_empty() || !resolved.0.generic_args.is_empty() {
            Ok(resolved)
        } else {
            resolved.make_generic(&self.0.generic_args)
        }
    }

    /// Reflective call: validates, resolves, then runs the body.
    ///
    /// # Errors
    ///
    /// - [`Error::OpenGenericMethod`] for an unclosed generic definition
    /// - [`Error::NullTarget`] if `receiver` is `None`
    /// - argument count or kind mismatches
    /// - anything the body returns
    pub fn invoke(&self, receiver: Option<&Object>, args: &mut [Value]) -> Result<Value> {
        if self.is_generic_definition() {
            return Err(Error::OpenGenericMethod {
                method: self.name().to_string(),
            });
        }
        let receiver = receiver.ok_or_else(|| Error::NullTarget {
            method: self.name().to_string(),
        })?;
        self.check_arguments(args)?;
        self.resolve_for(receiver)?.call_body(receiver, args)
    }

    /// Direct call: resolves, then runs the body without validation.
    pub fn call(&self, receiver: &Object, args: &mut [Value]) -> Result<Value> {
        self.resolve_for(receiver)?.call_body(receiver, args)
    }

    /// Runs exactly this method's body, bypassing virtual dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AbstractMethod`] if the method has no body.
    pub fn call_body(&self, receiver: &Object, args: &mut [Value]) -> Result<Value> {
        match &self.0.body {
            Some(body) => body(receiver, args, &self.0.generic_args),
            None => Err(Error::AbstractMethod {
                method: format!("{}::{}", self.0.owner.name, self.name()),
            }),
        }
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Method {}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("owner", &self.0.owner.name)
            .field("signature", &format_args!("{}", self.0.signature))
            .field("returns", &self.0.returns)
            .field("flags", &self.0.flags)
            .finish()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.0.owner.name, self.0.signature)
    }
}

// ============================================================================
// MethodBuilder
// ============================================================================

/// Builder for a method declared on a class or protocol.
///
/// A method without a body is abstract.
///
/// # Example
///
/// ```
/// use interpose::{MethodBuilder, Value, ValueKind};
///
/// let add = MethodBuilder::new("add")
///     .param("a", ValueKind::I32)
///     .param("b", ValueKind::I32)
///     .returns(ValueKind::I32)
///     .overridable()
///     .body(|_, args, _| Ok(Value::I32(args[0].as_i32()? + args[1].as_i32()?)));
/// ```
#[derive(Clone)]
pub struct MethodBuilder {
    name: String,
    params: Vec<Parameter>,
    returns: ValueKind,
    generic_params: Vec<Arc<str>>,
    visibility: Visibility,
    flags: MethodFlags,
    attributes: Vec<Attribute>,
    body: Option<MethodBody>,
}

impl MethodBuilder {
    pub fn new(name: &str) -> Self {
        MethodBuilder {
            name: name.to_string(),
            params: Vec::new(),
            returns: ValueKind::Unit,
            generic_params: Vec::new(),
            visibility: Visibility::Public,
            flags: MethodFlags::default(),
            attributes: Vec::new(),
            body: None,
        }
    }

    /// Starts from the shape of an existing method: name, parameters,
    /// return kind and generic parameters. Flags, attributes and body are
    /// not copied.
    pub fn from_method(method: &Method) -> Self {
        MethodBuilder {
            name: method.name().to_string(),
            params: method.params().to_vec(),
            returns: method.returns().clone(),
            generic_params: method.generic_params().to_vec(),
            visibility: Visibility::Public,
            flags: MethodFlags::default(),
            attributes: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn rename(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    fn push_param(mut self, name: &str, kind: ValueKind, mode: PassingMode) -> Self {
        self.params.push(Parameter {
            name: Arc::from(name),
            kind,
            mode,
        });
        self
    }

    #[must_use]
    pub fn param(self, name: &str, kind: ValueKind) -> Self {
        self.push_param(name, kind, PassingMode::Value)
    }

    #[must_use]
    pub fn ref_param(self, name: &str, kind: ValueKind) -> Self {
        self.push_param(name, kind, PassingMode::Ref)
    }

    #[must_use]
    pub fn out_param(self, name: &str, kind: ValueKind) -> Self {
        self.push_param(name, kind, PassingMode::Out)
    }

    /// Appends parameters verbatim.
    #[must_use]
    pub fn params(mut self, params: impl IntoIterator<Item = Parameter>) -> Self {
        self.params.extend(params);
        self
    }

    #[must_use]
    pub fn returns(mut self, kind: ValueKind) -> Self {
        self.returns = kind;
        self
    }

    /// Adds a generic type parameter; refer to it as `ValueKind::Generic(i)`.
    #[must_use]
    pub fn generic(mut self, name: &str) -> Self {
        self.generic_params.push(Arc::from(name));
        self
    }

    /// Marks the method virtual.
    #[must_use]
    pub fn overridable(mut self) -> Self {
        self.flags.is_virtual = true;
        self
    }

    /// Marks the method final. A final override stays virtual.
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.flags.is_final = true;
        self
    }

    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    #[must_use]
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn attributes(mut self, attributes: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    #[must_use]
    pub fn body<F>(mut self, body: F) -> Self
    where
        F: Fn(&Object, &mut [Value], &[ValueKind]) -> Result<Value> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    pub(crate) fn body_arc(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of the shape without flags or body, used for abstract members.
    pub(crate) fn declaration(&self) -> MethodBuilder {
        MethodBuilder {
            name: self.name.clone(),
            params: self.params.clone(),
            returns: self.returns.clone(),
            generic_params: self.generic_params.clone(),
            visibility: self.visibility,
            flags: MethodFlags::default(),
            attributes: self.attributes.clone(),
            body: None,
        }
    }

    pub(crate) fn is_virtual(&self) -> bool {
        self.flags.is_virtual
    }

    /// Signature this builder will produce.
    pub fn signature(&self) -> Signature {
        Signature {
            selector: Selector::intern(&self.name),
            params: self
                .params
                .iter()
                .map(|p| (p.kind.clone(), p.mode))
                .collect(),
            generic_arity: self.generic_params.len(),
        }
    }

    pub(crate) fn build(self, owner: Owner) -> Result<Method> {
        Selector::validate(&self.name)?;

        let arity = self.generic_params.len();
        let out_of_range = self
            .params
            .iter()
            .map(|p| &p.kind)
            .chain(std::iter::once(&self.returns))
            .find_map(|kind| match kind {
                ValueKind::Generic(i) if *i >= arity => Some(*i + 1),
                _ => None,
            });
        if let Some(needed) = out_of_range {
            return Err(Error::GenericArityMismatch {
                method: self.name,
                expected: arity,
                got: needed,
            });
        }

        let mut flags = self.flags;
        if self.body.is_none() {
            flags.is_abstract = true;
            flags.is_virtual = true;
        }

        let signature = self.signature();
        Ok(Method(Arc::new(MethodInner {
            id: METHOD_ID.fetch_add(1, Ordering::Relaxed),
            signature,
            params: self.params,
            returns: self.returns,
            generic_params: self.generic_params,
            generic_args: Vec::new(),
            visibility: self.visibility,
            flags,
            attributes: self.attributes,
            owner,
            body: self.body,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner {
            id: 0,
            name: Arc::from("Scratch"),
            kind: OwnerKind::Class,
        }
    }

    #[test]
    fn test_method_without_body_is_abstract() {
        let m = MethodBuilder::new("area")
            .returns(ValueKind::F64)
            .build(owner())
            .unwrap();
        assert!(m.is_abstract());
        assert!(m.flags().is_virtual);
    }

    #[test]
    fn test_signature_ignores_return_kind() {
        let a = MethodBuilder::new("get").param("k", ValueKind::Str).returns(ValueKind::I32);
        let b = MethodBuilder::new("get").param("k", ValueKind::Str).returns(ValueKind::Str);
        let c = MethodBuilder::new("get").ref_param("k", ValueKind::Str);
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
        assert_eq!(a.signature().to_string(), "get(str)");
        assert_eq!(c.signature().to_string(), "get(ref str)");
    }

    #[test]
    fn test_make_generic_checks_arity() {
        let m = MethodBuilder::new("identity")
            .generic("T")
            .param("value", ValueKind::Generic(0))
            .returns(ValueKind::Generic(0))
            .body(|_, args, _| Ok(args[0].clone()))
            .build(owner())
            .unwrap();
        assert!(m.is_generic_definition());

        let closed = m.make_generic(&[ValueKind::I64]).unwrap();
        assert!(!closed.is_generic_definition());
        assert_eq!(closed.id(), m.id());
        assert_eq!(closed.resolved_return(), ValueKind::I64);
        assert!(closed.check_arguments(&[Value::I64(1)]).is_ok());
        assert!(closed.check_arguments(&[Value::I32(1)]).is_err());

        assert!(matches!(
            m.make_generic(&[]),
            Err(Error::GenericArityMismatch { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn test_generic_reference_out_of_range() {
        let result = MethodBuilder::new("broken")
            .param("x", ValueKind::Generic(1))
            .generic("T")
            .build(owner());
        assert!(matches!(result, Err(Error::GenericArityMismatch { .. })));
    }

    #[test]
    fn test_check_arguments_skips_out_slots() {
        let m = MethodBuilder::new("try_parse")
            .param("text", ValueKind::Str)
            .out_param("result", ValueKind::I32)
            .returns(ValueKind::Bool)
            .build(owner())
            .unwrap();
        assert!(m.check_arguments(&[Value::from("1"), Value::Unit]).is_ok());
        assert_eq!(
            m.check_arguments(&[Value::from("1")]),
            Err(Error::ArgumentCountMismatch {
                expected: 2,
                got: 1
            })
        );
    }
}
