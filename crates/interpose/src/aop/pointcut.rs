//! Pointcuts: where advice applies.
//!
//! A [`Pointcut`] pairs a [`TypeFilter`] over the target class with a
//! [`MethodMatcher`] over the called method. Matchers are evaluated once per
//! (method, target class) when a chain is built. A matcher that reports
//! [`MethodMatcher::is_runtime`] is also asked again on every call, with the
//! actual arguments, just before its interceptor would run.

use crate::runtime::{Class, Method, Protocol, Value};
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Predicate over the target class. `None` means the class is unknown.
pub trait TypeFilter: Send + Sync {
    fn matches(&self, class: Option<&Class>) -> bool;
}

/// Predicate over a method.
pub trait MethodMatcher: Send + Sync {
    fn matches(&self, method: &Method, target_class: Option<&Class>) -> bool;

    /// Whether [`matches_with_args`](Self::matches_with_args) must be checked
    /// per call.
    fn is_runtime(&self) -> bool {
        false
    }

    fn matches_with_args(
        &self,
        _method: &Method,
        _target_class: Option<&Class>,
        _args: &[Value],
    ) -> bool {
        true
    }
}

struct AnyClass;

impl TypeFilter for AnyClass {
    fn matches(&self, _class: Option<&Class>) -> bool {
        true
    }
}

struct AnyMethod;

impl MethodMatcher for AnyMethod {
    fn matches(&self, _method: &Method, _target_class: Option<&Class>) -> bool {
        true
    }
}

static ANY_CLASS: LazyLock<Arc<dyn TypeFilter>> = LazyLock::new(|| Arc::new(AnyClass));
static ANY_METHOD: LazyLock<Arc<dyn MethodMatcher>> = LazyLock::new(|| Arc::new(AnyMethod));

/// Shared filter accepting every class.
pub fn any_class() -> Arc<dyn TypeFilter> {
    Arc::clone(&ANY_CLASS)
}

/// Shared matcher accepting every method.
pub fn any_method() -> Arc<dyn MethodMatcher> {
    Arc::clone(&ANY_METHOD)
}

/// Matches classes that conform to a protocol.
pub struct ProtocolTypeFilter(Protocol);

impl ProtocolTypeFilter {
    pub fn new(protocol: &Protocol) -> Self {
        ProtocolTypeFilter(protocol.clone())
    }
}

impl TypeFilter for ProtocolTypeFilter {
    fn matches(&self, class: Option<&Class>) -> bool {
        class.is_some_and(|c| c.conforms_to(&self.0))
    }
}

/// Matches a class and its subclasses.
pub struct SubclassTypeFilter(Class);

impl SubclassTypeFilter {
    pub fn new(class: &Class) -> Self {
        SubclassTypeFilter(class.clone())
    }
}

impl TypeFilter for SubclassTypeFilter {
    fn matches(&self, class: Option<&Class>) -> bool {
        class.is_some_and(|c| c.is_subclass_of(&self.0))
    }
}

/// Type filter backed by a closure.
pub struct FnTypeFilter<F>(F);

impl<F> FnTypeFilter<F>
where
    F: Fn(Option<&Class>) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnTypeFilter(f)
    }
}

impl<F> TypeFilter for FnTypeFilter<F>
where
    F: Fn(Option<&Class>) -> bool + Send + Sync,
{
    fn matches(&self, class: Option<&Class>) -> bool {
        (self.0)(class)
    }
}

/// Matches method names against `*` wildcard patterns.
///
/// # Example
///
/// ```
/// use interpose::aop::pointcut::pattern_matches;
///
/// assert!(pattern_matches("get*", "get_balance"));
/// assert!(pattern_matches("*_balance", "get_balance"));
/// assert!(pattern_matches("*bal*", "get_balance"));
/// assert!(!pattern_matches("set*", "get_balance"));
/// ```
#[derive(Debug, Clone)]
pub struct NameMatchMethodMatcher {
    patterns: Vec<String>,
}

impl NameMatchMethodMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NameMatchMethodMatcher {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl MethodMatcher for NameMatchMethodMatcher {
    fn matches(&self, method: &Method, _target_class: Option<&Class>) -> bool {
        self.patterns.iter().any(|p| pattern_matches(p, method.name()))
    }
}

/// Simple glob match where `*` stands for any run of characters.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern = pattern.as_bytes();
    let name = name.as_bytes();
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, n));
            p += 1;
        } else if p < pattern.len() && pattern[p] == name[n] {
            p += 1;
            n += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            n = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

/// Matches methods carrying a custom attribute, either on the method itself
/// or on the target class's implementation of it.
#[derive(Debug, Clone)]
pub struct AttributeMethodMatcher {
    attribute: Arc<str>,
}

impl AttributeMethodMatcher {
    pub fn new(attribute: &str) -> Self {
        AttributeMethodMatcher {
            attribute: Arc::from(attribute),
        }
    }
}

impl MethodMatcher for AttributeMethodMatcher {
    fn matches(&self, method: &Method, target_class: Option<&Class>) -> bool {
        if method.has_attribute(&self.attribute) {
            return true;
        }
        let implementation = match target_class {
            Some(class) if method.is_protocol_method() => {
                class.protocol_method_impl(method.owner().id, method.signature())
            }
            Some(class) => class.find_inherited(method.signature()),
            None => None,
        };
        implementation.is_some_and(|m| m.has_attribute(&self.attribute))
    }
}

/// Method matcher backed by a closure.
pub struct FnMethodMatcher<F>(F);

impl<F> FnMethodMatcher<F>
where
    F: Fn(&Method, Option<&Class>) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnMethodMatcher(f)
    }
}

impl<F> MethodMatcher for FnMethodMatcher<F>
where
    F: Fn(&Method, Option<&Class>) -> bool + Send + Sync,
{
    fn matches(&self, method: &Method, target_class: Option<&Class>) -> bool {
        (self.0)(method, target_class)
    }
}

/// Runtime matcher: a static matcher narrowed by a check on the actual
/// arguments of each call.
pub struct ArgumentMatcher<F> {
    methods: Arc<dyn MethodMatcher>,
    check: F,
}

impl<F> ArgumentMatcher<F>
where
    F: Fn(&[Value]) -> bool + Send + Sync,
{
    pub fn new(methods: Arc<dyn MethodMatcher>, check: F) -> Self {
        ArgumentMatcher { methods, check }
    }
}

impl<F> MethodMatcher for ArgumentMatcher<F>
where
    F: Fn(&[Value]) -> bool + Send + Sync,
{
    fn matches(&self, method: &Method, target_class: Option<&Class>) -> bool {
        self.methods.matches(method, target_class)
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_with_args(&self, _method: &Method, _target_class: Option<&Class>, args: &[Value]) -> bool {
        (self.check)(args)
    }
}

/// Type filter plus method matcher.
#[derive(Clone)]
pub struct Pointcut {
    type_filter: Arc<dyn TypeFilter>,
    method_matcher: Arc<dyn MethodMatcher>,
}

impl Pointcut {
    pub fn new(type_filter: Arc<dyn TypeFilter>, method_matcher: Arc<dyn MethodMatcher>) -> Self {
        Pointcut {
            type_filter,
            method_matcher,
        }
    }

    /// Matches everything. All `always` pointcuts share the same filters,
    /// so they compare equal under [`Pointcut::same_as`].
    pub fn always() -> Self {
        Pointcut::new(any_class(), any_method())
    }

    /// Any class, methods selected by `matcher`.
    pub fn methods(matcher: impl MethodMatcher + 'static) -> Self {
        Pointcut::new(any_class(), Arc::new(matcher))
    }

    /// Any class, methods whose name matches one of `patterns`.
    pub fn names<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Pointcut::methods(NameMatchMethodMatcher::new(patterns))
    }

    pub fn type_filter(&self) -> &Arc<dyn TypeFilter> {
        &self.type_filter
    }

    pub fn method_matcher(&self) -> &Arc<dyn MethodMatcher> {
        &self.method_matcher
    }

    pub fn is_always(&self) -> bool {
        Arc::ptr_eq(&self.type_filter, &ANY_CLASS) && Arc::ptr_eq(&self.method_matcher, &ANY_METHOD)
    }

    /// True if both pointcuts share the same filter and matcher instances.
    pub fn same_as(&self, other: &Pointcut) -> bool {
        Arc::ptr_eq(&self.type_filter, &other.type_filter)
            && Arc::ptr_eq(&self.method_matcher, &other.method_matcher)
    }

    /// Static match used when building a chain.
    pub fn matches(&self, method: &Method, target_class: Option<&Class>) -> bool {
        self.type_filter.matches(target_class) && self.method_matcher.matches(method, target_class)
    }
}

impl fmt::Debug for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_always() {
            f.write_str("Pointcut::always")
        } else {
            f.debug_struct("Pointcut")
                .field("runtime", &self.method_matcher.is_runtime())
                .finish_non_exhaustive()
        }
    }
}
