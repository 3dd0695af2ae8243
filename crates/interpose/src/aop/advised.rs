//! Proxy configuration.
//!
//! # Architecture
//!
//! [`AdvisedSupport`] is the live configuration shared by every proxy built
//! from it: advisors, introductions, the protocols to proxy, the target
//! source and a set of flags. Proxies consult it on every call, so it can be
//! changed while they run:
//!
//! - the advisor list is copy-on-write; a call sees either the old or the new
//!   list, never a partial one
//! - flags are atomics
//! - once frozen, advice can no longer be added or removed
//!
//! [`ProxyConfig`] is a plain snapshot of the flags.
//!
//! Proxies also expose the configuration to callers through the built-in
//! [`advised_protocol`], implemented explicitly on every proxy class.

use crate::aop::adapter::AdvisorAdapterRegistry;
use crate::aop::advice::Advice;
use crate::aop::advisor::{Advisor, IntroductionAdvisor};
use crate::aop::chain::{AdvisorChainFactory, CachingAdvisorChainFactory, InterceptorChain};
use crate::aop::invocation::InvocationMode;
use crate::aop::target::{EmptyTargetSource, SingletonTargetSource, TargetSource};
use crate::error::{Error, Result};
use crate::proxy::ProxyStrategy;
use crate::runtime::{
    Class, Method, MethodBuilder, Object, Protocol, ProtocolBuilder, Value, ValueKind,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

// ============================================================================
// ProxyConfig
// ============================================================================

/// Flags controlling how proxies are built and how they dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Extend the target class instead of implementing protocols.
    pub proxy_target_type: bool,
    /// Copy custom attributes of the target class and its methods onto the
    /// proxy.
    pub proxy_target_attributes: bool,
    /// Publish the proxy through [`crate::aop::AopContext`] during calls.
    pub expose_proxy: bool,
    pub frozen: bool,
    pub serializable: bool,
    /// Inheritance proxies only intercept methods declared on the target
    /// class itself.
    pub declared_members_only: bool,
    pub invocation_mode: InvocationMode,
    /// Forces a strategy instead of selecting one from the flags.
    pub strategy: Option<ProxyStrategy>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            proxy_target_type: false,
            proxy_target_attributes: true,
            expose_proxy: false,
            frozen: false,
            serializable: false,
            declared_members_only: false,
            invocation_mode: InvocationMode::Reflective,
            strategy: None,
        }
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proxy_target_type={}; proxy_target_attributes={}; expose_proxy={}; frozen={}; \
             serializable={}; declared_members_only={}; invocation_mode={:?}; strategy={}",
            self.proxy_target_type,
            self.proxy_target_attributes,
            self.expose_proxy,
            self.frozen,
            self.serializable,
            self.declared_members_only,
            self.invocation_mode,
            self.strategy.map_or("auto", ProxyStrategy::name),
        )
    }
}

// ============================================================================
// AdvisedSupport
// ============================================================================

const MODE_REFLECTIVE: u8 = 0;
const MODE_DIRECT: u8 = 1;

/// Live, shareable proxy configuration.
///
/// # Example
///
/// ```
/// use interpose::{Advice, AdvisedSupport, Error};
///
/// let advised = AdvisedSupport::new();
/// advised.add_advice(Advice::around(|inv| inv.proceed())).unwrap();
/// assert_eq!(advised.advisor_count(), 1);
///
/// advised.set_frozen(true);
/// assert_eq!(
///     advised.add_advice(Advice::around(|inv| inv.proceed())),
///     Err(Error::FrozenConfiguration)
/// );
/// ```
pub struct AdvisedSupport {
    advisors: RwLock<Arc<[Arc<Advisor>]>>,
    introductions: RwLock<Arc<[Arc<IntroductionAdvisor>]>>,
    protocols: RwLock<Vec<Protocol>>,
    target_source: RwLock<Arc<dyn TargetSource>>,
    chain_factory: Arc<dyn AdvisorChainFactory>,
    adapters: Arc<AdvisorAdapterRegistry>,
    proxy_target_type: AtomicBool,
    proxy_target_attributes: AtomicBool,
    expose_proxy: AtomicBool,
    frozen: AtomicBool,
    serializable: AtomicBool,
    declared_members_only: AtomicBool,
    invocation_mode: AtomicU8,
    strategy: RwLock<Option<ProxyStrategy>>,
}

impl AdvisedSupport {
    /// Empty configuration with no target.
    pub fn new() -> Self {
        let adapters = AdvisorAdapterRegistry::global();
        let defaults = ProxyConfig::default();
        AdvisedSupport {
            advisors: RwLock::new(Arc::from(Vec::new())),
            introductions: RwLock::new(Arc::from(Vec::new())),
            protocols: RwLock::new(Vec::new()),
            target_source: RwLock::new(EmptyTargetSource::shared()),
            chain_factory: Arc::new(CachingAdvisorChainFactory::with_adapters(Arc::clone(
                &adapters,
            ))),
            adapters,
            proxy_target_type: AtomicBool::new(defaults.proxy_target_type),
            proxy_target_attributes: AtomicBool::new(defaults.proxy_target_attributes),
            expose_proxy: AtomicBool::new(defaults.expose_proxy),
            frozen: AtomicBool::new(defaults.frozen),
            serializable: AtomicBool::new(defaults.serializable),
            declared_members_only: AtomicBool::new(defaults.declared_members_only),
            invocation_mode: AtomicU8::new(MODE_REFLECTIVE),
            strategy: RwLock::new(defaults.strategy),
        }
    }

    /// Configuration targeting a single object.
    pub fn with_target(target: Object) -> Self {
        AdvisedSupport::with_target_source(Arc::new(SingletonTargetSource::new(target)))
    }

    pub fn with_target_source(source: Arc<dyn TargetSource>) -> Self {
        let advised = AdvisedSupport::new();
        advised.set_target_source(source);
        advised
    }

    /// Replaces the chain factory. A factory that caches must not be shared
    /// between configurations, since it is keyed by method and class only.
    #[must_use]
    pub fn with_chain_factory(mut self, factory: Arc<dyn AdvisorChainFactory>) -> Self {
        self.chain_factory = factory;
        self
    }

    /// Uses `adapters` both to validate advice and to build chains.
    #[must_use]
    pub fn with_adapters(mut self, adapters: Arc<AdvisorAdapterRegistry>) -> Self {
        self.chain_factory = Arc::new(CachingAdvisorChainFactory::with_adapters(Arc::clone(
            &adapters,
        )));
        self.adapters = adapters;
        self
    }

    #[must_use]
    pub fn with_config(self, config: ProxyConfig) -> Self {
        self.apply_config(config);
        self
    }

    pub fn apply_config(&self, config: ProxyConfig) {
        self.set_proxy_target_type(config.proxy_target_type);
        self.set_proxy_target_attributes(config.proxy_target_attributes);
        self.set_expose_proxy(config.expose_proxy);
        self.set_serializable(config.serializable);
        self.set_declared_members_only(config.declared_members_only);
        self.set_invocation_mode(config.invocation_mode);
        self.set_strategy(config.strategy);
        self.set_frozen(config.frozen);
    }

    pub fn config(&self) -> ProxyConfig {
        ProxyConfig {
            proxy_target_type: self.proxy_target_type(),
            proxy_target_attributes: self.proxy_target_attributes(),
            expose_proxy: self.expose_proxy(),
            frozen: self.is_frozen(),
            serializable: self.is_serializable(),
            declared_members_only: self.declared_members_only(),
            invocation_mode: self.invocation_mode(),
            strategy: self.strategy(),
        }
    }

    // ------------------------------------------------------------------
    // Advisors
    // ------------------------------------------------------------------

    /// Snapshot of the advisor list.
    pub fn advisors(&self) -> Arc<[Arc<Advisor>]> {
        Arc::clone(&self.advisors.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn advisor_count(&self) -> usize {
        self.advisors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Appends `advice` under [`crate::Pointcut::always`].
    ///
    /// # Errors
    ///
    /// - [`Error::FrozenConfiguration`] once frozen
    /// - [`Error::UnsupportedAdvice`] if no adapter understands the advice
    pub fn add_advice(&self, advice: Advice) -> Result<()> {
        self.add_advisor(Advisor::new(advice))
    }

    pub fn add_advice_at(&self, index: usize, advice: Advice) -> Result<()> {
        self.add_advisor_at(index, Advisor::new(advice))
    }

    pub fn add_advisor(&self, advisor: impl Into<Arc<Advisor>>) -> Result<()> {
        let advisor = self.checked(advisor.into())?;
        self.update_advisors(|list| {
            list.push(advisor);
            Ok(())
        })
    }

    /// Inserts an advisor at `index`.
    ///
    /// # Errors
    ///
    /// As [`add_advice`](Self::add_advice), plus [`Error::IndexOutOfRange`]
    /// if `index` is past the end of the list.
    pub fn add_advisor_at(&self, index: usize, advisor: impl Into<Arc<Advisor>>) -> Result<()> {
        let advisor = self.checked(advisor.into())?;
        self.update_advisors(|list| {
            if index > list.len() {
                return Err(Error::IndexOutOfRange {
                    index,
                    len: list.len(),
                });
            }
            list.insert(index, advisor);
            Ok(())
        })
    }

    /// Removes `advisor` by identity. Returns whether it was present.
    pub fn remove_advisor(&self, advisor: &Arc<Advisor>) -> Result<bool> {
        self.update_advisors(|list| {
            let before = list.len();
            list.retain(|a| !Arc::ptr_eq(a, advisor));
            Ok(list.len() != before)
        })
    }

    pub fn remove_advisor_at(&self, index: usize) -> Result<Arc<Advisor>> {
        self.update_advisors(|list| {
            if index >= list.len() {
                return Err(Error::IndexOutOfRange {
                    index,
                    len: list.len(),
                });
            }
            Ok(list.remove(index))
        })
    }

    /// Removes every advisor carrying `advice`. Returns whether any was
    /// present.
    pub fn remove_advice(&self, advice: &Advice) -> Result<bool> {
        self.update_advisors(|list| {
            let before = list.len();
            list.retain(|a| !a.advice().ptr_eq(advice));
            Ok(list.len() != before)
        })
    }

    pub fn index_of(&self, advisor: &Arc<Advisor>) -> Option<usize> {
        self.advisors().iter().position(|a| Arc::ptr_eq(a, advisor))
    }

    /// Drops advisors rejected by `keep`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrozenConfiguration`] once frozen.
    pub(crate) fn retain_advisors(&self, mut keep: impl FnMut(&Arc<Advisor>) -> bool) -> Result<usize> {
        self.update_advisors(|list| {
            let before = list.len();
            list.retain(|a| keep(a));
            Ok(before - list.len())
        })
    }

    fn checked(&self, advisor: Arc<Advisor>) -> Result<Arc<Advisor>> {
        self.check_mutable()?;
        if !self.adapters.supports(advisor.advice()) {
            return Err(Error::UnsupportedAdvice {
                kind: advisor.advice().kind().to_string(),
            });
        }
        Ok(advisor)
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_frozen() {
            Err(Error::FrozenConfiguration)
        } else {
            Ok(())
        }
    }

    fn update_advisors<R>(
        &self,
        change: impl FnOnce(&mut Vec<Arc<Advisor>>) -> Result<R>,
    ) -> Result<R> {
        self.check_mutable()?;
        let mut guard = self.advisors.write().unwrap_or_else(PoisonError::into_inner);
        let mut list = guard.to_vec();
        let result = change(&mut list)?;
        *guard = Arc::from(list);
        // Under the write lock, so the new list and the dropped chains are
        // seen together.
        self.chain_factory.advice_changed();
        Ok(result)
    }

    /// Checks every advisor against the adapter registry.
    pub(crate) fn validate_advice(&self) -> Result<()> {
        match self
            .advisors()
            .iter()
            .find(|a| !self.adapters.supports(a.advice()))
        {
            Some(unsupported) => Err(Error::UnsupportedAdvice {
                kind: unsupported.advice().kind().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Interceptor chain for calling `method` on an instance of
    /// `target_class`. Without advisors this is the shared empty chain.
    pub fn interceptors(&self, method: &Method, target_class: Option<&Class>) -> Result<InterceptorChain> {
        // Pointcuts run user code that may edit this configuration, so the
        // lock is released before the chain is built.
        let advisors = self.advisors();
        if advisors.is_empty() {
            return Ok(InterceptorChain::empty());
        }
        let chain = self.chain_factory.interceptors(&advisors, method, target_class)?;
        // An edit between the snapshot and the factory's own bookkeeping may
        // have let a chain for the old list into its cache.
        if !Arc::ptr_eq(&advisors, &self.advisors()) {
            self.chain_factory.advice_changed();
        }
        Ok(chain)
    }

    pub fn chain_factory(&self) -> &Arc<dyn AdvisorChainFactory> {
        &self.chain_factory
    }

    pub fn adapters(&self) -> &Arc<AdvisorAdapterRegistry> {
        &self.adapters
    }

    // ------------------------------------------------------------------
    // Introductions and protocols
    // ------------------------------------------------------------------

    pub fn introductions(&self) -> Arc<[Arc<IntroductionAdvisor>]> {
        Arc::clone(&self.introductions.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn introduction_count(&self) -> usize {
        self.introductions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// # Errors
    ///
    /// Returns [`Error::FrozenConfiguration`] once frozen.
    pub fn add_introduction(&self, introduction: IntroductionAdvisor) -> Result<()> {
        self.check_mutable()?;
        let mut guard = self.introductions.write().unwrap_or_else(PoisonError::into_inner);
        let mut list = guard.to_vec();
        list.push(Arc::new(introduction));
        *guard = Arc::from(list);
        Ok(())
    }

    pub fn remove_introduction_at(&self, index: usize) -> Result<Arc<IntroductionAdvisor>> {
        self.check_mutable()?;
        let mut guard = self.introductions.write().unwrap_or_else(PoisonError::into_inner);
        if index >= guard.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: guard.len(),
            });
        }
        let mut list = guard.to_vec();
        let removed = list.remove(index);
        *guard = Arc::from(list);
        Ok(removed)
    }

    /// Protocols requested explicitly.
    pub fn protocols(&self) -> Vec<Protocol> {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_protocol(&self, protocol: &Protocol) {
        let mut protocols = self.protocols.write().unwrap_or_else(PoisonError::into_inner);
        if !protocols.contains(protocol) {
            protocols.push(protocol.clone());
        }
    }

    pub fn remove_protocol(&self, protocol: &Protocol) -> bool {
        let mut protocols = self.protocols.write().unwrap_or_else(PoisonError::into_inner);
        let before = protocols.len();
        protocols.retain(|p| p != protocol);
        protocols.len() != before
    }

    pub fn set_protocols(&self, protocols: &[Protocol]) {
        *self.protocols.write().unwrap_or_else(PoisonError::into_inner) = protocols.to_vec();
    }

    /// Explicit protocols followed by introduced ones, each once.
    pub fn proxied_protocols(&self) -> Vec<Protocol> {
        let mut out = self.protocols();
        for introduction in self.introductions().iter() {
            for protocol in introduction.protocols() {
                if !out.contains(protocol) {
                    out.push(protocol.clone());
                }
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Target
    // ------------------------------------------------------------------

    pub fn target_source(&self) -> Arc<dyn TargetSource> {
        Arc::clone(&self.target_source.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set_target_source(&self, source: Arc<dyn TargetSource>) {
        *self.target_source.write().unwrap_or_else(PoisonError::into_inner) = source;
    }

    pub fn set_target(&self, target: Object) {
        self.set_target_source(Arc::new(SingletonTargetSource::new(target)));
    }

    pub fn target_class(&self) -> Option<Class> {
        self.target_source().target_class()
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    pub fn proxy_target_type(&self) -> bool {
        self.proxy_target_type.load(Ordering::Acquire)
    }

    pub fn set_proxy_target_type(&self, value: bool) {
        self.proxy_target_type.store(value, Ordering::Release);
    }

    pub fn proxy_target_attributes(&self) -> bool {
        self.proxy_target_attributes.load(Ordering::Acquire)
    }

    pub fn set_proxy_target_attributes(&self, value: bool) {
        self.proxy_target_attributes.store(value, Ordering::Release);
    }

    pub fn expose_proxy(&self) -> bool {
        self.expose_proxy.load(Ordering::Acquire)
    }

    pub fn set_expose_proxy(&self, value: bool) {
        self.expose_proxy.store(value, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn set_frozen(&self, value: bool) {
        self.frozen.store(value, Ordering::Release);
    }

    pub fn is_serializable(&self) -> bool {
        self.serializable.load(Ordering::Acquire)
    }

    pub fn set_serializable(&self, value: bool) {
        self.serializable.store(value, Ordering::Release);
    }

    pub fn declared_members_only(&self) -> bool {
        self.declared_members_only.load(Ordering::Acquire)
    }

    pub fn set_declared_members_only(&self, value: bool) {
        self.declared_members_only.store(value, Ordering::Release);
    }

    pub fn invocation_mode(&self) -> InvocationMode {
        match self.invocation_mode.load(Ordering::Acquire) {
            MODE_DIRECT => InvocationMode::Direct,
            _ => InvocationMode::Reflective,
        }
    }

    pub fn set_invocation_mode(&self, mode: InvocationMode) {
        let raw = match mode {
            InvocationMode::Reflective => MODE_REFLECTIVE,
            InvocationMode::Direct => MODE_DIRECT,
        };
        self.invocation_mode.store(raw, Ordering::Release);
    }

    pub fn strategy(&self) -> Option<ProxyStrategy> {
        *self.strategy.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_strategy(&self, strategy: Option<ProxyStrategy>) {
        *self.strategy.write().unwrap_or_else(PoisonError::into_inner) = strategy;
    }

    /// Human-readable dump of the whole configuration.
    pub fn to_proxy_config_string(&self) -> String {
        self.to_string()
    }
}

impl Default for AdvisedSupport {
    fn default() -> Self {
        AdvisedSupport::new()
    }
}

impl fmt::Display for AdvisedSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |protocols: &[Protocol]| {
            protocols
                .iter()
                .map(Protocol::name)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let advisors = self.advisors();
        let advice = advisors
            .iter()
            .map(|a| {
                if a.is_default() {
                    a.advice().kind().to_string()
                } else {
                    format!("{} (pointcut)", a.advice().kind())
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let target = self.target_source();
        write!(
            f,
            "protocols=[{}]; advisors=[{}]; introductions={}; target={}; {}",
            names(&self.protocols()),
            advice,
            self.introduction_count(),
            match (target.is_empty(), target.target_class()) {
                (true, _) => "none".to_string(),
                (false, Some(class)) => class.name().to_string(),
                (false, None) => "unknown".to_string(),
            },
            self.config(),
        )
    }
}

impl fmt::Debug for AdvisedSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisedSupport")
            .field("advisors", &self.advisor_count())
            .field("introductions", &self.introduction_count())
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Built-in protocols
// ============================================================================

static ADVISED: LazyLock<Protocol> = LazyLock::new(|| {
    let mut b = ProtocolBuilder::new("Advised");
    b.method(MethodBuilder::new("advisor_count").returns(ValueKind::I64))
        .method(MethodBuilder::new("introduction_count").returns(ValueKind::I64))
        .method(MethodBuilder::new("is_frozen").returns(ValueKind::Bool))
        .method(MethodBuilder::new("is_serializable").returns(ValueKind::Bool))
        .method(MethodBuilder::new("expose_proxy").returns(ValueKind::Bool))
        .method(MethodBuilder::new("proxy_target_type").returns(ValueKind::Bool))
        .method(MethodBuilder::new("target_type_name").returns(ValueKind::Str))
        .method(MethodBuilder::new("add_advice").param("advice", ValueKind::Any))
        .method(MethodBuilder::new("add_advisor").param("advisor", ValueKind::Any))
        .method(MethodBuilder::new("remove_advisor_at").param("index", ValueKind::I64))
        .method(MethodBuilder::new("to_proxy_config_string").returns(ValueKind::Str));
    b.register_builtin()
});

static AOP_PROXY: LazyLock<Protocol> =
    LazyLock::new(|| ProtocolBuilder::new("AopProxy").register_builtin());

static TARGET_AWARE: LazyLock<Protocol> = LazyLock::new(|| {
    let mut b = ProtocolBuilder::new("TargetAware");
    b.method(MethodBuilder::new("set_target_proxy").param("proxy", ValueKind::Object));
    b.register_builtin()
});

/// Management protocol every proxy implements explicitly.
///
/// `add_advice` takes a [`Value::Any`] holding an [`Advice`]; `add_advisor`
/// one holding an [`Advisor`].
pub fn advised_protocol() -> Protocol {
    ADVISED.clone()
}

/// Marker protocol adopted by every proxy class.
pub fn aop_proxy_protocol() -> Protocol {
    AOP_PROXY.clone()
}

/// Introduction delegates adopting this protocol are told the proxy that
/// owns them when it is constructed. Delegates should keep a
/// [`crate::runtime::WeakObject`], since the proxy already owns them.
pub fn target_aware_protocol() -> Protocol {
    TARGET_AWARE.clone()
}

/// Runs one `Advised` protocol method against `advised`.
pub(crate) fn dispatch_management(
    advised: &AdvisedSupport,
    method: &Method,
    args: &mut [Value],
) -> Result<Value> {
    let count = |n: usize| Value::I64(i64::try_from(n).unwrap_or(i64::MAX));
    match method.name() {
        "advisor_count" => Ok(count(advised.advisor_count())),
        "introduction_count" => Ok(count(advised.introduction_count())),
        "is_frozen" => Ok(Value::Bool(advised.is_frozen())),
        "is_serializable" => Ok(Value::Bool(advised.is_serializable())),
        "expose_proxy" => Ok(Value::Bool(advised.expose_proxy())),
        "proxy_target_type" => Ok(Value::Bool(advised.proxy_target_type())),
        "target_type_name" => Ok(advised
            .target_class()
            .map_or(Value::Null, |c| Value::from(c.name()))),
        "add_advice" => {
            let advice = first(args)?.downcast::<Advice>()?;
            advised.add_advice(Advice::clone(&advice))?;
            Ok(Value::Unit)
        }
        "add_advisor" => {
            advised.add_advisor(first(args)?.downcast::<Advisor>()?)?;
            Ok(Value::Unit)
        }
        "remove_advisor_at" => {
            let raw = first(args)?.as_i64()?;
            let index = usize::try_from(raw).map_err(|_| Error::IndexOutOfRange {
                index: usize::MAX,
                len: advised.advisor_count(),
            })?;
            advised.remove_advisor_at(index)?;
            Ok(Value::Unit)
        }
        "to_proxy_config_string" => Ok(Value::from(advised.to_proxy_config_string())),
        _ => Err(Error::MethodNotFound {
            type_name: ADVISED.name().to_string(),
            method: method.name().to_string(),
        }),
    }
}

fn first(args: &[Value]) -> Result<&Value> {
    args.first().ok_or(Error::ArgumentCountMismatch {
        expected: 1,
        got: 0,
    })
}
