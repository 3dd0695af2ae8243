//! Turning a configuration into a proxy.
//!
//! [`DefaultAopProxyFactory::create_aop_proxy`] validates the
//! configuration, picks a strategy, fetches or builds the proxy type, then
//! drops advisors a nested proxy already applies. The returned
//! [`AopProxy`] creates instances of that type.

use crate::aop::advised::{advised_protocol, aop_proxy_protocol};
use crate::aop::{AdvisedSupport, Advisor};
use crate::error::{Error, Result};
use crate::proxy::ProxyStrategy;
use crate::proxy::cache::{GeneratedProxyType, ProtocolSource, ProxyTypeCache, ProxyTypeKey};
use crate::proxy::state::ProxyState;
use crate::proxy::type_builder;
use crate::runtime::{Class, Object, PROXY_HOST, Protocol, Value};
use interpose_log::debug;
use std::fmt;
use std::sync::Arc;

/// Which advisors of a configuration are dropped when its target is itself
/// a composition proxy applying the same advisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateAdvisorPolicy {
    /// Keep every advisor.
    Disabled,
    /// Drop advisors the nested proxy holds by reference.
    ReferenceOnly,
    /// Also drop default advisors whose advice equals a nested default
    /// advisor's advice.
    #[default]
    ReferenceOrDefaultAdvisor,
}

/// Creates proxies from configurations.
///
/// # Example
///
/// ```
/// use interpose::{
///     Advice, AdvisedSupport, ClassBuilder, DefaultAopProxyFactory, MethodBuilder, Object,
///     ProtocolBuilder, Value, ValueKind,
/// };
/// use std::sync::Arc;
///
/// let mut p = ProtocolBuilder::new("Doubler");
/// p.method(MethodBuilder::new("double").param("n", ValueKind::I32).returns(ValueKind::I32));
/// let doubler = p.register().unwrap();
///
/// let mut c = ClassBuilder::new("DoublerImpl", None);
/// c.adopt(&doubler).method(
///     MethodBuilder::new("double")
///         .param("n", ValueKind::I32)
///         .returns(ValueKind::I32)
///         .body(|_, args, _| Ok(Value::I32(args[0].as_i32()? * 2))),
/// );
/// let class = c.register().unwrap();
///
/// let advised = Arc::new(AdvisedSupport::with_target(Object::new(&class).unwrap()));
/// advised.add_protocol(&doubler);
/// advised.add_advice(Advice::around(|inv| {
///     let doubled = inv.proceed()?.as_i32()?;
///     Ok(Value::I32(doubled + 1))
/// })).unwrap();
///
/// let proxy = DefaultAopProxyFactory::new().create_aop_proxy(&advised).unwrap().get_proxy().unwrap();
/// let result = proxy.invoke_protocol(&doubler, "double", &mut [Value::I32(20)]).unwrap();
/// assert_eq!(result, Value::I32(41));
/// ```
#[derive(Debug, Clone)]
pub struct DefaultAopProxyFactory {
    policy: DuplicateAdvisorPolicy,
    cache: Arc<ProxyTypeCache>,
}

impl DefaultAopProxyFactory {
    /// A factory using the global type cache and the default policy.
    pub fn new() -> Self {
        DefaultAopProxyFactory {
            policy: DuplicateAdvisorPolicy::default(),
            cache: ProxyTypeCache::global(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: DuplicateAdvisorPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ProxyTypeCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn policy(&self) -> DuplicateAdvisorPolicy {
        self.policy
    }

    pub fn cache(&self) -> &Arc<ProxyTypeCache> {
        &self.cache
    }

    /// Validates `advised` and returns a proxy generator for it.
    ///
    /// Once the configuration is valid, removes advisors a nested proxy
    /// already applies under the duplicate policy. A frozen or invalid
    /// configuration is left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::NoAdvisorsOrTarget`] without advisors and without target
    /// - [`Error::UnsupportedAdvice`] for advice no adapter handles
    /// - [`Error::MissingTargetType`] for an extension strategy without a
    ///   known target class
    /// - [`Error::TypeNotVisible`] or [`Error::SealedType`] for classes and
    ///   protocols the proxy cannot use
    /// - [`Error::UnsatisfiedProtocol`] for a protocol the target class does
    ///   not implement and no introduction provides
    pub fn create_aop_proxy(&self, advised: &Arc<AdvisedSupport>) -> Result<AopProxy> {
        if advised.advisor_count() == 0 && advised.target_source().is_empty() {
            return Err(Error::NoAdvisorsOrTarget);
        }
        advised.validate_advice()?;

        let strategy = select_strategy(advised);
        let duplicates = self.nested_duplicates(advised, strategy);
        let key = proxy_type_key(advised, strategy)?;
        debug!(
            "creating {strategy} proxy for {} ({} protocols)",
            key.target.as_ref().map_or("<no target>", Class::name),
            key.protocols.len()
        );
        let generated = self.cache.get_or_build(key, type_builder::build)?;
        if !duplicates.is_empty() {
            let removed = advised.retain_advisors(|advisor| {
                !duplicates.iter().any(|d| Arc::ptr_eq(d, advisor))
            })?;
            debug!("dropped {removed} advisors already applied by the nested proxy");
        }
        Ok(AopProxy {
            generated,
            advised: Arc::clone(advised),
        })
    }

    /// Advisors of `advised` that a nested composition proxy already
    /// applies. Empty for a frozen configuration.
    fn nested_duplicates(&self, advised: &AdvisedSupport, strategy: ProxyStrategy) -> Vec<Arc<Advisor>> {
        if self.policy == DuplicateAdvisorPolicy::Disabled || strategy != ProxyStrategy::Composition {
            return Vec::new();
        }
        if advised.is_frozen() {
            debug!("frozen configuration keeps advisors shared with a nested proxy");
            return Vec::new();
        }
        let Some(inner) = advised.target_source().peek_static_target() else {
            return Vec::new();
        };
        let Ok(inner_state) = ProxyState::of(&inner) else {
            return Vec::new();
        };
        if inner_state.strategy() != ProxyStrategy::Composition {
            return Vec::new();
        }
        let nested = inner_state.advised().advisors();
        let by_value = self.policy == DuplicateAdvisorPolicy::ReferenceOrDefaultAdvisor;
        advised
            .advisors()
            .iter()
            .filter(|&advisor| {
                nested.iter().any(|n| {
                    Arc::ptr_eq(n, advisor)
                        || (by_value && n.is_default() && advisor.is_default() && n.value_eq(advisor))
                })
            })
            .cloned()
            .collect()
    }
}

impl Default for DefaultAopProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// A forced strategy wins; otherwise extend the target when asked to or
/// when there is no protocol to implement.
fn select_strategy(advised: &AdvisedSupport) -> ProxyStrategy {
    if let Some(strategy) = advised.strategy() {
        return strategy;
    }
    if advised.proxy_target_type() || advised.proxied_protocols().is_empty() {
        ProxyStrategy::Decorator
    } else {
        ProxyStrategy::Composition
    }
}

fn check_visible(protocol: &Protocol) -> Result<()> {
    if protocol.is_visible_to(PROXY_HOST) {
        Ok(())
    } else {
        Err(Error::TypeNotVisible {
            type_name: protocol.name().to_string(),
        })
    }
}

fn check_extensible(class: &Class) -> Result<()> {
    if !class.is_visible_to(PROXY_HOST) {
        return Err(Error::TypeNotVisible {
            type_name: class.name().to_string(),
        });
    }
    if class.is_sealed() {
        return Err(Error::SealedType {
            type_name: class.name().to_string(),
        });
    }
    Ok(())
}

fn proxy_type_key(advised: &AdvisedSupport, strategy: ProxyStrategy) -> Result<ProxyTypeKey> {
    let target = advised.target_class();
    let base = if strategy.extends_target() {
        let class = target.clone().ok_or(Error::MissingTargetType {
            strategy: strategy.name(),
        })?;
        check_extensible(&class)?;
        class
    } else {
        Class::object()
    };

    let builtin = [advised_protocol(), aop_proxy_protocol()];
    let mut protocols: Vec<(Protocol, ProtocolSource)> = Vec::new();
    // Introductions first: they take over a protocol the target also has.
    for (index, introduction) in advised.introductions().iter().enumerate() {
        if !introduction.applies_to(target.as_ref()) {
            continue;
        }
        for protocol in introduction.protocols().iter().flat_map(Protocol::all_protocols) {
            if builtin.contains(&protocol) || protocols.iter().any(|(p, _)| *p == protocol) {
                continue;
            }
            check_visible(&protocol)?;
            protocols.push((protocol, ProtocolSource::Introduction(index)));
        }
    }
    for protocol in advised.protocols().iter().flat_map(Protocol::all_protocols) {
        if builtin.contains(&protocol) || protocols.iter().any(|(p, _)| *p == protocol) {
            continue;
        }
        check_visible(&protocol)?;
        if let Some(class) = &target {
            if !class.conforms_to(&protocol) {
                return Err(Error::UnsatisfiedProtocol {
                    protocol: protocol.name().to_string(),
                    type_name: class.name().to_string(),
                });
            }
        }
        protocols.push((protocol, ProtocolSource::Target));
    }
    protocols.sort_by_key(|(p, _)| p.id());

    Ok(ProxyTypeKey {
        strategy,
        base,
        target,
        protocols,
        copy_attributes: advised.proxy_target_attributes(),
        serializable: advised.is_serializable(),
        declared_members_only: advised.declared_members_only(),
    })
}

/// Generator of proxy instances for one configuration.
#[derive(Clone)]
pub struct AopProxy {
    generated: Arc<GeneratedProxyType>,
    advised: Arc<AdvisedSupport>,
}

impl AopProxy {
    /// A new proxy instance.
    ///
    /// # Errors
    ///
    /// Fails if the target source cannot supply a decorator's target or a
    /// target-aware introduction rejects the proxy.
    pub fn get_proxy(&self) -> Result<Object> {
        self.generated.instantiate(&self.advised)
    }

    /// A new proxy instance, passing `args` to the inherited constructor
    /// (inheritance strategy).
    pub fn get_proxy_with_args(&self, args: &[Value]) -> Result<Object> {
        self.generated.instantiate_with(&self.advised, args)
    }

    pub fn proxy_type(&self) -> &Arc<GeneratedProxyType> {
        &self.generated
    }

    pub fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }
}

impl fmt::Debug for AopProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AopProxy")
            .field("type", &self.generated.class().name())
            .field("strategy", &self.generated.strategy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aop::{Advice, Advisor};
    use crate::runtime::{ClassBuilder, MethodBuilder, ProtocolBuilder, ValueKind, Visibility};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service() -> (Protocol, Class) {
        let mut p = ProtocolBuilder::new("FactoryService");
        p.method(MethodBuilder::new("ping").returns(ValueKind::Str));
        let protocol = p.register().unwrap();
        let mut c = ClassBuilder::new("FactoryServiceImpl", None);
        c.adopt(&protocol).method(
            MethodBuilder::new("ping")
                .returns(ValueKind::Str)
                .overridable()
                .body(|_, _, _| Ok(Value::from("pong"))),
        );
        (protocol, c.register().unwrap())
    }

    #[test]
    fn test_empty_configuration_rejected() {
        let advised = Arc::new(AdvisedSupport::new());
        let result = DefaultAopProxyFactory::new().create_aop_proxy(&advised);
        assert!(matches!(result, Err(Error::NoAdvisorsOrTarget)));
    }

    #[test]
    fn test_strategy_selection() {
        let (protocol, class) = service();
        let advised = AdvisedSupport::with_target(Object::new(&class).unwrap());
        assert_eq!(select_strategy(&advised), ProxyStrategy::Decorator);
        advised.add_protocol(&protocol);
        assert_eq!(select_strategy(&advised), ProxyStrategy::Composition);
        advised.set_proxy_target_type(true);
        assert_eq!(select_strategy(&advised), ProxyStrategy::Decorator);
        advised.set_strategy(Some(ProxyStrategy::Inheritance));
        assert_eq!(select_strategy(&advised), ProxyStrategy::Inheritance);
    }

    #[test]
    fn test_internal_class_needs_proxy_host_access() {
        let mut hidden = ClassBuilder::new("FactoryHidden", None);
        hidden.visibility(Visibility::Internal);
        let hidden = hidden.register().unwrap();
        let advised = Arc::new(AdvisedSupport::with_target(Object::new(&hidden).unwrap()));
        let result = DefaultAopProxyFactory::new().create_aop_proxy(&advised);
        assert!(matches!(result, Err(Error::TypeNotVisible { .. })));

        let mut friendly = ClassBuilder::new("FactoryFriendly", None);
        friendly.visibility(Visibility::Internal).visible_to(PROXY_HOST);
        let friendly = friendly.register().unwrap();
        let advised = Arc::new(AdvisedSupport::with_target(Object::new(&friendly).unwrap()));
        assert!(DefaultAopProxyFactory::new().create_aop_proxy(&advised).is_ok());
    }

    #[test]
    fn test_unsatisfied_protocol() {
        let (protocol, _) = service();
        let plain = ClassBuilder::new("FactoryPlain", None).register().unwrap();
        let advised = Arc::new(AdvisedSupport::with_target(Object::new(&plain).unwrap()));
        advised.add_protocol(&protocol);
        let result = DefaultAopProxyFactory::new().create_aop_proxy(&advised);
        assert!(matches!(result, Err(Error::UnsatisfiedProtocol { .. })));
    }

    #[test]
    fn test_duplicate_advisors_dropped_for_nested_composition() {
        let (protocol, class) = service();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let shared = Arc::new(Advisor::new(Advice::around(move |inv| {
            counter.fetch_add(1, Ordering::SeqCst);
            inv.proceed()
        })));
        let factory = DefaultAopProxyFactory::new();

        let inner = Arc::new(AdvisedSupport::with_target(Object::new(&class).unwrap()));
        inner.add_protocol(&protocol);
        inner.add_advisor(Arc::clone(&shared)).unwrap();
        let inner_proxy = factory.create_aop_proxy(&inner).unwrap().get_proxy().unwrap();

        let outer = Arc::new(AdvisedSupport::with_target(inner_proxy));
        outer.add_protocol(&protocol);
        outer.add_advisor(Arc::clone(&shared)).unwrap();
        outer.add_advice(Advice::before(|_, _, _| Ok(()))).unwrap();
        let layered = factory.create_aop_proxy(&outer).unwrap().get_proxy().unwrap();
        assert_eq!(outer.advisor_count(), 1);

        for call in 1..=3 {
            let result = layered.invoke_protocol(&protocol, "ping", &mut []).unwrap();
            assert_eq!(result, Value::from("pong"));
            assert_eq!(runs.load(Ordering::SeqCst), call);
        }

        let kept = Arc::new(AdvisedSupport::with_target(
            factory.create_aop_proxy(&inner).unwrap().get_proxy().unwrap(),
        ));
        kept.add_protocol(&protocol);
        kept.add_advisor(Arc::clone(&shared)).unwrap();
        factory
            .clone()
            .with_policy(DuplicateAdvisorPolicy::Disabled)
            .create_aop_proxy(&kept)
            .unwrap();
        assert_eq!(kept.advisor_count(), 1);
    }

    #[test]
    fn test_failed_build_leaves_configuration_unchanged() {
        let (protocol, class) = service();
        let mut extra = ProtocolBuilder::new("FactoryExtra");
        extra.method(MethodBuilder::new("extra"));
        let extra = extra.register().unwrap();
        let shared = Arc::new(Advisor::new(Advice::around(|inv| inv.proceed())));
        let factory = DefaultAopProxyFactory::new();

        let inner = Arc::new(AdvisedSupport::with_target(Object::new(&class).unwrap()));
        inner.add_protocol(&protocol);
        inner.add_advisor(Arc::clone(&shared)).unwrap();
        let inner_proxy = factory.create_aop_proxy(&inner).unwrap().get_proxy().unwrap();

        let outer = Arc::new(AdvisedSupport::with_target(inner_proxy.clone()));
        outer.add_protocol(&protocol);
        outer.add_protocol(&extra);
        outer.add_advisor(Arc::clone(&shared)).unwrap();
        let result = factory.create_aop_proxy(&outer);
        assert!(matches!(result, Err(Error::UnsatisfiedProtocol { .. })));
        assert_eq!(outer.advisor_count(), 1);

        let frozen = Arc::new(AdvisedSupport::with_target(inner_proxy));
        frozen.add_protocol(&protocol);
        frozen.add_advisor(Arc::clone(&shared)).unwrap();
        frozen.set_frozen(true);
        factory.create_aop_proxy(&frozen).unwrap();
        assert_eq!(frozen.advisor_count(), 1);
        assert!(frozen.is_frozen());
    }
}
