//! Interceptor chains.
//!
//! # Architecture
//!
//! A chain is the ordered list of interceptors that apply to one method on
//! one target class. Chains are built by an [`AdvisorChainFactory`] from the
//! advisor list of a configuration:
//!
//! 1. each advisor's pointcut is checked against (method, target class)
//! 2. matching advice is adapted into an interceptor
//! 3. advisors with a runtime matcher produce a [`ChainEntry::Dynamic`] entry
//!    whose matcher is re-checked against the arguments of every call
//!
//! The empty chain is a shared sentinel. Proxy methods test for it and skip
//! the invocation machinery entirely.

use crate::aop::adapter::AdvisorAdapterRegistry;
use crate::aop::advice::MethodInterceptor;
use crate::aop::advisor::Advisor;
use crate::aop::pointcut::MethodMatcher;
use crate::error::Result;
use crate::runtime::{Class, Method};
use fxhash::FxHashMap;
use interpose_log::debug;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// One element of a chain.
#[derive(Clone)]
pub enum ChainEntry {
    Static(Arc<dyn MethodInterceptor>),
    /// Runs only when `matcher` accepts the call's arguments.
    Dynamic {
        matcher: Arc<dyn MethodMatcher>,
        interceptor: Arc<dyn MethodInterceptor>,
    },
}

/// Immutable, shareable interceptor list.
#[derive(Clone)]
pub struct InterceptorChain(Arc<[ChainEntry]>);

static EMPTY_CHAIN: LazyLock<InterceptorChain> =
    LazyLock::new(|| InterceptorChain(Arc::from(Vec::new())));

impl InterceptorChain {
    /// The shared empty chain.
    pub fn empty() -> Self {
        EMPTY_CHAIN.clone()
    }

    /// Wraps `entries`; an empty list yields the shared sentinel.
    pub fn new(entries: Vec<ChainEntry>) -> Self {
        if entries.is_empty() {
            InterceptorChain::empty()
        } else {
            InterceptorChain(Arc::from(entries))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, index: usize) -> Option<&ChainEntry> {
        self.0.get(index)
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.0
    }

    /// True if both chains share storage.
    pub fn ptr_eq(&self, other: &InterceptorChain) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dynamic = self
            .0
            .iter()
            .filter(|e| matches!(e, ChainEntry::Dynamic { .. }))
            .count();
        f.debug_struct("InterceptorChain")
            .field("len", &self.0.len())
            .field("dynamic", &dynamic)
            .finish()
    }
}

/// Builds interceptor chains from advisors.
pub trait AdvisorChainFactory: Send + Sync {
    /// Chain for calling `method` on an instance of `target_class`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedAdvice`] if a matching advisor
    /// carries advice no adapter understands.
    fn interceptors(
        &self,
        advisors: &[Arc<Advisor>],
        method: &Method,
        target_class: Option<&Class>,
    ) -> Result<InterceptorChain>;

    /// Called whenever the advisor list of a configuration using this
    /// factory changes.
    fn advice_changed(&self) {}
}

/// Evaluates every advisor on every request.
pub struct DefaultAdvisorChainFactory {
    adapters: Arc<AdvisorAdapterRegistry>,
}

impl DefaultAdvisorChainFactory {
    pub fn new() -> Self {
        DefaultAdvisorChainFactory::with_adapters(AdvisorAdapterRegistry::global())
    }

    pub fn with_adapters(adapters: Arc<AdvisorAdapterRegistry>) -> Self {
        DefaultAdvisorChainFactory { adapters }
    }

    pub fn adapters(&self) -> &Arc<AdvisorAdapterRegistry> {
        &self.adapters
    }
}

impl Default for DefaultAdvisorChainFactory {
    fn default() -> Self {
        DefaultAdvisorChainFactory::new()
    }
}

impl AdvisorChainFactory for DefaultAdvisorChainFactory {
    fn interceptors(
        &self,
        advisors: &[Arc<Advisor>],
        method: &Method,
        target_class: Option<&Class>,
    ) -> Result<InterceptorChain> {
        let mut entries = Vec::with_capacity(advisors.len());
        for advisor in advisors {
            let pointcut = advisor.pointcut();
            if !pointcut.matches(method, target_class) {
                continue;
            }
            let interceptor = self.adapters.interceptor(advisor.advice())?;
            let matcher = pointcut.method_matcher();
            entries.push(if matcher.is_runtime() {
                ChainEntry::Dynamic {
                    matcher: Arc::clone(matcher),
                    interceptor,
                }
            } else {
                ChainEntry::Static(interceptor)
            });
        }
        Ok(InterceptorChain::new(entries))
    }
}

type ChainKey = (u64, Option<u64>);

struct ChainCache {
    generation: u64,
    chains: FxHashMap<ChainKey, InterceptorChain>,
}

/// Hit and miss counters of a [`CachingAdvisorChainFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainCacheStats {
    pub hits: usize,
    pub misses: usize,
    pub cached: usize,
}

/// Memoizes chains per (method, target class) until the advice changes.
///
/// Closed instantiations of a generic method share their definition's
/// chain. A chain computed from an advisor snapshot that was replaced while
/// it was being built is returned but not stored.
pub struct CachingAdvisorChainFactory {
    inner: DefaultAdvisorChainFactory,
    cache: Mutex<ChainCache>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachingAdvisorChainFactory {
    pub fn new() -> Self {
        CachingAdvisorChainFactory::with_adapters(AdvisorAdapterRegistry::global())
    }

    pub fn with_adapters(adapters: Arc<AdvisorAdapterRegistry>) -> Self {
        CachingAdvisorChainFactory {
            inner: DefaultAdvisorChainFactory::with_adapters(adapters),
            cache: Mutex::new(ChainCache {
                generation: 0,
                chains: FxHashMap::default(),
            }),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> ChainCacheStats {
        ChainCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached: self
                .cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .chains
                .len(),
        }
    }
}

impl Default for CachingAdvisorChainFactory {
    fn default() -> Self {
        CachingAdvisorChainFactory::new()
    }
}

impl AdvisorChainFactory for CachingAdvisorChainFactory {
    fn interceptors(
        &self,
        advisors: &[Arc<Advisor>],
        method: &Method,
        target_class: Option<&Class>,
    ) -> Result<InterceptorChain> {
        let key = (method.id(), target_class.map(Class::id));
        let generation = {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(chain) = cache.chains.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(chain.clone());
            }
            cache.generation
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let chain = self.inner.interceptors(advisors, method, target_class)?;

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.generation == generation {
            cache.chains.insert(key, chain.clone());
        }
        Ok(chain)
    }

    fn advice_changed(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.generation += 1;
        if !cache.chains.is_empty() {
            debug!("advice changed; dropping {} cached chains", cache.chains.len());
            cache.chains.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aop::advice::Advice;
    use crate::aop::pointcut::{ArgumentMatcher, Pointcut, any_method};
    use crate::runtime::{ClassBuilder, MethodBuilder, Value, ValueKind};

    fn sample_method() -> (Class, Method) {
        let mut c = ClassBuilder::new("ChainSample", None);
        c.method(
            MethodBuilder::new("get_total")
                .returns(ValueKind::I32)
                .body(|_, _, _| Ok(Value::I32(1))),
        );
        let class = c.register().unwrap();
        let method = class.method_named("get_total").unwrap();
        (class, method)
    }

    #[test]
    fn test_empty_chain_is_shared() {
        let a = InterceptorChain::new(Vec::new());
        let b = InterceptorChain::empty();
        assert!(a.is_empty());
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_default_factory_filters_by_pointcut() {
        let (class, method) = sample_method();
        let advisors = vec![
            Arc::new(Advisor::new(Advice::around(|inv| inv.proceed()))),
            Arc::new(Advisor::with_pointcut(
                Pointcut::names(["set*"]),
                Advice::around(|inv| inv.proceed()),
            )),
            Arc::new(Advisor::with_pointcut(
                Pointcut::methods(ArgumentMatcher::new(any_method(), |_: &[Value]| true)),
                Advice::before(|_, _, _| Ok(())),
            )),
        ];
        let chain = DefaultAdvisorChainFactory::new()
            .interceptors(&advisors, &method, Some(&class))
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert!(matches!(chain.get(0), Some(ChainEntry::Static(_))));
        assert!(matches!(chain.get(1), Some(ChainEntry::Dynamic { .. })));
    }

    #[test]
    fn test_caching_factory_invalidates_on_change() {
        let (class, method) = sample_method();
        let advisors = vec![Arc::new(Advisor::new(Advice::around(|inv| inv.proceed())))];
        let factory = CachingAdvisorChainFactory::new();

        let first = factory.interceptors(&advisors, &method, Some(&class)).unwrap();
        let second = factory.interceptors(&advisors, &method, Some(&class)).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(factory.stats().hits, 1);

        factory.advice_changed();
        assert_eq!(factory.stats().cached, 0);
        let third = factory.interceptors(&advisors, &method, Some(&class)).unwrap();
        assert!(!third.ptr_eq(&first));
        assert_eq!(factory.stats().misses, 2);
    }
}
