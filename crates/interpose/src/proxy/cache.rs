//! Process-wide cache of generated proxy types.
//!
//! Two configurations that need the same class shape share one generated
//! type. The key captures everything the shape depends on: the strategy,
//! the base and target classes, the proxied protocols with their sources
//! and the flags that change emitted members or attributes. Advisors are
//! not part of the key; they are read from the configuration on each call.

use crate::aop::AdvisedSupport;
use crate::error::Result;
use crate::proxy::ProxyStrategy;
use crate::proxy::registry::MethodRegistry;
use crate::runtime::{Class, Method, Object, Protocol, Value};
use fxhash::FxHashMap;
use interpose_log::debug;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// Who implements a proxied protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolSource {
    /// The target (or, for extension strategies, the inherited class).
    Target,
    /// The introduction delegate at this index.
    Introduction(usize),
}

/// Identity of a generated proxy type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyTypeKey {
    pub strategy: ProxyStrategy,
    /// The class the proxy class derives from.
    pub base: Class,
    /// The target class, when known.
    pub target: Option<Class>,
    /// Proxied protocols, closed over their bases, ordered by id.
    pub protocols: Vec<(Protocol, ProtocolSource)>,
    pub copy_attributes: bool,
    pub serializable: bool,
    pub declared_members_only: bool,
}

impl ProxyTypeKey {
    /// Stable name of the generated class.
    pub(crate) fn type_name(&self) -> String {
        let hash = fxhash::hash64(self);
        match (&self.target, self.strategy) {
            (Some(target), ProxyStrategy::Decorator | ProxyStrategy::Inheritance) => {
                format!("{}_{}_{hash:016x}", self.strategy.type_prefix(), target.name())
            }
            _ => format!("{}_{hash:016x}", self.strategy.type_prefix()),
        }
    }
}

/// A generated proxy class and the slot table its members dispatch through.
pub struct GeneratedProxyType {
    key: Arc<ProxyTypeKey>,
    class: Class,
    registry: Arc<MethodRegistry>,
}

impl GeneratedProxyType {
    pub(crate) fn new(key: Arc<ProxyTypeKey>, class: Class, registry: Arc<MethodRegistry>) -> Self {
        GeneratedProxyType {
            key,
            class,
            registry,
        }
    }

    pub fn key(&self) -> &ProxyTypeKey {
        &self.key
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn strategy(&self) -> ProxyStrategy {
        self.key.strategy
    }

    /// Number of intercepted members.
    pub fn intercepted_count(&self) -> usize {
        self.registry.len()
    }

    /// Methods the proxy's advisors are matched against.
    pub fn intercepted_methods(&self) -> Vec<Method> {
        self.registry.advised_methods().cloned().collect()
    }

    /// Creates a proxy instance backed by `advised`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration no longer fits the type, or with whatever
    /// the target source or a target-aware introduction returns.
    pub fn instantiate(&self, advised: &Arc<AdvisedSupport>) -> Result<Object> {
        self.instantiate_with(advised, &[])
    }

    /// Like [`GeneratedProxyType::instantiate`], passing `args` to the
    /// inherited constructor that accepts them.
    pub fn instantiate_with(&self, advised: &Arc<AdvisedSupport>, args: &[Value]) -> Result<Object> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.extend_from_slice(args);
        let advised: Arc<dyn Any + Send + Sync> = advised.clone();
        full.push(Value::Any(advised));
        Object::with_args(&self.class, &full)
    }
}

impl fmt::Debug for GeneratedProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedProxyType")
            .field("class", &self.class.name())
            .field("strategy", &self.key.strategy)
            .field("intercepted", &self.registry.len())
            .finish()
    }
}

static GLOBAL_CACHE: LazyLock<Arc<ProxyTypeCache>> =
    LazyLock::new(|| Arc::new(ProxyTypeCache::new()));

/// Generated types by key. Builds run under the cache lock, so each key is
/// built at most once.
pub struct ProxyTypeCache {
    types: Mutex<FxHashMap<ProxyTypeKey, Arc<GeneratedProxyType>>>,
    builds: AtomicUsize,
    hits: AtomicUsize,
}

impl ProxyTypeCache {
    pub fn new() -> Self {
        ProxyTypeCache {
            types: Mutex::new(FxHashMap::default()),
            builds: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        }
    }

    /// The cache shared by every factory that is not given its own.
    pub fn global() -> Arc<ProxyTypeCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Returns the type for `key`, building it with `build` on a miss.
    ///
    /// A failed build leaves nothing behind.
    pub fn get_or_build<F>(&self, key: ProxyTypeKey, build: F) -> Result<Arc<GeneratedProxyType>>
    where
        F: FnOnce(Arc<ProxyTypeKey>) -> Result<GeneratedProxyType>,
    {
        let mut types = self.types.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = types.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(found));
        }
        let generated = Arc::new(build(Arc::new(key.clone()))?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!(
            "generated proxy type {} ({} intercepted members)",
            generated.class().name(),
            generated.intercepted_count()
        );
        types.insert(key, Arc::clone(&generated));
        Ok(generated)
    }

    pub fn get(&self, key: &ProxyTypeKey) -> Option<Arc<GeneratedProxyType>> {
        self.types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.types.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every type. Existing proxies keep working.
    pub fn clear(&self) {
        self.types.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of types built so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

impl Default for ProxyTypeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProxyTypeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTypeCache")
            .field("types", &self.len())
            .field("builds", &self.build_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn key() -> ProxyTypeKey {
        ProxyTypeKey {
            strategy: ProxyStrategy::Composition,
            base: Class::object(),
            target: None,
            protocols: Vec::new(),
            copy_attributes: true,
            serializable: false,
            declared_members_only: false,
        }
    }

    #[test]
    fn test_build_runs_once_per_key() {
        let cache = ProxyTypeCache::new();
        let build = |key: Arc<ProxyTypeKey>| {
            Ok(GeneratedProxyType::new(key, Class::object(), Arc::new(MethodRegistry::new())))
        };
        let a = cache.get_or_build(key(), build).unwrap();
        let b = cache.get_or_build(key(), build).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.build_count(), 1);
        assert_eq!(cache.hit_count(), 1);

        let other = ProxyTypeKey {
            serializable: true,
            ..key()
        };
        cache.get_or_build(other, build).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache = ProxyTypeCache::new();
        let result = cache.get_or_build(key(), |_| Err(Error::NoAdvisorsOrTarget));
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.build_count(), 0);
    }

    #[test]
    fn test_type_name_is_stable_for_equal_keys() {
        assert_eq!(key().type_name(), key().type_name());
        assert!(key().type_name().starts_with("CompositionAopProxy_"));
    }
}
