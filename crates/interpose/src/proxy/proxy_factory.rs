//! Programmatic entry point: a configuration plus a factory.

use crate::aop::{AdvisedSupport, TargetSource};
use crate::error::Result;
use crate::proxy::cache::ProxyTypeCache;
use crate::proxy::factory::{AopProxy, DefaultAopProxyFactory, DuplicateAdvisorPolicy};
use crate::runtime::{Object, Protocol, Value};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Configures and creates proxies.
///
/// Dereferences to its [`AdvisedSupport`], so advisors, introductions and
/// flags are edited directly on the factory. Proxies created from it share
/// that configuration: advice changes apply to them immediately.
///
/// # Example
///
/// ```
/// use interpose::{Advice, ClassBuilder, MethodBuilder, Object, ProxyFactory, Value, ValueKind};
///
/// let mut c = ClassBuilder::new("Greeter", None);
/// c.method(
///     MethodBuilder::new("greet")
///         .returns(ValueKind::Str)
///         .overridable()
///         .body(|_, _, _| Ok(Value::from("hello"))),
/// );
/// let greeter = c.register().unwrap();
///
/// let factory = ProxyFactory::with_target(Object::new(&greeter).unwrap());
/// factory.add_advice(Advice::around(|inv| {
///     let text = inv.proceed()?;
///     Ok(Value::from(format!("{}!", text.as_str()?)))
/// })).unwrap();
///
/// let proxy = factory.get_proxy().unwrap();
/// assert_eq!(proxy.invoke("greet", &mut []).unwrap(), Value::from("hello!"));
/// ```
pub struct ProxyFactory {
    advised: Arc<AdvisedSupport>,
    factory: DefaultAopProxyFactory,
}

impl ProxyFactory {
    /// An empty configuration.
    pub fn new() -> Self {
        ProxyFactory::from_advised(Arc::new(AdvisedSupport::new()))
    }

    /// Proxies `target` with every protocol its class conforms to.
    pub fn with_target(target: Object) -> Self {
        let protocols = target.class().all_protocols();
        let advised = AdvisedSupport::with_target(target);
        advised.set_protocols(&protocols);
        ProxyFactory::from_advised(Arc::new(advised))
    }

    /// Proxies `protocols` without a target; advice must produce results.
    pub fn with_protocols(protocols: &[Protocol]) -> Self {
        let advised = AdvisedSupport::new();
        advised.set_protocols(protocols);
        ProxyFactory::from_advised(Arc::new(advised))
    }

    pub fn with_target_source(source: Arc<dyn TargetSource>) -> Self {
        ProxyFactory::from_advised(Arc::new(AdvisedSupport::with_target_source(source)))
    }

    pub fn from_advised(advised: Arc<AdvisedSupport>) -> Self {
        ProxyFactory {
            advised,
            factory: DefaultAopProxyFactory::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: DuplicateAdvisorPolicy) -> Self {
        self.factory = self.factory.with_policy(policy);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ProxyTypeCache>) -> Self {
        self.factory = self.factory.with_cache(cache);
        self
    }

    pub fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    /// # Errors
    ///
    /// See [`DefaultAopProxyFactory::create_aop_proxy`].
    pub fn create_aop_proxy(&self) -> Result<AopProxy> {
        self.factory.create_aop_proxy(&self.advised)
    }

    pub fn get_proxy(&self) -> Result<Object> {
        self.create_aop_proxy()?.get_proxy()
    }

    /// Passes `args` to the inherited constructor (inheritance strategy).
    pub fn get_proxy_with_args(&self, args: &[Value]) -> Result<Object> {
        self.create_aop_proxy()?.get_proxy_with_args(args)
    }
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for ProxyFactory {
    type Target = AdvisedSupport;

    fn deref(&self) -> &AdvisedSupport {
        &self.advised
    }
}

impl fmt::Debug for ProxyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyFactory")
            .field("advised", &self.advised)
            .field("policy", &self.factory.policy())
            .finish()
    }
}
