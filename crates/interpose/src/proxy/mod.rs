//! Proxy synthesis.
//!
//! # Architecture
//!
//! ```text
//! ProxyFactory / DefaultAopProxyFactory
//!     -> validate, drop duplicate advisors, pick a ProxyStrategy
//!     -> ProxyTypeCache::get_or_build(ProxyTypeKey)
//!         -> type_builder: one proxy class per key, one dispatch closure
//!            per intercepted method, slots bound after registration
//!     -> GeneratedProxyType::instantiate(advised)
//! ```
//!
//! Every intercepted method of a generated class runs the same algorithm
//! (see [`method_builder`]): resolve its slot, optionally expose the proxy,
//! obtain the delegation target, build the interceptor chain, then either
//! call the target directly (empty chain) or run a
//! [`crate::aop::MethodInvocation`].

pub mod cache;
pub mod factory;
pub(crate) mod marshal;
pub(crate) mod method_builder;
pub mod proxy_factory;
pub(crate) mod registry;
pub mod serialization;
pub(crate) mod state;
pub(crate) mod type_builder;

pub use cache::{GeneratedProxyType, ProtocolSource, ProxyTypeCache, ProxyTypeKey};
pub use factory::{AopProxy, DefaultAopProxyFactory, DuplicateAdvisorPolicy};
pub use proxy_factory::ProxyFactory;
pub use serialization::{deserialize_proxy, deserialize_proxy_with};

use crate::aop::AdvisedSupport;
use crate::error::Result;
use crate::runtime::Object;
use state::ProxyState;
use std::fmt;
use std::sync::Arc;

/// How a proxy class relates to the target class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyStrategy {
    /// Implements the proxied protocols and forwards to a target fetched
    /// from the target source on every call.
    Composition,
    /// Extends the target class and intercepts the proxied protocols,
    /// running the inherited implementations on the proxy itself.
    Decorator,
    /// Extends the target class and intercepts every overridable method.
    Inheritance,
}

impl ProxyStrategy {
    pub fn name(self) -> &'static str {
        match self {
            ProxyStrategy::Composition => "composition",
            ProxyStrategy::Decorator => "decorator",
            ProxyStrategy::Inheritance => "inheritance",
        }
    }

    /// True if the proxy class derives from the target class.
    pub fn extends_target(self) -> bool {
        !matches!(self, ProxyStrategy::Composition)
    }

    pub(crate) fn type_prefix(self) -> &'static str {
        match self {
            ProxyStrategy::Composition => "CompositionAopProxy",
            ProxyStrategy::Decorator => "DecoratorAopProxy",
            ProxyStrategy::Inheritance => "InheritanceAopProxy",
        }
    }
}

impl fmt::Display for ProxyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The configuration behind a proxy.
///
/// # Errors
///
/// Returns [`crate::Error::NotAProxy`] for ordinary objects.
pub fn advised_of(proxy: &Object) -> Result<Arc<AdvisedSupport>> {
    Ok(Arc::clone(ProxyState::of(proxy)?.advised()))
}

/// The strategy a proxy was built with.
pub fn strategy_of(proxy: &Object) -> Result<ProxyStrategy> {
    Ok(ProxyState::of(proxy)?.strategy())
}
