//! Aspect-oriented building blocks: advice, pointcuts, advisors, interceptor
//! chains, the invocation engine, target sources and proxy configuration.

pub mod adapter;
pub mod advice;
pub mod advised;
pub mod advisor;
pub mod chain;
pub mod context;
pub mod invocation;
pub mod pointcut;
pub mod target;

pub use adapter::{AdvisorAdapter, AdvisorAdapterRegistry};
pub use advice::{
    Advice, AfterReturningAdvice, BeforeAdvice, MethodInterceptor, ThrowsAdvice, TraceInterceptor,
};
pub use advised::{
    AdvisedSupport, ProxyConfig, advised_protocol, aop_proxy_protocol, target_aware_protocol,
};
pub use advisor::{Advisor, IntroductionAdvisor};
pub use chain::{
    AdvisorChainFactory, CachingAdvisorChainFactory, ChainCacheStats, ChainEntry,
    DefaultAdvisorChainFactory, InterceptorChain,
};
pub use context::{AopContext, ProxyScope};
pub use invocation::{InvocationMode, MethodInvocation};
pub use pointcut::{MethodMatcher, Pointcut, TypeFilter};
pub use target::{
    EmptyTargetSource, HotSwappableTargetSource, PoolStats, PooledTargetSource,
    PrototypeTargetSource, SingletonTargetSource, TargetSource,
};
