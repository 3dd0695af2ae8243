//! `interpose`: dynamic AOP proxies for a reflective object model
//!
//! `interpose` generates proxy classes at runtime that route method calls
//! through ordered chains of interceptors before reaching the real target.
//! It provides:
//!
//! - **Advice and pointcuts**: around, before, after-returning and throws
//!   advice, selected per method by type filters and method matchers
//! - **Three proxy strategies**: composition (implement the protocols),
//!   decorator (extend the target class and wrap an existing target) and
//!   inheritance (extend the target class and intercept every overridable
//!   member)
//! - **Introductions**: extra protocols implemented by delegate objects
//! - **Target sources**: singleton, prototype, pooled and hot-swappable
//!   targets
//! - **A type cache**: one generated class per configuration shape
//!
//! # Architecture
//!
//! - [`runtime`]: the object model (classes, protocols, methods, values)
//! - [`aop`]: advice, advisors, interceptor chains, the invocation engine,
//!   target sources and the live configuration
//! - [`proxy`]: proxy type synthesis, the type cache and the factories
//!
//! # Example
//!
//! ```rust
//! use interpose::{
//!     Advice, ClassBuilder, MethodBuilder, Object, ProtocolBuilder, ProxyFactory, Value,
//!     ValueKind,
//! };
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let mut p = ProtocolBuilder::new("Adder");
//! p.method(
//!     MethodBuilder::new("add")
//!         .param("a", ValueKind::I32)
//!         .param("b", ValueKind::I32)
//!         .returns(ValueKind::I32),
//! );
//! let adder = p.register().unwrap();
//!
//! let mut c = ClassBuilder::new("AdderImpl", None);
//! c.adopt(&adder).method(
//!     MethodBuilder::new("add")
//!         .param("a", ValueKind::I32)
//!         .param("b", ValueKind::I32)
//!         .returns(ValueKind::I32)
//!         .body(|_, args, _| Ok(Value::I32(args[0].as_i32()? + args[1].as_i32()?))),
//! );
//! let class = c.register().unwrap();
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&calls);
//! let factory = ProxyFactory::with_target(Object::new(&class).unwrap());
//! factory
//!     .add_advice(Advice::before(move |_, _, _| {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! let proxy = factory.get_proxy().unwrap();
//! let sum = proxy.invoke_protocol(&adder, "add", &mut [Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(sum, Value::I32(5));
//! assert_eq!(calls.load(Ordering::Relaxed), 1);
//! ```

pub mod aop;
pub mod error;
pub mod proxy;
pub mod runtime;

// Re-export commonly used types
pub use aop::{
    Advice, AdvisedSupport, Advisor, AopContext, IntroductionAdvisor, MethodInterceptor,
    MethodInvocation, Pointcut, ProxyConfig, TargetSource,
};
pub use error::{Error, Fault, Result};
pub use proxy::{AopProxy, DefaultAopProxyFactory, ProxyFactory, ProxyStrategy};
pub use runtime::{
    Class, ClassBuilder, Method, MethodBuilder, Object, Protocol, ProtocolBuilder, Selector,
    Value, ValueKind,
};
