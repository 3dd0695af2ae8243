//! Advice: the behavior woven around proxied calls.
//!
//! The engine only runs [`MethodInterceptor`]s. Other advice kinds are turned
//! into interceptors by the adapter registry (see [`crate::aop::adapter`]).

use crate::aop::invocation::MethodInvocation;
use crate::error::{Error, Result};
use crate::runtime::{Method, Object, Value};
use interpose_log::{Level, log};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Wraps a call. Implementations continue the chain with
/// [`MethodInvocation::proceed`], or return without proceeding to
/// short-circuit it.
pub trait MethodInterceptor: Send + Sync {
    fn invoke(&self, invocation: &mut MethodInvocation) -> Result<Value>;
}

impl<F> MethodInterceptor for F
where
    F: Fn(&mut MethodInvocation) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, invocation: &mut MethodInvocation) -> Result<Value> {
        self(invocation)
    }
}

/// Runs before the call. May rewrite the arguments or fail the call.
pub trait BeforeAdvice: Send + Sync {
    fn before(&self, method: &Method, args: &mut [Value], target: Option<&Object>) -> Result<()>;
}

impl<F> BeforeAdvice for F
where
    F: Fn(&Method, &mut [Value], Option<&Object>) -> Result<()> + Send + Sync,
{
    fn before(&self, method: &Method, args: &mut [Value], target: Option<&Object>) -> Result<()> {
        self(method, args, target)
    }
}

/// Runs after the call returns normally.
pub trait AfterReturningAdvice: Send + Sync {
    fn after_returning(
        &self,
        returned: &Value,
        method: &Method,
        args: &[Value],
        target: Option<&Object>,
    ) -> Result<()>;
}

impl<F> AfterReturningAdvice for F
where
    F: Fn(&Value, &Method, &[Value], Option<&Object>) -> Result<()> + Send + Sync,
{
    fn after_returning(
        &self,
        returned: &Value,
        method: &Method,
        args: &[Value],
        target: Option<&Object>,
    ) -> Result<()> {
        self(returned, method, args, target)
    }
}

/// Observes a failed call. The original error is re-raised afterwards
/// unless the advice itself fails.
pub trait ThrowsAdvice: Send + Sync {
    fn after_throwing(
        &self,
        error: &Error,
        method: &Method,
        args: &[Value],
        target: Option<&Object>,
    ) -> Result<()>;
}

impl<F> ThrowsAdvice for F
where
    F: Fn(&Error, &Method, &[Value], Option<&Object>) -> Result<()> + Send + Sync,
{
    fn after_throwing(
        &self,
        error: &Error,
        method: &Method,
        args: &[Value],
        target: Option<&Object>,
    ) -> Result<()> {
        self(error, method, args, target)
    }
}

/// A unit of cross-cutting behavior.
#[derive(Clone)]
pub enum Advice {
    Interceptor(Arc<dyn MethodInterceptor>),
    Before(Arc<dyn BeforeAdvice>),
    AfterReturning(Arc<dyn AfterReturningAdvice>),
    Throws(Arc<dyn ThrowsAdvice>),
    /// Advice only a registered custom adapter understands.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Advice {
    /// Around advice from a closure.
    ///
    /// ```
    /// use interpose::Advice;
    ///
    /// let passthrough = Advice::around(|inv| inv.proceed());
    /// assert_eq!(passthrough.kind(), "interceptor");
    /// ```
    pub fn around<F>(f: F) -> Self
    where
        F: Fn(&mut MethodInvocation) -> Result<Value> + Send + Sync + 'static,
    {
        Advice::Interceptor(Arc::new(f))
    }

    pub fn interceptor<I: MethodInterceptor + 'static>(interceptor: I) -> Self {
        Advice::Interceptor(Arc::new(interceptor))
    }

    pub fn before<F>(f: F) -> Self
    where
        F: Fn(&Method, &mut [Value], Option<&Object>) -> Result<()> + Send + Sync + 'static,
    {
        Advice::Before(Arc::new(f))
    }

    pub fn after_returning<F>(f: F) -> Self
    where
        F: Fn(&Value, &Method, &[Value], Option<&Object>) -> Result<()> + Send + Sync + 'static,
    {
        Advice::AfterReturning(Arc::new(f))
    }

    pub fn throws<F>(f: F) -> Self
    where
        F: Fn(&Error, &Method, &[Value], Option<&Object>) -> Result<()> + Send + Sync + 'static,
    {
        Advice::Throws(Arc::new(f))
    }

    pub fn custom<T: Any + Send + Sync>(advice: T) -> Self {
        Advice::Custom(Arc::new(advice))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Advice::Interceptor(_) => "interceptor",
            Advice::Before(_) => "before",
            Advice::AfterReturning(_) => "after-returning",
            Advice::Throws(_) => "throws",
            Advice::Custom(_) => "custom",
        }
    }

    /// True if both values share the same advice instance.
    pub fn ptr_eq(&self, other: &Advice) -> bool {
        match (self, other) {
            (Advice::Interceptor(a), Advice::Interceptor(b)) => Arc::ptr_eq(a, b),
            (Advice::Before(a), Advice::Before(b)) => Arc::ptr_eq(a, b),
            (Advice::AfterReturning(a), Advice::AfterReturning(b)) => Arc::ptr_eq(a, b),
            (Advice::Throws(a), Advice::Throws(b)) => Arc::ptr_eq(a, b),
            (Advice::Custom(a), Advice::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Advice::{}", self.kind())
    }
}

/// Logs every call it wraps: entry, then the result or the error.
#[derive(Debug, Clone, Copy)]
pub struct TraceInterceptor {
    level: Level,
}

impl TraceInterceptor {
    pub fn new(level: Level) -> Self {
        TraceInterceptor { level }
    }
}

impl Default for TraceInterceptor {
    fn default() -> Self {
        TraceInterceptor::new(Level::Trace)
    }
}

impl MethodInterceptor for TraceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> Result<Value> {
        let method = invocation.method().to_string();
        log!(level: self.level, "enter {} args={:?}", method, invocation.arguments());
        let result = invocation.proceed();
        match &result {
            Ok(value) => log!(level: self.level, "exit {} -> {:?}", method, value),
            Err(e) => log!(level: self.level, "exit {} failed: {}", method, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advice_identity() {
        let a = Advice::around(|inv| inv.proceed());
        let b = a.clone();
        let c = Advice::around(|inv| inv.proceed());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert!(!a.ptr_eq(&Advice::before(|_, _, _| Ok(()))));
    }

    #[test]
    fn test_advice_kinds() {
        assert_eq!(Advice::before(|_, _, _| Ok(())).kind(), "before");
        assert_eq!(Advice::after_returning(|_, _, _, _| Ok(())).kind(), "after-returning");
        assert_eq!(Advice::throws(|_, _, _, _| Ok(())).kind(), "throws");
        assert_eq!(Advice::custom(42u8).kind(), "custom");
        assert_eq!(Advice::interceptor(TraceInterceptor::default()).kind(), "interceptor");
    }
}
