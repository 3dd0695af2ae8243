//! Adapting advice into interceptors.
//!
//! The invocation engine only knows [`MethodInterceptor`]. An
//! [`AdvisorAdapterRegistry`] turns every other advice kind into one: before,
//! after-returning and throws advice have built-in adapters, and custom advice
//! is handled by adapters registered at runtime.

use crate::aop::advice::{
    AfterReturningAdvice, Advice, BeforeAdvice, MethodInterceptor, ThrowsAdvice,
};
use crate::aop::invocation::MethodInvocation;
use crate::error::{Error, Result};
use crate::runtime::Value;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// Turns one family of advice into interceptors.
pub trait AdvisorAdapter: Send + Sync {
    fn supports(&self, advice: &Advice) -> bool;

    /// Interceptor for `advice`, or `None` if this adapter does not support it.
    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>>;
}

/// Runs before advice, then proceeds.
pub struct BeforeAdviceInterceptor(Arc<dyn BeforeAdvice>);

impl MethodInterceptor for BeforeAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> Result<Value> {
        let method = invocation.method().clone();
        let target = invocation.target().cloned();
        self.0.before(&method, invocation.arguments_mut(), target.as_ref())?;
        invocation.proceed()
    }
}

/// Proceeds, then runs after-returning advice on success.
pub struct AfterReturningAdviceInterceptor(Arc<dyn AfterReturningAdvice>);

impl MethodInterceptor for AfterReturningAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> Result<Value> {
        let returned = invocation.proceed()?;
        self.0.after_returning(
            &returned,
            invocation.method(),
            invocation.arguments(),
            invocation.target(),
        )?;
        Ok(returned)
    }
}

/// Proceeds and, on failure, lets throws advice observe the error before it
/// is re-raised unchanged.
pub struct ThrowsAdviceInterceptor(Arc<dyn ThrowsAdvice>);

impl MethodInterceptor for ThrowsAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> Result<Value> {
        match invocation.proceed() {
            Ok(value) => Ok(value),
            Err(error) => {
                self.0.after_throwing(
                    &error,
                    invocation.method(),
                    invocation.arguments(),
                    invocation.target(),
                )?;
                Err(error)
            }
        }
    }
}

struct BeforeAdviceAdapter;

impl AdvisorAdapter for BeforeAdviceAdapter {
    fn supports(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Before(_))
    }

    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::Before(before) => Some(Arc::new(BeforeAdviceInterceptor(Arc::clone(before)))),
            _ => None,
        }
    }
}

struct AfterReturningAdviceAdapter;

impl AdvisorAdapter for AfterReturningAdviceAdapter {
    fn supports(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterReturning(_))
    }

    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::AfterReturning(after) => {
                Some(Arc::new(AfterReturningAdviceInterceptor(Arc::clone(after))))
            }
            _ => None,
        }
    }
}

struct ThrowsAdviceAdapter;

impl AdvisorAdapter for ThrowsAdviceAdapter {
    fn supports(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Throws(_))
    }

    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::Throws(throws) => Some(Arc::new(ThrowsAdviceInterceptor(Arc::clone(throws)))),
            _ => None,
        }
    }
}

/// Registry of advice adapters.
///
/// Interceptor advice passes through untouched. Other advice goes to the
/// first adapter that supports it, built-in adapters first.
pub struct AdvisorAdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn AdvisorAdapter>>>,
}

static GLOBAL_ADAPTERS: LazyLock<Arc<AdvisorAdapterRegistry>> =
    LazyLock::new(|| Arc::new(AdvisorAdapterRegistry::new()));

impl AdvisorAdapterRegistry {
    /// A registry holding only the built-in adapters.
    pub fn new() -> Self {
        let builtin: Vec<Arc<dyn AdvisorAdapter>> = vec![
            Arc::new(BeforeAdviceAdapter),
            Arc::new(AfterReturningAdviceAdapter),
            Arc::new(ThrowsAdviceAdapter),
        ];
        AdvisorAdapterRegistry {
            adapters: RwLock::new(builtin),
        }
    }

    /// The process-wide registry used by default chain factories.
    pub fn global() -> Arc<AdvisorAdapterRegistry> {
        Arc::clone(&GLOBAL_ADAPTERS)
    }

    pub fn register_adapter(&self, adapter: Arc<dyn AdvisorAdapter>) {
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(adapter);
    }

    pub fn supports(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Interceptor(_))
            || self
                .adapters
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|a| a.supports(advice))
    }

    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAdvice`] if no adapter supports `advice`.
    pub fn interceptor(&self, advice: &Advice) -> Result<Arc<dyn MethodInterceptor>> {
        if let Advice::Interceptor(interceptor) = advice {
            return Ok(Arc::clone(interceptor));
        }
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| a.supports(advice))
            .find_map(|a| a.interceptor(advice))
            .ok_or_else(|| Error::UnsupportedAdvice {
                kind: advice.kind().to_string(),
            })
    }
}

impl Default for AdvisorAdapterRegistry {
    fn default() -> Self {
        AdvisorAdapterRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    struct MarkerAdapter;

    impl AdvisorAdapter for MarkerAdapter {
        fn supports(&self, advice: &Advice) -> bool {
            matches!(advice, Advice::Custom(c) if c.is::<Marker>())
        }

        fn interceptor(&self, _advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
            let passthrough = |inv: &mut MethodInvocation| inv.proceed();
            Some(Arc::new(passthrough))
        }
    }

    #[test]
    fn test_builtin_adapters() {
        let registry = AdvisorAdapterRegistry::new();
        assert!(registry.supports(&Advice::around(|inv| inv.proceed())));
        assert!(registry.supports(&Advice::before(|_, _, _| Ok(()))));
        assert!(registry.supports(&Advice::throws(|_, _, _, _| Ok(()))));
        assert!(registry.interceptor(&Advice::after_returning(|_, _, _, _| Ok(()))).is_ok());
    }

    #[test]
    fn test_custom_advice_needs_registered_adapter() {
        let registry = AdvisorAdapterRegistry::new();
        let custom = Advice::custom(Marker);
        assert!(!registry.supports(&custom));
        assert!(matches!(
            registry.interceptor(&custom),
            Err(Error::UnsupportedAdvice { .. })
        ));

        registry.register_adapter(Arc::new(MarkerAdapter));
        assert!(registry.supports(&custom));
        assert!(registry.interceptor(&custom).is_ok());
        assert!(!registry.supports(&Advice::custom(7u32)));
    }
}
