//! One in-flight call through an interceptor chain.
//!
//! # Proceed
//!
//! A [`MethodInvocation`] holds the call's arguments, its target and the
//! chain, plus a position into the chain. [`MethodInvocation::proceed`]
//! runs the interceptor at the current position, which usually calls
//! `proceed` again; at the end of the chain the target method runs once.
//!
//! ```text
//! proceed(0) -> A.invoke -> proceed(1) -> B.invoke -> proceed(2) -> target
//!            <-          <-            <-          <-            <-
//! ```
//!
//! The position is restored when `proceed` returns, so an interceptor that
//! proceeds twice replays the rest of the chain. Errors from interceptors or
//! the target propagate unchanged.

use crate::aop::chain::{ChainEntry, InterceptorChain};
use crate::error::{Error, Result};
use crate::proxy::marshal;
use crate::runtime::{Class, Method, Object, Value};
use interpose_log::trace;
use std::fmt;

/// How the end of a chain calls the target method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InvocationMode {
    /// Validate the receiver and arguments, then call.
    #[default]
    Reflective,
    /// Resolve and call the body directly. Argument kinds are still
    /// checked, so an interceptor that rewrites an argument badly fails the
    /// same way in both modes.
    Direct,
}

/// Execution context of one call.
pub struct MethodInvocation {
    proxy: Object,
    target: Option<Object>,
    target_class: Option<Class>,
    method: Method,
    joinpoint: Method,
    proxy_method: Option<Method>,
    arguments: Vec<Value>,
    interceptors: InterceptorChain,
    position: usize,
    mode: InvocationMode,
}

impl MethodInvocation {
    /// Starts an invocation of `method` on `target`.
    pub fn new(
        proxy: Object,
        target: Option<Object>,
        method: Method,
        arguments: Vec<Value>,
        interceptors: InterceptorChain,
    ) -> Self {
        MethodInvocation {
            proxy,
            target,
            target_class: None,
            joinpoint: method.clone(),
            method,
            proxy_method: None,
            arguments,
            interceptors,
            position: 0,
            mode: InvocationMode::default(),
        }
    }

    #[must_use]
    pub fn with_target_class(mut self, class: Option<Class>) -> Self {
        self.target_class = class;
        self
    }

    #[must_use]
    pub fn with_proxy_method(mut self, method: Option<Method>) -> Self {
        self.proxy_method = method;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: InvocationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Runs `joinpoint` at the end of the chain instead of the advised
    /// method, as base-class proxies do to avoid re-entering themselves.
    #[must_use]
    pub(crate) fn with_joinpoint(mut self, joinpoint: Method) -> Self {
        self.joinpoint = joinpoint;
        self
    }

    pub fn proxy(&self) -> &Object {
        &self.proxy
    }

    /// The object the call ends on; `None` for target-less configurations.
    pub fn target(&self) -> Option<&Object> {
        self.target.as_ref()
    }

    pub fn target_class(&self) -> Option<&Class> {
        self.target_class.as_ref()
    }

    /// The advised method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The method as declared on the proxy class, when it has one.
    pub fn proxy_method(&self) -> Option<&Method> {
        self.proxy_method.as_ref()
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut [Value] {
        &mut self.arguments
    }

    /// Replaces one argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index` is past the last argument.
    pub fn set_argument(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let len = self.arguments.len();
        let slot = self
            .arguments
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        *slot = value.into();
        Ok(())
    }

    /// Number of chain entries already entered.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    pub fn mode(&self) -> InvocationMode {
        self.mode
    }

    pub fn into_arguments(self) -> Vec<Value> {
        self.arguments
    }

    /// Runs the next interceptor, or the target method at the end of the
    /// chain.
    ///
    /// # Errors
    ///
    /// Whatever the next stage returns, unchanged. At the end of the chain,
    /// [`Error::NullTarget`] if there is no target.
    pub fn proceed(&mut self) -> Result<Value> {
        let Some(entry) = self.interceptors.get(self.position).cloned() else {
            return self.invoke_joinpoint();
        };
        self.position += 1;
        let result = match &entry {
            ChainEntry::Static(interceptor) => interceptor.invoke(self),
            ChainEntry::Dynamic {
                matcher,
                interceptor,
            } => {
                if matcher.matches_with_args(&self.method, self.target_class.as_ref(), &self.arguments)
                {
                    interceptor.invoke(self)
                } else {
                    self.proceed()
                }
            }
        };
        self.position -= 1;
        result
    }

    fn invoke_joinpoint(&mut self) -> Result<Value> {
        trace!("joinpoint {} mode={:?}", self.joinpoint, self.mode);
        let Some(target) = &self.target else {
            return Err(Error::NullTarget {
                method: self.method.name().to_string(),
            });
        };
        let params = self.method.params();
        let changed = marshal::unbox_for_target(params, &mut self.arguments);
        let result = match self.mode {
            InvocationMode::Reflective => self.joinpoint.invoke(Some(target), &mut self.arguments),
            InvocationMode::Direct => self
                .joinpoint
                .check_arguments(&self.arguments)
                .and_then(|()| self.joinpoint.call(target, &mut self.arguments)),
        };
        let reboxed = marshal::rebox_after_target(params, &mut self.arguments, &changed);
        let value = result?;
        reboxed?;
        Ok(value)
    }
}

impl fmt::Debug for MethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("method", &format_args!("{}", self.method))
            .field("position", &self.position)
            .field("interceptors", &self.interceptors.len())
            .field("arguments", &self.arguments)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aop::advice::MethodInterceptor;
    use crate::runtime::{ClassBuilder, MethodBuilder, ValueKind};
    use std::sync::{Arc, Mutex};

    fn adder() -> (Object, Method) {
        let mut c = ClassBuilder::new("InvocationAdder", None);
        c.method(
            MethodBuilder::new("add")
                .param("a", ValueKind::I32)
                .param("b", ValueKind::I32)
                .returns(ValueKind::I32)
                .body(|_, args, _| Ok(Value::I32(args[0].as_i32()? + args[1].as_i32()?))),
        );
        let class = c.register().unwrap();
        let method = class.method_named("add").unwrap();
        (Object::new(&class).unwrap(), method)
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> ChainEntry {
        let log = Arc::clone(log);
        let interceptor = move |inv: &mut MethodInvocation| {
            log.lock().unwrap().push(format!("{name}>"));
            let result = inv.proceed();
            log.lock().unwrap().push(format!("<{name}"));
            result
        };
        ChainEntry::Static(Arc::new(interceptor) as Arc<dyn MethodInterceptor>)
    }

    #[test]
    fn test_nested_order() {
        let (target, add) = adder();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![recording(&log, "A"), recording(&log, "B")]);
        let mut inv = MethodInvocation::new(
            target.clone(),
            Some(target),
            add,
            vec![Value::I32(2), Value::I32(3)],
            chain,
        );
        assert_eq!(inv.proceed().unwrap(), Value::I32(5));
        assert_eq!(inv.position(), 0);
        assert_eq!(*log.lock().unwrap(), ["A>", "B>", "<B", "<A"]);
    }

    #[test]
    fn test_missing_target() {
        let (target, add) = adder();
        let mut inv = MethodInvocation::new(
            target,
            None,
            add,
            vec![Value::I32(1), Value::I32(1)],
            InterceptorChain::empty(),
        );
        assert!(matches!(inv.proceed(), Err(Error::NullTarget { .. })));
    }

    #[test]
    fn test_modes_agree() {
        let (target, add) = adder();
        for mode in [InvocationMode::Reflective, InvocationMode::Direct] {
            let mut inv = MethodInvocation::new(
                target.clone(),
                Some(target.clone()),
                add.clone(),
                vec![Value::I32(4), Value::I32(5)],
                InterceptorChain::empty(),
            )
            .with_mode(mode);
            assert_eq!(inv.proceed().unwrap(), Value::I32(9));
        }
    }

    #[test]
    fn test_both_modes_validate_arguments() {
        let (target, add) = adder();
        for mode in [InvocationMode::Reflective, InvocationMode::Direct] {
            let mut inv = MethodInvocation::new(
                target.clone(),
                Some(target.clone()),
                add.clone(),
                vec![Value::I32(4), Value::from("five")],
                InterceptorChain::empty(),
            )
            .with_mode(mode);
            assert!(matches!(
                inv.proceed(),
                Err(Error::ArgumentTypeMismatch { index: 1, .. })
            ));
            assert!(inv.set_argument(1, 5).is_ok());
            assert_eq!(inv.proceed().unwrap(), Value::I32(9));
            assert!(inv.set_argument(2, 0).is_err());
        }
    }
}
