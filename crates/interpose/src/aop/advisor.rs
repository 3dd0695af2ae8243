//! Advisors: advice paired with where it applies.

use crate::aop::advice::Advice;
use crate::aop::pointcut::{Pointcut, TypeFilter, any_class};
use crate::error::{Error, Result};
use crate::runtime::{Class, Object, Protocol};
use std::fmt;
use std::sync::Arc;

/// A pointcut and the advice to run where it matches.
///
/// # Example
///
/// ```
/// use interpose::{Advice, Advisor, Pointcut};
///
/// let advice = Advice::around(|inv| inv.proceed());
/// let everywhere = Advisor::new(advice.clone());
/// let getters = Advisor::with_pointcut(Pointcut::names(["get*"]), advice.clone());
///
/// assert!(everywhere.is_default());
/// assert!(everywhere.value_eq(&Advisor::new(advice)));
/// assert!(!getters.value_eq(&everywhere));
/// ```
#[derive(Clone)]
pub struct Advisor {
    pointcut: Pointcut,
    advice: Advice,
}

impl Advisor {
    /// Applies `advice` to every method of every class.
    pub fn new(advice: Advice) -> Self {
        Advisor::with_pointcut(Pointcut::always(), advice)
    }

    pub fn with_pointcut(pointcut: Pointcut, advice: Advice) -> Self {
        Advisor { pointcut, advice }
    }

    pub fn pointcut(&self) -> &Pointcut {
        &self.pointcut
    }

    pub fn advice(&self) -> &Advice {
        &self.advice
    }

    /// True for the default shape: advice under [`Pointcut::always`].
    pub fn is_default(&self) -> bool {
        self.pointcut.is_always()
    }

    /// Value equality: same pointcut and same advice instance.
    pub fn value_eq(&self, other: &Advisor) -> bool {
        self.pointcut.same_as(&other.pointcut) && self.advice.ptr_eq(&other.advice)
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advisor")
            .field("pointcut", &self.pointcut)
            .field("advice", &self.advice)
            .finish()
    }
}

impl From<Advice> for Advisor {
    fn from(advice: Advice) -> Self {
        Advisor::new(advice)
    }
}

/// Introduces protocols on a proxy, implemented by a delegate object
/// instead of the target.
#[derive(Clone)]
pub struct IntroductionAdvisor {
    protocols: Vec<Protocol>,
    delegate: Object,
    type_filter: Arc<dyn TypeFilter>,
}

impl IntroductionAdvisor {
    /// # Errors
    ///
    /// Returns [`Error::IntroductionNotImplemented`] if `delegate` does not
    /// conform to every protocol in `protocols`.
    pub fn new(delegate: Object, protocols: &[Protocol]) -> Result<Self> {
        if let Some(missing) = protocols.iter().find(|p| !delegate.conforms_to(p)) {
            return Err(Error::IntroductionNotImplemented {
                protocol: missing.name().to_string(),
                delegate: delegate.class().name().to_string(),
            });
        }
        Ok(IntroductionAdvisor {
            protocols: protocols.to_vec(),
            delegate,
            type_filter: any_class(),
        })
    }

    /// Introduces every protocol the delegate's class adopts directly or
    /// through its superclasses.
    pub fn from_delegate(delegate: Object) -> Self {
        let protocols = delegate
            .class()
            .hierarchy()
            .flat_map(|c| c.protocols().iter().cloned())
            .fold(Vec::new(), |mut acc: Vec<Protocol>, p| {
                if !acc.contains(&p) {
                    acc.push(p);
                }
                acc
            });
        IntroductionAdvisor {
            protocols,
            delegate,
            type_filter: any_class(),
        }
    }

    /// Restricts the introduction to target classes accepted by `filter`.
    #[must_use]
    pub fn with_type_filter(mut self, filter: Arc<dyn TypeFilter>) -> Self {
        self.type_filter = filter;
        self
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    pub fn delegate(&self) -> &Object {
        &self.delegate
    }

    pub fn applies_to(&self, target_class: Option<&Class>) -> bool {
        self.type_filter.matches(target_class)
    }
}

impl fmt::Debug for IntroductionAdvisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntroductionAdvisor")
            .field(
                "protocols",
                &self.protocols.iter().map(Protocol::name).collect::<Vec<_>>(),
            )
            .field("delegate", &self.delegate.class().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClassBuilder, MethodBuilder, ProtocolBuilder, Value};

    #[test]
    fn test_introduction_requires_conformance() {
        let mut p = ProtocolBuilder::new("Lockable_advisor_test");
        p.method(MethodBuilder::new("lock"));
        let lockable = p.register().unwrap();

        let mut c = ClassBuilder::new("LockMixin_advisor_test", None);
        c.adopt(&lockable)
            .method(MethodBuilder::new("lock").body(|_, _, _| Ok(Value::Unit)));
        let mixin = Object::new(&c.register().unwrap()).unwrap();

        let plain = Object::new(&Class::object()).unwrap();
        assert!(matches!(
            IntroductionAdvisor::new(plain, &[lockable.clone()]),
            Err(Error::IntroductionNotImplemented { .. })
        ));

        let intro = IntroductionAdvisor::new(mixin.clone(), &[lockable.clone()]).unwrap();
        assert_eq!(intro.protocols(), &[lockable.clone()]);
        assert_eq!(IntroductionAdvisor::from_delegate(mixin).protocols(), &[lockable]);
        assert!(intro.applies_to(None));
    }

    #[test]
    fn test_advisor_value_equality() {
        let advice = Advice::before(|_, _, _| Ok(()));
        let a = Advisor::new(advice.clone());
        let b = Advisor::from(advice);
        let c = Advisor::new(Advice::before(|_, _, _| Ok(())));
        assert!(a.value_eq(&b));
        assert!(!a.value_eq(&c));
    }
}
