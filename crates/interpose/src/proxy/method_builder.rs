//! Bodies of generated proxy members.
//!
//! Every intercepted member runs [`dispatch`]:
//!
//! 1. resolve the slot (closing generic methods over the call's type
//!    arguments)
//! 2. push the proxy on the thread's stack if the configuration exposes it
//! 3. find the delegation target: a fresh target from the target source,
//!    the proxy itself (extension strategies) or an introduction delegate
//! 4. build the interceptor chain for the advised method
//! 5. with an empty chain, call the joinpoint directly; otherwise run a
//!    [`MethodInvocation`], write by-reference arguments back and check the
//!    return value
//!
//! Targets obtained from the source are released when the call ends, on
//! success and on error.

use crate::aop::advised::dispatch_management;
use crate::aop::{AopContext, MethodInvocation, TargetSource};
use crate::error::{Error, Result};
use crate::proxy::marshal;
use crate::proxy::registry::MethodRegistry;
use crate::proxy::state::ProxyState;
use crate::runtime::{Method, MethodBody, Object, Value, ValueKind};
use interpose_log::error;
use std::sync::Arc;

/// Who the joinpoint of a slot runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delegation {
    /// A target obtained from the target source for each call.
    Target,
    /// The proxy itself, running an inherited implementation.
    Base,
    /// The introduction delegate at this index.
    Introduction(usize),
}

/// Body of an intercepted member.
pub(crate) fn intercepting_body(
    registry: Arc<MethodRegistry>,
    slot: usize,
    delegation: Delegation,
) -> MethodBody {
    Arc::new(
        move |proxy: &Object, args: &mut [Value], type_args: &[ValueKind]| {
            dispatch(&registry, slot, delegation, proxy, args, type_args)
        },
    )
}

/// Body of an `Advised` member: reads or edits the proxy's configuration,
/// never advised.
pub(crate) fn management_body(method: Method) -> MethodBody {
    Arc::new(
        move |proxy: &Object, args: &mut [Value], _: &[ValueKind]| {
            let state = ProxyState::of(proxy)?;
            dispatch_management(state.advised(), &method, args)
        },
    )
}

/// Body of a hidden forwarder: runs `base` on the proxy without virtual
/// dispatch, so the joinpoint of an overriding member never re-enters it.
pub(crate) fn forwarder_body(base: Method) -> MethodBody {
    Arc::new(
        move |this: &Object, args: &mut [Value], type_args: &[ValueKind]| {
            if type_args.is_empty() || !base.is_generic_definition() {
                base.call_body(this, args)
            } else {
                base.make_generic(type_args)?.call_body(this, args)
            }
        },
    )
}

fn dispatch(
    registry: &MethodRegistry,
    slot: usize,
    delegation: Delegation,
    proxy: &Object,
    args: &mut [Value],
    type_args: &[ValueKind],
) -> Result<Value> {
    let state = ProxyState::of(proxy)?;
    let advised = state.advised();
    let resolved = registry.resolve(slot, type_args)?;

    let _scope = advised.expose_proxy().then(|| AopContext::push(proxy.clone()));
    // Declared after the scope so the target goes back before the proxy
    // leaves the thread's stack.
    let lease = match delegation {
        Delegation::Target => Some(TargetLease::acquire(state.target_source())?),
        Delegation::Base | Delegation::Introduction(_) => None,
    };
    let target = match delegation {
        Delegation::Target => lease.as_ref().and_then(TargetLease::target).cloned(),
        Delegation::Base => Some(proxy.clone()),
        Delegation::Introduction(index) => Some(state.introduction(index)?.clone()),
    };

    let chain = advised.interceptors(&resolved.advised, state.target_class())?;
    if chain.is_empty() {
        let target = target.ok_or_else(|| Error::NullTarget {
            method: resolved.advised.name().to_string(),
        })?;
        return resolved.joinpoint.call(&target, args);
    }

    let params = resolved.advised.params();
    let arguments = marshal::box_arguments(params, args)?;
    let mut invocation = MethodInvocation::new(
        proxy.clone(),
        target,
        resolved.advised.clone(),
        arguments,
        chain,
    )
    .with_target_class(state.target_class().cloned())
    .with_proxy_method(resolved.proxy_method.clone())
    .with_mode(advised.invocation_mode())
    .with_joinpoint(resolved.joinpoint.clone());

    let returned = invocation.proceed()?;
    marshal::unbox_by_ref(params, invocation.arguments(), args);
    marshal::unbox_return(&resolved.advised.resolved_return(), returned)
}

/// A target obtained for one call, released on drop.
struct TargetLease {
    source: Arc<dyn TargetSource>,
    target: Option<Object>,
}

impl TargetLease {
    fn acquire(source: &Arc<dyn TargetSource>) -> Result<Self> {
        let target = source.get_target()?;
        Ok(TargetLease {
            source: Arc::clone(source),
            target,
        })
    }

    fn target(&self) -> Option<&Object> {
        self.target.as_ref()
    }
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        if let Err(e) = self.source.release_target(self.target.take()) {
            error!("failed to release target: {e}");
        }
    }
}
