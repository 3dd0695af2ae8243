//! The current proxy of the calling thread.
//!
//! When a configuration has `expose_proxy` set, every proxied call pushes its
//! proxy onto a thread-local stack for the duration of the call. Target code
//! and interceptors can then reach the proxy with
//! [`AopContext::current_proxy`], for example to make a self-call that goes
//! through the advice again.

use crate::error::{Error, Result};
use crate::runtime::Object;
use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static PROXY_STACK: RefCell<Vec<Object>> = const { RefCell::new(Vec::new()) };
}

/// Access to the thread's proxy stack.
pub struct AopContext;

impl AopContext {
    /// The innermost proxy whose call is running on this thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCurrentProxy`] outside of an exposed proxy call.
    pub fn current_proxy() -> Result<Object> {
        PROXY_STACK
            .with(|stack| stack.borrow().last().cloned())
            .ok_or(Error::NoCurrentProxy)
    }

    /// Number of exposed proxy calls active on this thread.
    pub fn depth() -> usize {
        PROXY_STACK.with(|stack| stack.borrow().len())
    }

    /// Pushes `proxy`; it is popped when the returned guard drops.
    #[must_use = "the proxy is popped as soon as the scope is dropped"]
    pub fn push(proxy: Object) -> ProxyScope {
        PROXY_STACK.with(|stack| stack.borrow_mut().push(proxy));
        ProxyScope {
            _thread_bound: PhantomData,
        }
    }
}

/// Keeps a proxy on the current thread's stack. Not `Send`: it must drop on
/// the thread that pushed.
pub struct ProxyScope {
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for ProxyScope {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread exit.
        let _ = PROXY_STACK.try_with(|stack| stack.borrow_mut().pop());
    }
}
