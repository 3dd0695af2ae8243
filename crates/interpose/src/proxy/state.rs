//! Per-instance companion state of a proxy.

use crate::aop::advised::target_aware_protocol;
use crate::aop::{AdvisedSupport, TargetSource};
use crate::error::{Error, Result};
use crate::proxy::ProxyStrategy;
use crate::proxy::cache::{ProtocolSource, ProxyTypeKey};
use crate::runtime::{Class, Object, Value};
use interpose_log::error;
use std::fmt;
use std::sync::Arc;

/// What a proxy instance knows beyond its class: the configuration, the
/// introduction delegates (indexed as at build time), the target source and
/// the static target class.
pub(crate) struct ProxyState {
    advised: Arc<AdvisedSupport>,
    introductions: Vec<Object>,
    target_source: Arc<dyn TargetSource>,
    key: Arc<ProxyTypeKey>,
    /// Target whose state a decorator took over; released on drop.
    adopted_target: Option<Object>,
}

impl ProxyState {
    /// State for a new instance of the type built for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateMismatch`] if the configuration's introductions
    /// no longer fit the type.
    pub(crate) fn new(advised: Arc<AdvisedSupport>, key: Arc<ProxyTypeKey>) -> Result<Self> {
        let introductions: Vec<Object> = advised
            .introductions()
            .iter()
            .map(|i| i.delegate().clone())
            .collect();
        for (protocol, source) in &key.protocols {
            if let ProtocolSource::Introduction(index) = source {
                let fits = introductions
                    .get(*index)
                    .is_some_and(|delegate| delegate.conforms_to(protocol));
                if !fits {
                    return Err(Error::StateMismatch {
                        reason: format!(
                            "introduction {index} no longer provides '{}'",
                            protocol.name()
                        ),
                    });
                }
            }
        }
        let target_source = advised.target_source();
        Ok(ProxyState {
            advised,
            introductions,
            target_source,
            key,
            adopted_target: None,
        })
    }

    pub(crate) fn from_parts(
        advised: Arc<AdvisedSupport>,
        introductions: Vec<Object>,
        target_source: Arc<dyn TargetSource>,
        key: Arc<ProxyTypeKey>,
    ) -> Self {
        ProxyState {
            advised,
            introductions,
            target_source,
            key,
            adopted_target: None,
        }
    }

    /// Obtains a target from the source and keeps it until the proxy drops.
    pub(crate) fn adopt_target(&mut self) -> Result<Option<Object>> {
        let target = self.target_source.get_target()?;
        self.adopted_target = target.clone();
        Ok(target)
    }

    pub(crate) fn of(object: &Object) -> Result<&Arc<ProxyState>> {
        object.proxy_state().ok_or(Error::NotAProxy)
    }

    pub(crate) fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    pub(crate) fn introductions(&self) -> &[Object] {
        &self.introductions
    }

    pub(crate) fn introduction(&self, index: usize) -> Result<&Object> {
        self.introductions
            .get(index)
            .ok_or_else(|| Error::StateMismatch {
                reason: format!("no introduction at index {index}"),
            })
    }

    pub(crate) fn target_source(&self) -> &Arc<dyn TargetSource> {
        &self.target_source
    }

    pub(crate) fn target_class(&self) -> Option<&Class> {
        self.key.target.as_ref()
    }

    pub(crate) fn strategy(&self) -> ProxyStrategy {
        self.key.strategy
    }

    pub(crate) fn key(&self) -> &Arc<ProxyTypeKey> {
        &self.key
    }
}

impl Drop for ProxyState {
    fn drop(&mut self) {
        if let Some(target) = self.adopted_target.take() {
            if let Err(e) = self.target_source.release_target(Some(target)) {
                error!("decorator proxy failed to release its target: {e}");
            }
        }
    }
}

impl fmt::Debug for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyState")
            .field("strategy", &self.key.strategy)
            .field("introductions", &self.introductions.len())
            .field("target_class", &self.target_class().map(Class::name))
            .finish_non_exhaustive()
    }
}

/// Tells target-aware introduction delegates which proxy owns them.
pub(crate) fn notify_introductions(proxy: &Object) -> Result<()> {
    let state = ProxyState::of(proxy)?;
    let aware = target_aware_protocol();
    for delegate in state.introductions() {
        if delegate.conforms_to(&aware) {
            delegate.invoke_protocol(&aware, "set_target_proxy", &mut [Value::Object(proxy.clone())])?;
        }
    }
    Ok(())
}
