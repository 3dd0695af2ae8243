//! Serialization of proxies.
//!
//! A proxy built from a serializable configuration writes its type key,
//! configuration, target source, introduction delegates and inherited
//! state into the bag. Reading it back looks the type up by key, so a
//! process that still has the type cached does not generate it again. The
//! bag holds these as host values; turning it into bytes is the job of the
//! embedding formatter.

use crate::aop::{AdvisedSupport, TargetSource};
use crate::error::{Error, Result};
use crate::proxy::cache::{ProxyTypeCache, ProxyTypeKey};
use crate::proxy::state::ProxyState;
use crate::proxy::type_builder;
use crate::runtime::{Class, Object, SerializationHooks, SerializationInfo, Value};
use std::any::Any;
use std::sync::Arc;

const KEY: &str = "proxy.key";
const ADVISED: &str = "proxy.advised";
const TARGET_SOURCE: &str = "proxy.target_source";
const INTRODUCTIONS: &str = "proxy.introductions";
const STATE: &str = "proxy.state";

struct TargetSourceEntry(Arc<dyn TargetSource>);

struct IntroductionsEntry(Vec<Object>);

pub(crate) fn proxy_hooks() -> SerializationHooks {
    SerializationHooks::new(write_proxy, read_proxy)
}

fn write_proxy(proxy: &Object, info: &mut SerializationInfo) -> Result<()> {
    let state = ProxyState::of(proxy)?;
    let key: Arc<dyn Any + Send + Sync> = state.key().clone();
    let advised: Arc<dyn Any + Send + Sync> = state.advised().clone();
    info.add(KEY, Value::Any(key));
    info.add(ADVISED, Value::Any(advised));
    info.add(
        TARGET_SOURCE,
        Value::any(TargetSourceEntry(Arc::clone(state.target_source()))),
    );
    info.add(
        INTRODUCTIONS,
        Value::any(IntroductionsEntry(state.introductions().to_vec())),
    );
    info.add(
        STATE,
        proxy.payload().as_ref().map_or(Value::Null, |p| Value::Any(Arc::clone(p))),
    );
    Ok(())
}

// A copy shares the inherited state but does not own a decorator's target
// lease; the original releases it.
fn read_proxy(class: &Class, info: &SerializationInfo) -> Result<Object> {
    let key = info.get(KEY)?.downcast::<ProxyTypeKey>()?;
    let advised = info.get(ADVISED)?.downcast::<AdvisedSupport>()?;
    let source = info.get(TARGET_SOURCE)?.downcast::<TargetSourceEntry>()?;
    let introductions = info.get(INTRODUCTIONS)?.downcast::<IntroductionsEntry>()?;
    let payload = match info.get(STATE)? {
        Value::Any(state) => Some(Arc::clone(state)),
        _ => None,
    };
    let state = ProxyState::from_parts(
        advised,
        introductions.0.clone(),
        Arc::clone(&source.0),
        key,
    );
    Ok(Object::from_parts(class.clone(), payload, Some(Arc::new(state))))
}

/// Rebuilds a proxy from a bag written by a serializable proxy, using the
/// global type cache.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the bag was not written by a proxy.
pub fn deserialize_proxy(info: &SerializationInfo) -> Result<Object> {
    deserialize_proxy_with(&ProxyTypeCache::global(), info)
}

/// Like [`deserialize_proxy`], looking the type up in `cache`.
pub fn deserialize_proxy_with(cache: &ProxyTypeCache, info: &SerializationInfo) -> Result<Object> {
    let key = info
        .get(KEY)?
        .downcast::<ProxyTypeKey>()
        .map_err(|_| Error::Serialization {
            reason: format!("bag for '{}' holds no proxy type key", info.type_name()),
        })?;
    let generated = cache.get_or_build(ProxyTypeKey::clone(&key), type_builder::build)?;
    generated.class().deserialize(info)
}
