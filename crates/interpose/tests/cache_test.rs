//! Proxy type cache tests.
//!
//! One generated class per configuration shape: advice contents never
//! split the cache, while strategy, protocols, target type and flags do.

mod common;

use common::{add, calculator};
use interpose::proxy::ProxyTypeCache;
use interpose::{Advice, ProxyFactory, ProxyStrategy, Value};
use std::sync::Arc;

fn factory_with(cache: &Arc<ProxyTypeCache>, calc: &common::Calculator) -> ProxyFactory {
    let factory = ProxyFactory::with_target(calc.instance()).with_cache(Arc::clone(cache));
    factory.add_advice(Advice::around(|inv| inv.proceed())).unwrap();
    factory
}

#[test]
fn test_same_shape_shares_type() {
    let calc = calculator();
    let cache = Arc::new(ProxyTypeCache::new());

    let first = factory_with(&cache, &calc).create_aop_proxy().unwrap();
    let second = factory_with(&cache, &calc);
    second.add_advice(Advice::before(|_, _, _| Ok(()))).unwrap();
    let second = second.create_aop_proxy().unwrap();

    assert!(Arc::ptr_eq(first.proxy_type(), second.proxy_type()));
    assert_eq!(cache.build_count(), 1);
    assert_eq!(cache.hit_count(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_shape_changes_build_new_types() {
    let calc = calculator();
    let cache = Arc::new(ProxyTypeCache::new());

    let composition = factory_with(&cache, &calc).create_aop_proxy().unwrap();

    let decorator = factory_with(&cache, &calc);
    decorator.set_proxy_target_type(true);
    let decorator = decorator.create_aop_proxy().unwrap();

    let serializable = factory_with(&cache, &calc);
    serializable.set_serializable(true);
    let serializable = serializable.create_aop_proxy().unwrap();

    assert_eq!(composition.proxy_type().strategy(), ProxyStrategy::Composition);
    assert_eq!(decorator.proxy_type().strategy(), ProxyStrategy::Decorator);
    assert!(!Arc::ptr_eq(composition.proxy_type(), serializable.proxy_type()));
    assert_eq!(cache.build_count(), 3);
}

#[test]
fn test_proxies_of_one_type_keep_their_own_configuration() {
    let calc = calculator();
    let cache = Arc::new(ProxyTypeCache::new());

    let plain = factory_with(&cache, &calc);
    let doubled = factory_with(&cache, &calc);
    doubled
        .add_advice(Advice::around(|inv| Ok(Value::I32(inv.proceed()?.as_i32()? * 2))))
        .unwrap();

    let plain = plain.get_proxy().unwrap();
    let doubled = doubled.get_proxy().unwrap();
    assert_eq!(plain.class(), doubled.class());
    assert_eq!(add(&plain, &calc.protocol, 2, 3).unwrap(), Value::I32(5));
    assert_eq!(add(&doubled, &calc.protocol, 2, 3).unwrap(), Value::I32(10));
}

#[test]
fn test_cleared_cache_reuses_type_names() {
    let calc = calculator();
    let cache = Arc::new(ProxyTypeCache::new());

    let before = factory_with(&cache, &calc).get_proxy().unwrap();
    cache.clear();
    assert!(cache.is_empty());
    let after = factory_with(&cache, &calc).get_proxy().unwrap();

    assert_ne!(before.class(), after.class());
    assert_eq!(before.class().name(), after.class().name());
    assert_eq!(cache.build_count(), 2);
}
