// Proxy benchmarks for interpose
//
// These benchmarks measure the cost a proxy adds to a call: an empty chain,
// growing interceptor chains, each strategy, and proxy creation from a
// cached type.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use interpose::runtime::{Class, ClassBuilder, MethodBuilder, Protocol, ProtocolBuilder};
use interpose::{Advice, Advisor, Object, Pointcut, ProxyFactory, ProxyStrategy, Value, ValueKind};
use std::sync::atomic::{AtomicUsize, Ordering};

static BENCH_ID: AtomicUsize = AtomicUsize::new(0);

fn add_method() -> MethodBuilder {
    MethodBuilder::new("add")
        .param("a", ValueKind::I32)
        .param("b", ValueKind::I32)
        .returns(ValueKind::I32)
}

fn setup_test() -> (Protocol, Class, Object) {
    let id = BENCH_ID.fetch_add(1, Ordering::SeqCst);
    let mut p = ProtocolBuilder::new(&format!("BenchAdder_{id}"));
    p.method(add_method());
    let protocol = p.register().unwrap();

    let mut c = ClassBuilder::new(&format!("BenchAdderImpl_{id}"), None);
    c.adopt(&protocol).method(
        add_method()
            .overridable()
            .body(|_, args, _| Ok(Value::I32(args[0].as_i32()? + args[1].as_i32()?))),
    );
    let class = c.register().unwrap();
    let target = Object::new(&class).unwrap();
    (protocol, class, target)
}

fn passthrough() -> Advice {
    Advice::around(|inv| inv.proceed())
}

/// Direct call against a proxied call with no matching advice.
fn bench_proxy_overhead(c: &mut Criterion) {
    let (protocol, _class, target) = setup_test();
    let factory = ProxyFactory::with_target(target.clone());
    factory
        .add_advisor(Advisor::with_pointcut(
            Pointcut::names(["never_called"]),
            passthrough(),
        ))
        .unwrap();
    let proxy = factory.get_proxy().unwrap();

    let mut group = c.benchmark_group("proxy_overhead");
    group.sample_size(1000);

    group.bench_function("direct_call", |b| {
        b.iter(|| {
            let mut args = [Value::I32(2), Value::I32(3)];
            black_box(target.invoke_protocol(&protocol, "add", black_box(&mut args)).unwrap());
        });
    });

    group.bench_function("empty_chain", |b| {
        b.iter(|| {
            let mut args = [Value::I32(2), Value::I32(3)];
            black_box(proxy.invoke_protocol(&protocol, "add", black_box(&mut args)).unwrap());
        });
    });

    group.finish();
}

/// Call cost as the interceptor chain grows.
fn bench_chain_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_length");

    for length in [1usize, 4, 16] {
        let (protocol, _class, target) = setup_test();
        let factory = ProxyFactory::with_target(target);
        for _ in 0..length {
            factory.add_advice(passthrough()).unwrap();
        }
        let proxy = factory.get_proxy().unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, _| {
            b.iter(|| {
                let mut args = [Value::I32(2), Value::I32(3)];
                black_box(proxy.invoke_protocol(&protocol, "add", &mut args).unwrap());
            });
        });
    }

    group.finish();
}

/// One intercepted call per strategy.
fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategy");

    for strategy in [
        ProxyStrategy::Composition,
        ProxyStrategy::Decorator,
        ProxyStrategy::Inheritance,
    ] {
        let (protocol, _class, target) = setup_test();
        let factory = ProxyFactory::with_target(target);
        factory.set_strategy(Some(strategy));
        factory.add_advice(passthrough()).unwrap();
        let proxy = factory.get_proxy().unwrap();

        group.bench_function(BenchmarkId::from_parameter(strategy), |b| {
            b.iter(|| {
                let mut args = [Value::I32(2), Value::I32(3)];
                black_box(proxy.invoke_protocol(&protocol, "add", &mut args).unwrap());
            });
        });
    }

    group.finish();
}

/// Proxy creation once its type is cached.
fn bench_proxy_creation(c: &mut Criterion) {
    let (_protocol, _class, target) = setup_test();
    let factory = ProxyFactory::with_target(target);
    factory.add_advice(passthrough()).unwrap();
    factory.get_proxy().unwrap();

    c.bench_function("proxy_creation_cached", |b| {
        b.iter(|| black_box(factory.get_proxy().unwrap()));
    });
}

criterion_group!(
    benches,
    bench_proxy_overhead,
    bench_chain_length,
    bench_strategies,
    bench_proxy_creation
);
criterion_main!(benches);
