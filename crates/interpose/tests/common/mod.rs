// Common test utilities for integration tests
//
// Shared fixtures: a calculator protocol with a conforming class, a
// recording advice journal and a target source that counts leases.

#![allow(dead_code)]

use interpose::aop::TargetSource;
use interpose::runtime::{Class, ClassBuilder, MethodBuilder, Object, Protocol, ProtocolBuilder};
use interpose::{Advice, Error, Fault, Result, Value, ValueKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

static NAME_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Returns a type name no other test uses
pub fn unique(prefix: &str) -> String {
    format!("{prefix}{}", NAME_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Instance state of the calculator class
#[derive(Debug, Default)]
pub struct Tally {
    pub calls: AtomicUsize,
}

impl Tally {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

/// The calculator protocol plus a class implementing it
pub struct Calculator {
    pub protocol: Protocol,
    pub class: Class,
    /// The fault `divide` raises for a zero divisor.
    pub division_fault: Fault,
}

impl Calculator {
    pub fn instance(&self) -> Object {
        Object::new(&self.class).expect("Failed to create calculator")
    }
}

fn add_method() -> MethodBuilder {
    MethodBuilder::new("add")
        .param("a", ValueKind::I32)
        .param("b", ValueKind::I32)
        .returns(ValueKind::I32)
}

fn divide_method() -> MethodBuilder {
    MethodBuilder::new("divide")
        .param("a", ValueKind::I32)
        .param("b", ValueKind::I32)
        .returns(ValueKind::I32)
}

fn swap_method() -> MethodBuilder {
    MethodBuilder::new("swap")
        .ref_param("a", ValueKind::I32)
        .ref_param("b", ValueKind::I32)
}

fn parse_method() -> MethodBuilder {
    MethodBuilder::new("try_parse")
        .param("text", ValueKind::Str)
        .out_param("value", ValueKind::I32)
        .returns(ValueKind::Bool)
}

/// Creates a calculator protocol and a class with overridable
/// implementations of every member
pub fn calculator() -> Calculator {
    let mut p = ProtocolBuilder::new(&unique("Calculator"));
    p.method(add_method())
        .method(divide_method())
        .method(swap_method())
        .method(parse_method());
    let protocol = p.register().expect("Failed to register protocol");

    let division_fault = Fault::msg("division by zero");
    let raised = division_fault.clone();

    let mut c = ClassBuilder::new(&unique("CalculatorImpl"), None);
    c.adopt(&protocol)
        .constructor(&[], |_| Ok(Tally::default()))
        .method(add_method().overridable().body(|this, args, _| {
            if let Some(tally) = this.state::<Tally>() {
                tally.calls.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Value::I32(args[0].as_i32()? + args[1].as_i32()?))
        }))
        .method(divide_method().overridable().body(move |_, args, _| {
            let divisor = args[1].as_i32()?;
            if divisor == 0 {
                return Err(Error::Fault(raised.clone()));
            }
            Ok(Value::I32(args[0].as_i32()? / divisor))
        }))
        .method(swap_method().overridable().body(|_, args, _| {
            args.swap(0, 1);
            Ok(Value::Unit)
        }))
        .method(parse_method().overridable().body(|_, args, _| {
            match args[0].as_str()?.trim().parse::<i32>() {
                Ok(parsed) => {
                    args[1] = Value::I32(parsed);
                    Ok(Value::Bool(true))
                }
                Err(_) => {
                    args[1] = Value::I32(0);
                    Ok(Value::Bool(false))
                }
            }
        }));
    let class = c.register().expect("Failed to register calculator class");

    Calculator {
        protocol,
        class,
        division_fault,
    }
}

/// Ordered record of what advice observed
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Before advice logging `before name(args)`
    pub fn before(&self) -> Advice {
        let journal = self.clone();
        Advice::before(move |method, args, _| {
            let rendered: Vec<String> = args.iter().map(render).collect();
            journal.push(format!("before {}({})", method.name(), rendered.join(",")));
            Ok(())
        })
    }

    /// After-returning advice logging `after name = result`
    pub fn after(&self) -> Advice {
        let journal = self.clone();
        Advice::after_returning(move |result, method, _, _| {
            journal.push(format!("after {} = {}", method.name(), render(result)));
            Ok(())
        })
    }

    /// Around advice logging entry and exit under `label`
    pub fn around(&self, label: &'static str) -> Advice {
        let journal = self.clone();
        Advice::around(move |inv| {
            journal.push(format!("{label} enter"));
            let result = inv.proceed();
            journal.push(format!("{label} exit"));
            result
        })
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Str(s) => s.to_string(),
        other => format!("{other:?}"),
    }
}

/// Target source producing fresh calculators and counting leases
pub struct CountingTargetSource {
    class: Class,
    pub gets: AtomicUsize,
    pub releases: AtomicUsize,
}

impl CountingTargetSource {
    pub fn new(class: &Class) -> Self {
        CountingTargetSource {
            class: class.clone(),
            gets: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }
}

impl TargetSource for CountingTargetSource {
    fn target_class(&self) -> Option<Class> {
        Some(self.class.clone())
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Object>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        Object::new(&self.class).map(Some)
    }

    fn release_target(&self, _target: Option<Object>) -> Result<()> {
        self.releases.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Calls `add` through `protocol`
pub fn add(proxy: &Object, protocol: &Protocol, a: i32, b: i32) -> Result<Value> {
    proxy.invoke_protocol(protocol, "add", &mut [Value::I32(a), Value::I32(b)])
}
