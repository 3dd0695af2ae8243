//! Target sources: where a proxy gets the object a call ends on.
//!
//! Every [`TargetSource::get_target`] made by a proxy is paired with exactly
//! one [`TargetSource::release_target`], on success and failure alike.
//! Sources that hand out shared instances ignore the release; pooling
//! sources use it to take the instance back.

use crate::error::{Error, Result};
use crate::runtime::{Class, Object};
use interpose_log::error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};

/// Supplies and takes back target instances.
pub trait TargetSource: Send + Sync {
    /// Static class used for method resolution, if known.
    fn target_class(&self) -> Option<Class>;

    /// True if every call gets the same instance.
    fn is_static(&self) -> bool;

    fn get_target(&self) -> Result<Option<Object>>;

    /// Takes back an instance obtained from [`get_target`](Self::get_target).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateMismatch`] for an instance this source never
    /// handed out.
    fn release_target(&self, target: Option<Object>) -> Result<()>;

    /// The instance a static source always returns, without a get/release
    /// pair.
    fn peek_static_target(&self) -> Option<Object> {
        None
    }

    /// True for a source that never supplies a target.
    fn is_empty(&self) -> bool {
        false
    }
}

// ============================================================================
// Singleton / Empty
// ============================================================================

/// Always returns the same object.
#[derive(Debug, Clone)]
pub struct SingletonTargetSource {
    target: Object,
}

impl SingletonTargetSource {
    pub fn new(target: Object) -> Self {
        SingletonTargetSource { target }
    }
}

impl TargetSource for SingletonTargetSource {
    fn target_class(&self) -> Option<Class> {
        Some(self.target.class().clone())
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Option<Object>> {
        Ok(Some(self.target.clone()))
    }

    fn release_target(&self, _target: Option<Object>) -> Result<()> {
        Ok(())
    }

    fn peek_static_target(&self) -> Option<Object> {
        Some(self.target.clone())
    }
}

/// No target. Calls must be completed by interceptors.
#[derive(Debug, Clone, Default)]
pub struct EmptyTargetSource {
    class: Option<Class>,
}

static SHARED_EMPTY: LazyLock<Arc<EmptyTargetSource>> =
    LazyLock::new(|| Arc::new(EmptyTargetSource::default()));

impl EmptyTargetSource {
    pub fn new() -> Self {
        EmptyTargetSource::default()
    }

    /// An empty source that still reports a static class, so extension
    /// strategies can derive from it.
    pub fn for_class(class: &Class) -> Self {
        EmptyTargetSource {
            class: Some(class.clone()),
        }
    }

    /// Shared class-less instance.
    pub fn shared() -> Arc<dyn TargetSource> {
        let shared: Arc<EmptyTargetSource> = Arc::clone(&SHARED_EMPTY);
        shared
    }
}

impl TargetSource for EmptyTargetSource {
    fn target_class(&self) -> Option<Class> {
        self.class.clone()
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Option<Object>> {
        Ok(None)
    }

    fn release_target(&self, _target: Option<Object>) -> Result<()> {
        Ok(())
    }

    fn is_empty(&self) -> bool {
        true
    }
}

// ============================================================================
// Prototype
// ============================================================================

type Factory = Arc<dyn Fn() -> Result<Object> + Send + Sync>;

/// Creates a fresh target for every call.
pub struct PrototypeTargetSource {
    class: Class,
    factory: Factory,
    created: AtomicUsize,
}

impl PrototypeTargetSource {
    pub fn new<F>(class: &Class, factory: F) -> Self
    where
        F: Fn() -> Result<Object> + Send + Sync + 'static,
    {
        PrototypeTargetSource {
            class: class.clone(),
            factory: Arc::new(factory),
            created: AtomicUsize::new(0),
        }
    }

    /// Instantiates `class` through its parameterless constructor.
    pub fn from_class(class: &Class) -> Self {
        let template = class.clone();
        PrototypeTargetSource::new(class, move || Object::new(&template))
    }

    /// Number of targets created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl TargetSource for PrototypeTargetSource {
    fn target_class(&self) -> Option<Class> {
        Some(self.class.clone())
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Object>> {
        let target = (self.factory)()?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Some(target))
    }

    fn release_target(&self, _target: Option<Object>) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for PrototypeTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrototypeTargetSource")
            .field("class", &self.class.name())
            .field("created", &self.created())
            .finish()
    }
}

// ============================================================================
// Pooled
// ============================================================================

#[derive(Default)]
struct Pool {
    idle: Vec<Object>,
    active: Vec<Object>,
}

/// Bounded pool of interchangeable targets.
///
/// # Example
///
/// ```
/// use interpose::{ClassBuilder, Object};
/// use interpose::aop::target::{PooledTargetSource, TargetSource};
///
/// let worker = ClassBuilder::new("PooledWorker", None).register().unwrap();
/// let pool = PooledTargetSource::from_class(&worker, 2);
///
/// let a = pool.get_target().unwrap();
/// let b = pool.get_target().unwrap();
/// assert!(pool.get_target().is_err());
///
/// pool.release_target(a).unwrap();
/// pool.release_target(b).unwrap();
/// assert_eq!(pool.stats().idle, 2);
/// ```
pub struct PooledTargetSource {
    class: Class,
    factory: Factory,
    capacity: usize,
    pool: Mutex<Pool>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    exhausted: AtomicUsize,
}

impl PooledTargetSource {
    pub fn new<F>(class: &Class, capacity: usize, factory: F) -> Self
    where
        F: Fn() -> Result<Object> + Send + Sync + 'static,
    {
        PooledTargetSource {
            class: class.clone(),
            factory: Arc::new(factory),
            capacity,
            pool: Mutex::new(Pool::default()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            exhausted: AtomicUsize::new(0),
        }
    }

    pub fn from_class(class: &Class, capacity: usize) -> Self {
        let template = class.clone();
        PooledTargetSource::new(class, capacity, move || Object::new(&template))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        PoolStats {
            idle: pool.idle.len(),
            active: pool.active.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl TargetSource for PooledTargetSource {
    fn target_class(&self) -> Option<Class> {
        Some(self.class.clone())
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Object>> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let target = if let Some(idle) = pool.idle.pop() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            idle
        } else if pool.active.len() < self.capacity {
            self.misses.fetch_add(1, Ordering::Relaxed);
            (self.factory)()?
        } else {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
            return Err(Error::PoolExhausted {
                capacity: self.capacity,
            });
        };
        pool.active.push(target.clone());
        Ok(Some(target))
    }

    fn release_target(&self, target: Option<Object>) -> Result<()> {
        let Some(target) = target else {
            return Ok(());
        };
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        match pool.active.iter().position(|o| o.ptr_eq(&target)) {
            Some(index) => {
                let returned = pool.active.swap_remove(index);
                pool.idle.push(returned);
                Ok(())
            }
            None => {
                error!(
                    "pool for {} received an object it never handed out",
                    self.class.name()
                );
                Err(Error::StateMismatch {
                    reason: format!("{} was not obtained from this pool", target.class().name()),
                })
            }
        }
    }
}

impl fmt::Debug for PooledTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledTargetSource")
            .field("class", &self.class.name())
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Instances waiting in the pool.
    pub idle: usize,

    /// Instances currently handed out.
    pub active: usize,

    /// Requests served from the idle list.
    pub hits: usize,

    /// Requests that created a new instance.
    pub misses: usize,

    /// Requests refused because the pool was full.
    pub exhausted: usize,
}

impl PoolStats {
    /// Fraction of requests served by reuse, or `None` before any request.
    #[must_use]
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            Some(self.hits as f64 / total as f64)
        }
    }
}

// ============================================================================
// Hot-swappable
// ============================================================================

/// A single target that can be replaced while proxies are live.
pub struct HotSwappableTargetSource {
    class: Class,
    target: RwLock<Object>,
}

impl HotSwappableTargetSource {
    /// The reported class stays that of `initial` across swaps.
    pub fn new(initial: Object) -> Self {
        HotSwappableTargetSource {
            class: initial.class().clone(),
            target: RwLock::new(initial),
        }
    }

    /// Installs `target` and returns the previous one. Calls already past
    /// `get_target` finish on the old object.
    pub fn swap(&self, target: Object) -> Object {
        let mut current = self.target.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, target)
    }

    pub fn current(&self) -> Object {
        self.target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TargetSource for HotSwappableTargetSource {
    fn target_class(&self) -> Option<Class> {
        Some(self.class.clone())
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Object>> {
        Ok(Some(self.current()))
    }

    fn release_target(&self, _target: Option<Object>) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for HotSwappableTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotSwappableTargetSource")
            .field("class", &self.class.name())
            .finish_non_exhaustive()
    }
}
