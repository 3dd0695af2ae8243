//! Interned method names.
//!
//! Every distinct method name maps to exactly one [`Selector`], so
//! comparison is pointer equality and the hash is computed once.
//!
//! # Sharding
//!
//! The registry is split into `NUM_SHARDS` independent maps chosen by
//! `hash & SHARD_MASK`, each behind its own `RwLock`. A hit takes one read
//! lock; a miss takes one write lock on a single shard.

use crate::error::{Error, Result};
use fxhash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

const NUM_SHARDS: usize = 16;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

struct Interned {
    name: Box<str>,
    hash: u64,
}

type Shard = RwLock<FxHashMap<Box<str>, Selector>>;

static REGISTRY: LazyLock<[Shard; NUM_SHARDS]> =
    LazyLock::new(|| std::array::from_fn(|_| RwLock::new(FxHashMap::default())));

/// An interned method name.
///
/// # Example
///
/// ```
/// use interpose::Selector;
///
/// let a: Selector = "deposit".parse().unwrap();
/// let b = Selector::intern("deposit");
/// assert_eq!(a, b);
/// assert!("".parse::<Selector>().is_err());
/// ```
#[derive(Clone)]
pub struct Selector(Arc<Interned>);

impl Selector {
    /// Returns the selector for `name`, interning it on first use.
    ///
    /// Interning never fails; use [`FromStr`] to reject malformed names.
    pub fn intern(name: &str) -> Selector {
        let hash = fxhash::hash64(name);
        // Truncation is intended: SHARD_MASK keeps the index below NUM_SHARDS.
        #[allow(clippy::cast_possible_truncation)]
        let shard = &REGISTRY[(hash & SHARD_MASK) as usize];

        if let Some(sel) = shard
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return sel.clone();
        }

        let mut map = shard.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(Box::from(name))
            .or_insert_with(|| {
                Selector(Arc::new(Interned {
                    name: Box::from(name),
                    hash,
                }))
            })
            .clone()
    }

    /// Checks that `name` is usable as a method name.
    pub fn validate(name: &str) -> Result<()> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidSelector {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Precomputed FxHash of the name.
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.0.hash
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Selector::validate(name)?;
        Ok(Selector::intern(name))
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("name", &self.name())
            .field("hash", &format_args!("{:#x}", self.hash()))
            .finish()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_selector_interning() {
        let a = Selector::intern("withdraw");
        let b: Selector = "withdraw".parse().unwrap();
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_ne!(a, Selector::intern("deposit"));
    }

    #[test]
    fn test_selector_hash_matches_fxhash() {
        let sel = Selector::intern("balance");
        assert_eq!(sel.hash(), fxhash::hash64("balance"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!("".parse::<Selector>().is_err());
        assert!("two words".parse::<Selector>().is_err());
        assert!("ok_name".parse::<Selector>().is_ok());
    }

    #[test]
    fn test_concurrent_interning_yields_one_selector() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| Selector::intern("concurrentSelector")))
            .collect();
        let sels: Vec<Selector> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for sel in &sels[1..] {
            assert_eq!(*sel, sels[0]);
        }
    }
}
