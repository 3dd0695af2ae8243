//! Serialization boundary.
//!
//! Objects are written into a [`SerializationInfo`] property bag by the
//! write hook of their class and rebuilt from it by the read hook. Encoding
//! the bag into bytes is left to the embedding formatter.

use crate::error::{Error, Result};
use crate::runtime::class::Class;
use crate::runtime::object::Object;
use crate::runtime::value::Value;
use std::sync::Arc;

/// Writes an instance's state into a bag.
pub type WriteHook = Arc<dyn Fn(&Object, &mut SerializationInfo) -> Result<()> + Send + Sync>;

/// Rebuilds an instance of `class` from a bag.
pub type ReadHook = Arc<dyn Fn(&Class, &SerializationInfo) -> Result<Object> + Send + Sync>;

/// The pair of hooks a serializable class exposes.
#[derive(Clone)]
pub struct SerializationHooks {
    pub write: WriteHook,
    pub read: ReadHook,
}

impl SerializationHooks {
    pub fn new<W, R>(write: W, read: R) -> Self
    where
        W: Fn(&Object, &mut SerializationInfo) -> Result<()> + Send + Sync + 'static,
        R: Fn(&Class, &SerializationInfo) -> Result<Object> + Send + Sync + 'static,
    {
        SerializationHooks {
            write: Arc::new(write),
            read: Arc::new(read),
        }
    }
}

/// Ordered property bag holding one object's serialized state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializationInfo {
    type_name: String,
    entries: Vec<(String, Value)>,
}

impl SerializationInfo {
    pub fn new(type_name: &str) -> Self {
        SerializationInfo {
            type_name: type_name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Name of the class that wrote the bag.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Stores `value` under `key`, replacing an earlier entry.
    pub fn add(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `key` is absent.
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
            .ok_or_else(|| Error::Serialization {
                reason: format!("missing entry '{key}' for {}", self.type_name),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes `object` through its class's hooks.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the class has no hooks.
pub fn serialize(object: &Object) -> Result<SerializationInfo> {
    let class = object.class();
    let hooks = class.serialization_hooks().ok_or_else(|| Error::Serialization {
        reason: format!("type '{}' is not serializable", class.name()),
    })?;
    let mut info = SerializationInfo::new(class.name());
    (hooks.write)(object, &mut info)?;
    Ok(info)
}

/// Rebuilds an instance of `class` from `info`.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the class has no hooks or the bag was
/// written by a different class.
pub fn deserialize(class: &Class, info: &SerializationInfo) -> Result<Object> {
    let hooks = class.serialization_hooks().ok_or_else(|| Error::Serialization {
        reason: format!("type '{}' is not serializable", class.name()),
    })?;
    if info.type_name() != class.name() {
        return Err(Error::Serialization {
            reason: format!(
                "bag written by '{}' cannot be read as '{}'",
                info.type_name(),
                class.name()
            ),
        });
    }
    (hooks.read)(class, info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bag_replaces_existing_key() {
        let mut info = SerializationInfo::new("Account");
        info.add("balance", 10);
        info.add("owner", "ada");
        info.add("balance", 25);

        assert_eq!(info.len(), 2);
        assert_eq!(info.get("balance").unwrap(), &Value::I32(25));
        assert_eq!(info.keys().collect::<Vec<_>>(), ["balance", "owner"]);
        assert!(matches!(
            info.get("missing"),
            Err(Error::Serialization { .. })
        ));
    }
}
