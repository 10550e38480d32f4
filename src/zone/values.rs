use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Key/value environment of a zone.
///
/// A forked zone sees its parent's values overlaid with the values passed to
/// [`Zone::fork`](crate::Zone::fork). Values are stored type-erased and read back by
/// type with [`Zone::get`](crate::Zone::get).
#[derive(Clone, Default)]
pub struct ZoneValues {
    entries: HashMap<String, Rc<dyn Any>>,
}

impl ZoneValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) `key`.
    pub fn with<V: Any>(mut self, key: impl Into<String>, value: V) -> Self {
        self.entries.insert(key.into(), Rc::new(value));
        self
    }

    /// Returns a clone of the value under `key` if it exists and has type `V`.
    pub fn get<V: Any + Clone>(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        (**entry).downcast_ref::<V>().cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn overlay(&self, other: &ZoneValues) -> ZoneValues {
        let mut entries = self.entries.clone();
        entries.extend(other.entries.iter().map(|(key, value)| (key.clone(), value.clone())));
        ZoneValues { entries }
    }
}

impl fmt::Debug for ZoneValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
