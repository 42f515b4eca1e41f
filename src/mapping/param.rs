use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::RowValues;

/// Caller-supplied parameter object.
///
/// A property bag shared between the caller and the executor: clones are handles to the same
/// object, so keys written back at flush time are visible through every clone.
///
/// ```rust
/// use sql_batcher::prelude::*;
///
/// let user = ParamObject::new().with("name", "alice");
/// let queued = user.clone();
/// queued.set("id", RowValues::Int(7));
/// assert_eq!(user.get("id"), Some(RowValues::Int(7)));
/// ```
#[derive(Clone, Default)]
pub struct ParamObject {
    properties: Arc<Mutex<BTreeMap<String, RowValues>>>,
}

impl ParamObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(self, property: &str, value: impl Into<RowValues>) -> Self {
        self.set(property, value.into());
        self
    }

    /// Set a property, returning the previous value.
    pub fn set(&self, property: &str, value: RowValues) -> Option<RowValues> {
        self.lock().insert(property.to_owned(), value)
    }

    #[must_use]
    pub fn get(&self, property: &str) -> Option<RowValues> {
        self.lock().get(property).cloned()
    }

    #[must_use]
    pub fn contains(&self, property: &str) -> bool {
        self.lock().contains_key(property)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current properties.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, RowValues> {
        self.lock().clone()
    }

    /// True when both handles point at the same object.
    #[must_use]
    pub fn same_object(&self, other: &ParamObject) -> bool {
        Arc::ptr_eq(&self.properties, &other.properties)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RowValues>> {
        match self.properties.lock() {
            Ok(guard) => guard,
            // A panic while holding the lock cannot leave the map half-written.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for ParamObject
where
    K: Into<String>,
    V: Into<RowValues>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<BTreeMap<_, _>>();
        Self {
            properties: Arc::new(Mutex::new(map)),
        }
    }
}

impl fmt::Debug for ParamObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let original = ParamObject::new().with("name", "bob");
        let clone = original.clone();
        clone.set("id", RowValues::Int(42));
        assert_eq!(original.get("id"), Some(RowValues::Int(42)));
        assert!(original.same_object(&clone));
    }

    #[test]
    fn equal_contents_are_distinct_objects() {
        let a: ParamObject = [("k", 1_i64)].into_iter().collect();
        let b: ParamObject = [("k", 1_i64)].into_iter().collect();
        assert_eq!(a.snapshot(), b.snapshot());
        assert!(!a.same_object(&b));
    }
}
