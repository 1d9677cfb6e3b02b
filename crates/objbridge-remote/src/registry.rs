//! Id tables for values handed to the peer.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use crate::function::Function;
use crate::lock;
use crate::meta::{CallbackId, ObjectId};
use crate::value::Value;

/// Identity key of a reference value.
pub(crate) fn identity(value: &Value) -> Option<usize> {
    match value {
        Value::Object(object) => Some(object.addr()),
        Value::Function(f) => Some(f.addr()),
        _ => None,
    }
}

struct ObjectEntry {
    value: Value,
    contexts: HashSet<String>,
}

#[derive(Default)]
struct ObjectTable {
    last_id: ObjectId,
    entries: HashMap<ObjectId, ObjectEntry>,
    by_identity: HashMap<usize, ObjectId>,
}

/// Objects and functions the peer may address by id.
///
/// Ids are assigned from a counter starting at 1 and are never reused.
/// Adding the same object again returns its existing id, so the peer sees
/// one stable id per object. An entry lives until every context that added
/// it has released it.
#[derive(Default)]
pub struct ObjectRegistry {
    table: Mutex<ObjectTable>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` on behalf of `context_id` and return its id.
    pub fn add(&self, context_id: &str, value: &Value) -> ObjectId {
        let mut table = lock(&self.table);
        let key = identity(value);

        if let Some(id) = key.and_then(|key| table.by_identity.get(&key).copied()) {
            if let Some(entry) = table.entries.get_mut(&id) {
                entry.contexts.insert(context_id.to_string());
            }
            return id;
        }

        table.last_id += 1;
        let id = table.last_id;
        table.entries.insert(
            id,
            ObjectEntry {
                value: value.clone(),
                contexts: HashSet::from([context_id.to_string()]),
            },
        );
        if let Some(key) = key {
            table.by_identity.insert(key, id);
        }
        debug!(id, context = context_id, kind = value.type_name(), "object registered");
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<Value> {
        lock(&self.table).entries.get(&id).map(|entry| entry.value.clone())
    }

    /// Drop `context_id`'s claim on `id`. Returns whether the entry was
    /// removed entirely.
    pub fn release(&self, context_id: &str, id: ObjectId) -> bool {
        let mut table = lock(&self.table);
        let Some(entry) = table.entries.get_mut(&id) else {
            return false;
        };
        entry.contexts.remove(context_id);
        if !entry.contexts.is_empty() {
            return false;
        }
        if let Some(entry) = table.entries.remove(&id) {
            if let Some(key) = identity(&entry.value) {
                table.by_identity.remove(&key);
            }
        }
        debug!(id, context = context_id, "object released");
        true
    }

    /// Drop every claim held by `context_id`. Returns how many entries were
    /// removed entirely.
    pub fn release_context(&self, context_id: &str) -> usize {
        let ids: Vec<ObjectId> = lock(&self.table)
            .entries
            .iter()
            .filter(|(_, entry)| entry.contexts.contains(context_id))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter(|id| self.release(context_id, *id))
            .count()
    }

    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct CallbackTable {
    last_id: CallbackId,
    callbacks: HashMap<CallbackId, Function>,
    by_identity: HashMap<usize, CallbackId>,
}

/// Local functions passed to the peer as call arguments.
///
/// The peer invokes them back by id. Registering the same function twice
/// yields the same id.
#[derive(Default)]
pub struct CallbackRegistry {
    table: Mutex<CallbackTable>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, callback: &Function) -> CallbackId {
        let mut table = lock(&self.table);
        if let Some(id) = table.by_identity.get(&callback.addr()) {
            return *id;
        }
        table.last_id += 1;
        let id = table.last_id;
        table.callbacks.insert(id, callback.clone());
        table.by_identity.insert(callback.addr(), id);
        debug!(id, location = callback.location(), "callback registered");
        id
    }

    pub fn get(&self, id: CallbackId) -> Option<Function> {
        lock(&self.table).callbacks.get(&id).cloned()
    }

    /// The id `callback` was registered under, if any.
    pub fn id_of(&self, callback: &Function) -> Option<CallbackId> {
        lock(&self.table).by_identity.get(&callback.addr()).copied()
    }

    /// Forget a callback. Later invocations of `id` find nothing.
    pub fn remove(&self, id: CallbackId) -> Option<Function> {
        let mut table = lock(&self.table);
        let removed = table.callbacks.remove(&id)?;
        table.by_identity.remove(&removed.addr());
        Some(removed)
    }

    pub fn clear(&self) {
        let mut table = lock(&self.table);
        table.callbacks.clear();
        table.by_identity.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.table).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PlainObject;

    #[test]
    fn test_ids_are_monotonic_and_deduplicated() {
        let registry = ObjectRegistry::new();
        let a = PlainObject::new().into_value();
        let b = PlainObject::new().into_value();

        let id_a = registry.add("1", &a);
        let id_b = registry.add("1", &b);
        assert!(id_b > id_a);
        assert_eq!(registry.add("1", &a.clone()), id_a);
        assert_eq!(registry.get(id_a), Some(a));
        assert!(registry.get(9999).is_none());
    }

    #[test]
    fn test_ids_never_reused_after_release() {
        let registry = ObjectRegistry::new();
        let a = PlainObject::new().into_value();
        let id = registry.add("1", &a);
        assert!(registry.release("1", id));
        assert!(registry.get(id).is_none());

        let again = registry.add("1", &a);
        assert!(again > id);
    }

    #[test]
    fn test_entry_survives_until_every_context_releases() {
        let registry = ObjectRegistry::new();
        let shared = PlainObject::new().into_value();
        let only_first = PlainObject::new().into_value();

        let id = registry.add("first", &shared);
        assert_eq!(registry.add("second", &shared), id);
        registry.add("first", &only_first);

        assert_eq!(registry.release_context("first"), 1);
        assert!(registry.get(id).is_some());
        assert!(registry.release("second", id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_callbacks() {
        let callbacks = CallbackRegistry::new();
        let f = Function::new("listener", 1, |_| Ok(Value::Undefined));
        let g = Function::new("other", 0, |_| Ok(Value::Undefined));

        let id = callbacks.add(&f);
        assert_eq!(callbacks.add(&f.clone()), id);
        assert_ne!(callbacks.add(&g), id);

        assert!(callbacks.get(id).unwrap().ptr_eq(&f));
        assert!(callbacks.remove(id).is_some());
        assert!(callbacks.get(id).is_none());
        assert_eq!(callbacks.len(), 1);
    }
}
