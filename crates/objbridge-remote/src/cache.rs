use std::collections::HashMap;
use std::sync::{Mutex, Weak};

use crate::lock;
use crate::meta::ObjectId;
use crate::proxy::{HandleInner, RemoteHandle};

/// Maps remote object ids to the live proxy for that id.
///
/// Entries are weak: the cache never keeps a proxy alive on its own. While
/// any clone of a handle is referenced, decoding the same id again yields
/// that same handle.
#[derive(Default)]
pub struct RemoteObjectCache {
    entries: Mutex<HashMap<ObjectId, Weak<HandleInner>>>,
}

impl RemoteObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ObjectId) -> Option<RemoteHandle> {
        lock(&self.entries)
            .get(&id)
            .and_then(Weak::upgrade)
            .map(RemoteHandle::from_inner)
    }

    /// Return the live handle for `id`, or build and cache one.
    ///
    /// Inserting also drops entries whose handles are gone, so the table
    /// tracks live proxies rather than every id ever seen.
    pub fn get_or_insert_with(
        &self,
        id: ObjectId,
        build: impl FnOnce() -> RemoteHandle,
    ) -> RemoteHandle {
        let mut entries = lock(&self.entries);
        if let Some(handle) = entries.get(&id).and_then(Weak::upgrade) {
            return RemoteHandle::from_inner(handle);
        }
        let handle = build();
        retain_live(&mut entries);
        entries.insert(id, handle.downgrade());
        handle
    }

    pub fn remove(&self, id: ObjectId) -> Option<RemoteHandle> {
        lock(&self.entries)
            .remove(&id)
            .and_then(|weak| weak.upgrade())
            .map(RemoteHandle::from_inner)
    }

    /// Drop entries whose handles are gone. Returns how many remain.
    pub fn prune(&self) -> usize {
        let mut entries = lock(&self.entries);
        retain_live(&mut entries);
        entries.len()
    }

    /// Number of ids with a live handle.
    pub fn len(&self) -> usize {
        lock(&self.entries)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

fn retain_live(entries: &mut HashMap<ObjectId, Weak<HandleInner>>) {
    entries.retain(|_, weak| weak.strong_count() > 0);
}
