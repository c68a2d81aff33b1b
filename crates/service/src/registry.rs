//! The object registry.
//!
//! Maps short string ids to live host objects. The registry owns a
//! strong reference to every binding; the peer owns the lifetime and
//! releases ids explicitly through the memory command.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::objects::ObjectRef;

/// Prefix of every issued instance id.
pub const INSTANCE_PREFIX: &str = "o";

#[derive(Default)]
pub struct ObjectRegistry {
    bindings: RwLock<AHashMap<String, ObjectRef>>,
    next_id: AtomicU64,
}

impl ObjectRegistry {
    /// Allocates the next id and binds the object under it. Ids are
    /// strictly monotonic per process and never reused.
    pub fn put_new(&self, object: ObjectRef) -> String {
        let id = format!(
            "{}{}",
            INSTANCE_PREFIX,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );

        self.bindings.write().insert(id.clone(), object);
        id
    }

    /// Binds or replaces, returning the previous binding if any.
    pub fn put(&self, id: impl Into<String>, object: ObjectRef) -> Option<ObjectRef> {
        self.bindings.write().insert(id.into(), object)
    }

    /// Constant-time lookup. Static ids are resolved on demand elsewhere
    /// and never hit the bindings map.
    pub fn get(&self, id: &str) -> Option<ObjectRef> {
        if codec::is_static_id(id) {
            return None;
        }

        self.bindings.read().get(id).cloned()
    }

    /// Removing an unknown id is a silent no-op.
    pub fn delete(&self, id: &str) {
        self.bindings.write().remove(id);
    }

    pub fn clear(&self) {
        self.bindings.write().clear();
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}
