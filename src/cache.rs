use ahash::AHashMap;
use parking_lot::RwLock;

use crate::store::StoredEdge;

/// Per-node cache of touching edges, cleared on every write.
#[derive(Default)]
pub struct EdgeCache {
    inner: RwLock<AHashMap<String, Vec<StoredEdge>>>,
}

impl EdgeCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AHashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<StoredEdge>> {
        self.inner.read().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: Vec<StoredEdge>) {
        self.inner.write().insert(key.to_string(), value);
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}
