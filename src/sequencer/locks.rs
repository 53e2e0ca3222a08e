use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Advisory locks keyed by collection name.
///
/// Sequencers built from the same registry serialize their mutations on a
/// shared collection. Writers that bypass the sequencer are not covered.
#[derive(Clone, Default)]
pub struct CollectionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `collection`, creating it on first use.
    pub fn lock_for(&self, collection: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(collection) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.locks
                .entry(collection.to_string())
                .or_default()
                .value(),
        )
    }

    /// Number of collections that have a lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
