use std::sync::atomic::{AtomicU64, Ordering};

use crate::contracts::{IdError, IdGenerator};

/// Lock-free record id allocator.
///
/// Holds no durable state of its own; stores persist the highest id they
/// have written and resume with [`AtomicIdGenerator::starting_from`].
#[derive(Debug)]
pub struct AtomicIdGenerator {
    last: AtomicU64,
}

impl AtomicIdGenerator {
    /// First call to `next()` returns 1.
    pub fn new() -> Self {
        Self::starting_from(0)
    }

    /// First call to `next()` returns `last + 1`.
    pub fn starting_from(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Raises the counter so later ids stay above `seen`.
    pub fn observe(&self, seen: u64) {
        self.last.fetch_max(seen, Ordering::AcqRel);
    }
}

impl Default for AtomicIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for AtomicIdGenerator {
    fn next(&self) -> Result<u64, IdError> {
        self.last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(1))
            .map(|prev| prev + 1)
            .map_err(|_| IdError::Overflow)
    }

    fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}
