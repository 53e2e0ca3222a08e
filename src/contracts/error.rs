use std::sync::{MutexGuard, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::contracts::RecordId;

/// Errors surfaced by sequencer operations.
#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Extension trait for converting lock errors to StorageError.
pub trait LockResultExt<T> {
    /// Converts a lock error to a StorageError.
    fn map_lock_err(self) -> Result<T, StorageError>;
}

impl<'a, T> LockResultExt<RwLockReadGuard<'a, T>>
    for Result<RwLockReadGuard<'a, T>, PoisonError<RwLockReadGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<RwLockReadGuard<'a, T>, StorageError> {
        self.map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

impl<'a, T> LockResultExt<RwLockWriteGuard<'a, T>>
    for Result<RwLockWriteGuard<'a, T>, PoisonError<RwLockWriteGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<RwLockWriteGuard<'a, T>, StorageError> {
        self.map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

impl<'a, T> LockResultExt<MutexGuard<'a, T>>
    for Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<MutexGuard<'a, T>, StorageError> {
        self.map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Id allocation failed: {0}")]
    Id(#[from] IdError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

#[derive(Error, Debug)]
pub enum IdError {
    #[error("Record id space exhausted")]
    Overflow,
}

/// Drift between stored orders and positions, found by a density check.
///
/// Diagnostic only: the sequencer logs it and repairs the collection, it is
/// never returned as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record {id} at position {position} holds order {found} (collection size {total})")]
pub struct InvariantViolation {
    /// 1-based position of the first mismatching record in `(order, id)` order.
    pub position: u64,
    pub id: RecordId,
    pub found: u64,
    pub total: u64,
}
