use std::future::Future;

use crate::contracts::error::StorageError;
use crate::contracts::{NewRecord, Record, RecordFilter, RecordId, RecordPatch, WriteOp};

/// Persistence collaborator holding one collection of sequenced records.
///
/// Every method is a suspension point. Stores do not enforce uniqueness of
/// `order`; keeping it dense is the sequencer's job.
pub trait RecordStore: Send + Sync {
    /// Returns matching records sorted by `(order, id)` in the filter's direction.
    fn find_all(
        &self,
        filter: &RecordFilter,
    ) -> impl Future<Output = Result<Vec<Record>, StorageError>> + Send;

    fn find_by_id(
        &self,
        id: RecordId,
    ) -> impl Future<Output = Result<Option<Record>, StorageError>> + Send;

    /// Returns the record holding `order`, lowest id first if several do.
    fn find_by_order(
        &self,
        order: u64,
    ) -> impl Future<Output = Result<Option<Record>, StorageError>> + Send;

    /// Creates a record and assigns its id.
    fn create(
        &self,
        record: NewRecord,
    ) -> impl Future<Output = Result<Record, StorageError>> + Send;

    /// Applies `patch` and returns the updated record.
    /// Fails with `RecordNotFound` if `id` does not exist.
    fn update_by_id(
        &self,
        id: RecordId,
        patch: RecordPatch,
    ) -> impl Future<Output = Result<Record, StorageError>> + Send;

    /// Fails with `RecordNotFound` if `id` does not exist.
    fn delete_by_id(&self, id: RecordId) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn count_all(
        &self,
        filter: &RecordFilter,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Applies several patches in one call.
    fn bulk_update(
        &self,
        updates: Vec<(RecordId, RecordPatch)>,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Whether [`apply_batch`](Self::apply_batch) is available.
    fn supports_atomic_batches(&self) -> bool {
        false
    }

    /// Applies all ops or none of them.
    ///
    /// Returns one record per `Create`/`Update` op, in op order. Stores
    /// without a transaction primitive keep the default.
    fn apply_batch(
        &self,
        _ops: Vec<WriteOp>,
    ) -> impl Future<Output = Result<Vec<Record>, StorageError>> + Send {
        async { Err(StorageError::Unsupported("atomic write batches".into())) }
    }
}
