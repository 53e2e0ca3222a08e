use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::contracts::error::{InvariantViolation, SequencerError};
use crate::contracts::{Fields, Record, RecordId};

/// Keeps the `order` field of a collection dense.
///
/// # Invariants
/// - Between operations the stored orders are exactly `1..=N`
/// - Insert, move and delete shift neighbours in the same logical operation
/// - Moving a record never changes the collection size
pub trait Sequencer: Send + Sync {
    /// Creates a record at `candidate` (append when `None`), shifting every
    /// record at or after that position up by one.
    ///
    /// `candidate` is clamped into `1..=N+1`.
    fn insert_at(
        &self,
        candidate: Option<i64>,
        fields: Fields,
    ) -> impl Future<Output = Result<Placement, SequencerError>> + Send;

    /// Moves a record to `new_order`, clamped into `1..=N`.
    fn move_to(
        &self,
        id: RecordId,
        new_order: i64,
    ) -> impl Future<Output = Result<Moved, SequencerError>> + Send {
        self.update(id, RecordUpdate::move_to(new_order))
    }

    /// Applies a field patch and an optional move as one operation.
    fn update(
        &self,
        id: RecordId,
        update: RecordUpdate,
    ) -> impl Future<Output = Result<Moved, SequencerError>> + Send;

    /// Removes a record and closes the gap it leaves.
    fn delete_at(&self, id: RecordId)
        -> impl Future<Output = Result<Removal, SequencerError>> + Send;

    /// Rewrites every order to its 1-based position in `(order, id)` order.
    /// Returns the number of records whose order changed.
    fn renumber_all(&self) -> impl Future<Output = Result<usize, SequencerError>> + Send;

    /// All records sorted by `(order, id)`.
    fn list(&self) -> impl Future<Output = Result<Vec<Record>, SequencerError>> + Send;

    fn get(&self, id: RecordId) -> impl Future<Output = Result<Record, SequencerError>> + Send;

    fn record_at(
        &self,
        order: u64,
    ) -> impl Future<Output = Result<Option<Record>, SequencerError>> + Send;

    fn next_order(&self) -> impl Future<Output = Result<NextOrder, SequencerError>> + Send;

    /// Checks density without writing anything.
    fn verify(
        &self,
    ) -> impl Future<Output = Result<Option<InvariantViolation>, SequencerError>> + Send;
}

/// Result of an insert.
#[derive(Debug, Clone, Serialize)]
pub struct Placement {
    pub record: Record,
    /// Records pushed one position later to make room.
    pub shifted: usize,
}

/// Result of an update or move.
#[derive(Debug, Clone, Serialize)]
pub struct Moved {
    pub record: Record,
    pub previous_order: u64,
    /// Whether the post-move density check had to rewrite the collection.
    pub resequenced: bool,
}

impl Moved {
    pub fn order_changed(&self) -> bool {
        self.record.order != self.previous_order
    }
}

/// Result of a delete.
#[derive(Debug, Clone, Serialize)]
pub struct Removal {
    pub id: RecordId,
    pub order: u64,
    /// Records pulled one position earlier.
    pub shifted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextOrder {
    pub next_order: u64,
    pub total: u64,
}

/// Requested changes for [`Sequencer::update`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordUpdate {
    pub order: Option<i64>,
    pub fields: Option<Fields>,
}

impl RecordUpdate {
    pub fn move_to(order: i64) -> Self {
        Self {
            order: Some(order),
            fields: None,
        }
    }
}
