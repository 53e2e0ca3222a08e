//! Pure planning: clamping, neighbour shifts and density checks.

use crate::contracts::{InvariantViolation, Record, RecordFilter, RecordId, RecordPatch};

/// Position for a new record: `None` appends, otherwise clamped into `1..=total+1`.
pub fn clamp_insert(candidate: Option<i64>, total: u64) -> u64 {
    let append = total.saturating_add(1);
    match candidate {
        None => append,
        Some(c) if c < 1 => 1,
        Some(c) => (c as u64).min(append),
    }
}

/// Destination for a move, clamped into `1..=total`.
pub fn clamp_move(requested: i64, total: u64) -> u64 {
    if requested < 1 {
        1
    } else {
        (requested as u64).min(total.max(1))
    }
}

/// Neighbour adjustment needed when a record moves from `from` to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    /// Orders in `first..=last` move one later.
    Up { first: u64, last: u64 },
    /// Orders in `first..=last` move one earlier.
    Down { first: u64, last: u64 },
}

impl Shift {
    /// `None` when the record stays where it is.
    pub fn for_move(from: u64, to: u64) -> Option<Self> {
        use std::cmp::Ordering;
        match to.cmp(&from) {
            Ordering::Less => Some(Shift::Up {
                first: to,
                last: from - 1,
            }),
            Ordering::Greater => Some(Shift::Down {
                first: from + 1,
                last: to,
            }),
            Ordering::Equal => None,
        }
    }

    /// Selects the affected neighbours in the order their writes must be
    /// issued: increments from the top down, decrements from the bottom up,
    /// so no write lands on an order another record still holds.
    pub fn neighbours(&self, moving: RecordId) -> RecordFilter {
        match *self {
            Shift::Up { first, last } => RecordFilter::order_between(first, last)
                .excluding(moving)
                .descending(),
            Shift::Down { first, last } => {
                RecordFilter::order_between(first, last).excluding(moving)
            }
        }
    }

    pub fn apply(&self, order: u64) -> u64 {
        match self {
            Shift::Up { .. } => order + 1,
            Shift::Down { .. } => order.saturating_sub(1),
        }
    }
}

/// Finds the first record whose order differs from its 1-based position.
///
/// `sorted` must be in `(order, id)` ascending order.
pub fn check_density(sorted: &[Record]) -> Option<InvariantViolation> {
    let total = sorted.len() as u64;
    sorted
        .iter()
        .zip(1u64..)
        .find(|(record, position)| record.order != *position)
        .map(|(record, position)| InvariantViolation {
            position,
            id: record.id,
            found: record.order,
            total,
        })
}

/// Which records a resequence writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// Every record, whether or not its order changes.
    All,
    /// Only records whose order changes.
    Changed,
}

/// Order patches assigning each record its 1-based position.
///
/// `sorted` must be in `(order, id)` ascending order.
pub fn resequence_plan(sorted: &[Record], rewrite: Rewrite) -> Vec<(RecordId, RecordPatch)> {
    sorted
        .iter()
        .zip(1u64..)
        .filter(|(record, position)| rewrite == Rewrite::All || record.order != *position)
        .map(|(record, position)| (record.id, RecordPatch::order(position)))
        .collect()
}
