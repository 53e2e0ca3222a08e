//! Crash recovery tests for the timeline sequencer.
//!
//! These tests verify that sequenced data survives restarts and that a write
//! sequence interrupted part-way is repaired.
//! Run with: cargo test --test crash_recovery_tests

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use timeline::contracts::{
    Fields, NewRecord, Record, RecordFilter, RecordId, RecordPatch, RecordStore, Sequencer,
    SequencerError, StorageError,
};
use timeline::sequencer::{OrdinalSequencer, SequencerConfig};
use timeline::storage::{MemoryRecordStore, RocksDbRecordStore};

fn create_store_at(dir: &std::path::Path) -> RocksDbRecordStore {
    RocksDbRecordStore::open(dir).expect("Failed to open store")
}

fn titled(title: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("title".into(), json!(title));
    fields
}

async fn titles<S: RecordStore>(seq: &OrdinalSequencer<S>) -> Vec<(String, u64)> {
    seq.list()
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.fields["title"].as_str().unwrap().to_string(), r.order))
        .collect()
}

fn pairs(expected: &[(&str, u64)]) -> Vec<(String, u64)> {
    expected.iter().map(|(t, o)| (t.to_string(), *o)).collect()
}

/// Store wrapper that starts failing `update_by_id` after a set number of
/// successful calls, or reports one id as missing. Reports no atomic batches,
/// so the sequencer writes one record at a time.
struct FlakyStore<S> {
    inner: S,
    updates_left: AtomicUsize,
    /// `update_by_id` on this id fails with `RecordNotFound`; 0 disables
    vanished: AtomicU64,
}

impl<S: RecordStore> FlakyStore<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            updates_left: AtomicUsize::new(usize::MAX),
            vanished: AtomicU64::new(0),
        }
    }

    fn vanish(&self, id: RecordId) {
        self.vanished.store(id.0, Ordering::SeqCst);
    }

    fn fail_after(&self, updates: usize) {
        self.updates_left.store(updates, Ordering::SeqCst);
    }

    fn take_update(&self) -> Result<(), StorageError> {
        self.updates_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .map(|_| ())
            .map_err(|_| StorageError::Io("injected write failure".into()))
    }
}

impl<S: RecordStore> RecordStore for FlakyStore<S> {
    async fn find_all(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError> {
        self.inner.find_all(filter).await
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>, StorageError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_order(&self, order: u64) -> Result<Option<Record>, StorageError> {
        self.inner.find_by_order(order).await
    }

    async fn create(&self, record: NewRecord) -> Result<Record, StorageError> {
        self.inner.create(record).await
    }

    async fn update_by_id(&self, id: RecordId, patch: RecordPatch) -> Result<Record, StorageError> {
        if self.vanished.load(Ordering::SeqCst) == id.0 {
            return Err(StorageError::RecordNotFound(id));
        }
        self.take_update()?;
        self.inner.update_by_id(id, patch).await
    }

    async fn delete_by_id(&self, id: RecordId) -> Result<(), StorageError> {
        self.inner.delete_by_id(id).await
    }

    async fn count_all(&self, filter: &RecordFilter) -> Result<u64, StorageError> {
        self.inner.count_all(filter).await
    }

    async fn bulk_update(&self, updates: Vec<(RecordId, RecordPatch)>) -> Result<(), StorageError> {
        self.inner.bulk_update(updates).await
    }
}

fn flaky_sequencer<S: RecordStore>(
    inner: S,
    repair_on_failure: bool,
) -> OrdinalSequencer<FlakyStore<S>> {
    OrdinalSequencer::new(
        Arc::new(FlakyStore::new(inner)),
        SequencerConfig {
            repair_on_failure,
            ..SequencerConfig::default()
        },
    )
}

async fn seed<S: RecordStore>(seq: &OrdinalSequencer<S>, titles: &[&str]) -> Vec<RecordId> {
    let mut ids = Vec::new();
    for title in titles {
        ids.push(seq.insert_at(None, titled(title)).await.unwrap().record.id);
    }
    ids
}

// =============================================================================
// Restart Tests
// =============================================================================

/// Orders, payloads and ids survive a clean shutdown and restart.
#[tokio::test]
async fn sequenced_data_survives_restart() {
    let dir = TempDir::new().unwrap();

    // Phase 1: build a timeline with shifts in both directions
    let max_id = {
        let seq = OrdinalSequencer::new(
            Arc::new(create_store_at(dir.path())),
            SequencerConfig::default(),
        );
        let ids = seed(&seq, &["A", "B", "C", "D"]).await;
        seq.insert_at(Some(1), titled("E")).await.unwrap();
        seq.move_to(ids[3], 2).await.unwrap();
        seq.delete_at(ids[1]).await.unwrap();
        seq.list().await.unwrap().iter().map(|r| r.id).max().unwrap()
    };

    // Phase 2: reopen and verify
    let seq = OrdinalSequencer::new(
        Arc::new(create_store_at(dir.path())),
        SequencerConfig::default(),
    );
    assert_eq!(
        titles(&seq).await,
        pairs(&[("E", 1), ("D", 2), ("A", 3), ("C", 4)])
    );
    assert_eq!(seq.verify().await.unwrap(), None);

    let placed = seq.insert_at(None, titled("F")).await.unwrap();
    assert!(placed.record.id > max_id, "ids must not be reused after restart");
    assert_eq!(placed.record.order, 5);
}

/// Several reopen cycles, each adding records, never corrupt the ordering.
#[tokio::test]
async fn rapid_restarts_no_corruption() {
    let dir = TempDir::new().unwrap();

    for round in 0..5u64 {
        let seq = OrdinalSequencer::new(
            Arc::new(create_store_at(dir.path())),
            SequencerConfig::default(),
        );
        seq.insert_at(Some(1), titled(&format!("front-{round}")))
            .await
            .unwrap();
        seq.insert_at(None, titled(&format!("back-{round}")))
            .await
            .unwrap();

        let records = seq.list().await.unwrap();
        assert_eq!(records.len() as u64, (round + 1) * 2);
        assert_eq!(seq.verify().await.unwrap(), None);
    }
}

// =============================================================================
// Interrupted Write Sequences
// =============================================================================

/// An insert that fails part-way through its shifts is repaired before the
/// error is returned.
#[tokio::test]
async fn interrupted_insert_is_repaired() {
    let seq = flaky_sequencer(MemoryRecordStore::new(), true);
    seed(&seq, &["A", "B", "C", "D"]).await;

    // Shifts run D, C, B; the third one fails
    seq.store().fail_after(2);
    let err = seq.insert_at(Some(1), titled("E")).await.unwrap_err();
    assert!(matches!(err, SequencerError::Storage(StorageError::Io(_))));

    assert_eq!(seq.verify().await.unwrap(), None);
    assert_eq!(
        titles(&seq).await,
        pairs(&[("A", 1), ("B", 2), ("C", 3), ("D", 4)])
    );
    assert_eq!(seq.metrics().snapshot().partial_failures_total, 1);
}

/// An interrupted delete still closes the gap once repaired.
#[tokio::test]
async fn interrupted_delete_is_repaired() {
    let seq = flaky_sequencer(MemoryRecordStore::new(), true);
    let ids = seed(&seq, &["A", "B", "C", "D"]).await;

    seq.store().fail_after(1);
    assert!(seq.delete_at(ids[1]).await.is_err());

    assert_eq!(
        titles(&seq).await,
        pairs(&[("A", 1), ("C", 2), ("D", 3)])
    );
}

/// An interrupted move leaves every record in place with dense orders.
#[tokio::test]
async fn interrupted_move_is_repaired() {
    let seq = flaky_sequencer(MemoryRecordStore::new(), true);
    let ids = seed(&seq, &["A", "B", "C", "D", "E"]).await;

    seq.store().fail_after(2);
    assert!(seq.move_to(ids[0], 5).await.is_err());

    let records = seq.list().await.unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(seq.verify().await.unwrap(), None);
}

/// Without repair the drift survives a restart; verification finds it and a
/// renumber fixes it.
#[tokio::test]
async fn unrepaired_drift_is_detected_after_restart() {
    let dir = TempDir::new().unwrap();

    {
        let seq = flaky_sequencer(create_store_at(dir.path()), false);
        seed(&seq, &["A", "B", "C", "D"]).await;

        seq.store().fail_after(2);
        assert!(seq.insert_at(Some(1), titled("E")).await.is_err());
        assert!(seq.verify().await.unwrap().is_some());
    }

    let seq = OrdinalSequencer::new(
        Arc::new(create_store_at(dir.path())),
        SequencerConfig::default(),
    );
    let violation = seq.verify().await.unwrap().expect("drift should persist");
    assert_eq!(violation.position, 3);
    assert_eq!(violation.found, 4);

    assert_eq!(seq.renumber_all().await.unwrap(), 2);
    assert_eq!(
        titles(&seq).await,
        pairs(&[("A", 1), ("B", 2), ("C", 3), ("D", 4)])
    );
}

// =============================================================================
// Missing Records Mid-Sequence
// =============================================================================

/// A neighbour that disappears mid-shift is a storage failure, not a
/// `NotFound` for the record the caller asked to move.
#[tokio::test]
async fn missing_neighbour_surfaces_as_storage_error() {
    let seq = flaky_sequencer(MemoryRecordStore::new(), true);
    let ids = seed(&seq, &["A", "B", "C"]).await;

    // Moving C to 1 shifts B then A
    seq.store().vanish(ids[1]);
    let err = seq.move_to(ids[2], 1).await.unwrap_err();
    assert!(
        matches!(err, SequencerError::Storage(StorageError::RecordNotFound(id)) if id == ids[1]),
        "unexpected error: {err:?}"
    );
    assert_eq!(seq.metrics().snapshot().partial_failures_total, 1);

    let err = seq.delete_at(ids[0]).await.unwrap_err();
    assert!(matches!(
        err,
        SequencerError::Storage(StorageError::RecordNotFound(_))
    ));
}

/// The target itself disappearing mid-sequence is still `NotFound`.
#[tokio::test]
async fn missing_target_is_not_found() {
    let seq = flaky_sequencer(MemoryRecordStore::new(), true);
    let ids = seed(&seq, &["A", "B", "C"]).await;

    seq.store().vanish(ids[2]);
    let err = seq.move_to(ids[2], 1).await.unwrap_err();
    assert!(
        matches!(err, SequencerError::NotFound(id) if id == ids[2]),
        "unexpected error: {err:?}"
    );
}
