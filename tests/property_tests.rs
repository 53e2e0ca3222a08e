//! Property tests for the ordinal sequencer.
//!
//! Each property is a harness function generic over the record store; the
//! proptest cases at the bottom run it against the in-memory store (with and
//! without atomic batches) and against RocksDB.
//! Run with: cargo test --test property_tests

use std::future::Future;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;

use timeline::contracts::{Fields, RecordId, RecordStore, Sequencer};
use timeline::sequencer::{check_density, OrdinalSequencer, SequencerConfig};
use timeline::storage::{MemoryRecordStore, RocksDbRecordStore};

/// One sequencer call. Indexes pick a record by position in the current
/// listing, modulo its length.
#[derive(Debug, Clone)]
enum Op {
    Insert(Option<i64>),
    Move(usize, i64),
    Delete(usize),
}

fn titled(title: String) -> Fields {
    let mut fields = Fields::new();
    fields.insert("title".into(), json!(title));
    fields
}

async fn layout<S: RecordStore>(seq: &OrdinalSequencer<S>) -> Vec<(RecordId, u64)> {
    seq.list()
        .await
        .expect("list should succeed")
        .into_iter()
        .map(|r| (r.id, r.order))
        .collect()
}

async fn seed<S: RecordStore>(seq: &OrdinalSequencer<S>, candidates: &[Option<i64>]) {
    for (i, candidate) in candidates.iter().enumerate() {
        seq.insert_at(*candidate, titled(format!("seed-{i}")))
            .await
            .expect("seed insert should succeed");
    }
}

fn assert_dense(layout: &[(RecordId, u64)], context: &str) {
    let orders: Vec<u64> = layout.iter().map(|(_, order)| *order).collect();
    let expected: Vec<u64> = (1..=layout.len() as u64).collect();
    assert_eq!(orders, expected, "orders not dense after {context}");
}

// =============================================================================
// Density
// =============================================================================

/// Property: after every completed insert, move or delete the orders are
/// exactly `1..=N`.
async fn prop_density<S: RecordStore>(seq: &OrdinalSequencer<S>, ops: &[Op]) {
    for (step, op) in ops.iter().enumerate() {
        let current = layout(seq).await;
        match op {
            Op::Insert(candidate) => {
                seq.insert_at(*candidate, titled(format!("op-{step}")))
                    .await
                    .expect("insert should succeed");
            }
            Op::Move(pick, to) if !current.is_empty() => {
                let (id, _) = current[pick % current.len()];
                seq.move_to(id, *to).await.expect("move should succeed");
            }
            Op::Delete(pick) if !current.is_empty() => {
                let (id, _) = current[pick % current.len()];
                seq.delete_at(id).await.expect("delete should succeed");
            }
            _ => continue,
        }

        let after = layout(seq).await;
        assert_dense(&after, &format!("{op:?}"));
        let records = seq.list().await.expect("list should succeed");
        assert_eq!(check_density(&records), None);
    }
}

// =============================================================================
// Insert at front / append
// =============================================================================

/// Property: inserting at 1 puts the new record first and pushes every other
/// record back by one, preserving their relative order.
async fn prop_insert_at_front<S: RecordStore>(seq: &OrdinalSequencer<S>, seeds: &[Option<i64>]) {
    seed(seq, seeds).await;
    let before = layout(seq).await;

    let placed = seq
        .insert_at(Some(1), titled("front".into()))
        .await
        .expect("insert should succeed");
    assert_eq!(placed.record.order, 1);
    assert_eq!(placed.shifted, before.len());

    let after = layout(seq).await;
    assert_eq!(after[0], (placed.record.id, 1));
    let shifted: Vec<(RecordId, u64)> = before.iter().map(|(id, o)| (*id, o + 1)).collect();
    assert_eq!(&after[1..], shifted.as_slice());
}

/// Property: appending, with no position or with `N + 1`, shifts nothing.
async fn prop_append<S: RecordStore>(
    seq: &OrdinalSequencer<S>,
    seeds: &[Option<i64>],
    explicit: bool,
) {
    seed(seq, seeds).await;
    let before = layout(seq).await;
    let candidate = explicit.then(|| before.len() as i64 + 1);

    let placed = seq
        .insert_at(candidate, titled("tail".into()))
        .await
        .expect("insert should succeed");
    assert_eq!(placed.shifted, 0);
    assert_eq!(placed.record.order, before.len() as u64 + 1);

    let after = layout(seq).await;
    assert_eq!(&after[..before.len()], before.as_slice());
}

// =============================================================================
// Moves
// =============================================================================

/// Property: moving a record to its own position changes no order.
async fn prop_move_in_place<S: RecordStore>(
    seq: &OrdinalSequencer<S>,
    seeds: &[Option<i64>],
    pick: usize,
) {
    seed(seq, seeds).await;
    let before = layout(seq).await;
    let (id, order) = before[pick % before.len()];

    let moved = seq
        .move_to(id, order as i64)
        .await
        .expect("move should succeed");
    assert!(!moved.order_changed());
    assert!(!moved.resequenced);
    assert_eq!(layout(seq).await, before);
}

/// Property: moving away and back restores the original ordering.
async fn prop_move_round_trip<S: RecordStore>(
    seq: &OrdinalSequencer<S>,
    seeds: &[Option<i64>],
    pick: usize,
    to: i64,
) {
    seed(seq, seeds).await;
    let before = layout(seq).await;
    let (id, original) = before[pick % before.len()];

    seq.move_to(id, to).await.expect("move should succeed");
    assert_dense(&layout(seq).await, "move away");

    seq.move_to(id, original as i64)
        .await
        .expect("move back should succeed");
    assert_eq!(layout(seq).await, before);
}

// =============================================================================
// Delete then renumber
// =============================================================================

/// Property: a renumber right after a delete has nothing to change.
async fn prop_delete_then_renumber<S: RecordStore>(
    seq: &OrdinalSequencer<S>,
    seeds: &[Option<i64>],
    pick: usize,
) {
    seed(seq, seeds).await;
    let before = layout(seq).await;
    let (id, _) = before[pick % before.len()];

    seq.delete_at(id).await.expect("delete should succeed");
    assert_eq!(seq.renumber_all().await.expect("renumber should succeed"), 0);
    assert_eq!(layout(seq).await.len(), before.len() - 1);
}

// =============================================================================
// Worked examples
// =============================================================================

async fn titles<S: RecordStore>(seq: &OrdinalSequencer<S>) -> Vec<(String, u64)> {
    seq.list()
        .await
        .expect("list should succeed")
        .into_iter()
        .map(|r| (r.fields["title"].as_str().unwrap_or_default().to_string(), r.order))
        .collect()
}

fn pairs(expected: &[(&str, u64)]) -> Vec<(String, u64)> {
    expected.iter().map(|(t, o)| (t.to_string(), *o)).collect()
}

async fn seed_titles<S: RecordStore>(seq: &OrdinalSequencer<S>, titles: &[&str]) -> Vec<RecordId> {
    let mut ids = Vec::new();
    for title in titles {
        let placed = seq
            .insert_at(None, titled(title.to_string()))
            .await
            .expect("insert should succeed");
        ids.push(placed.record.id);
    }
    ids
}

async fn scenario_insert_in_middle<S: RecordStore>(seq: &OrdinalSequencer<S>) {
    seed_titles(seq, &["A", "B", "C"]).await;
    let placed = seq
        .insert_at(Some(2), titled("D".into()))
        .await
        .expect("insert should succeed");
    assert_eq!(placed.record.order, 2);
    assert_eq!(
        titles(seq).await,
        pairs(&[("A", 1), ("D", 2), ("B", 3), ("C", 4)])
    );
}

async fn scenario_move_earlier<S: RecordStore>(seq: &OrdinalSequencer<S>) {
    let ids = seed_titles(seq, &["A", "B", "C", "D"]).await;
    seq.move_to(ids[3], 2).await.expect("move should succeed");
    assert_eq!(
        titles(seq).await,
        pairs(&[("A", 1), ("D", 2), ("B", 3), ("C", 4)])
    );
}

async fn scenario_delete_middle<S: RecordStore>(seq: &OrdinalSequencer<S>) {
    let ids = seed_titles(seq, &["A", "B", "C"]).await;
    seq.delete_at(ids[1]).await.expect("delete should succeed");
    assert_eq!(titles(seq).await, pairs(&[("A", 1), ("C", 2)]));
}

// =============================================================================
// Store wiring
// =============================================================================

fn memory_sequencer() -> OrdinalSequencer<MemoryRecordStore> {
    OrdinalSequencer::new(Arc::new(MemoryRecordStore::new()), SequencerConfig::default())
}

fn sequential_sequencer() -> OrdinalSequencer<MemoryRecordStore> {
    OrdinalSequencer::new(
        Arc::new(MemoryRecordStore::without_atomic_batches()),
        SequencerConfig::default(),
    )
}

fn rocksdb_sequencer() -> (OrdinalSequencer<RocksDbRecordStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = RocksDbRecordStore::open(dir.path()).unwrap();
    (
        OrdinalSequencer::new(Arc::new(store), SequencerConfig::default()),
        dir,
    )
}

fn run<F: Future<Output = ()>>(future: F) {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Runs a harness against every store.
macro_rules! against_all_stores {
    ($harness:ident $(, $arg:expr)*) => {
        run(async {
            $harness(&memory_sequencer() $(, $arg)*).await;
            $harness(&sequential_sequencer() $(, $arg)*).await;
            let (seq, _dir) = rocksdb_sequencer();
            $harness(&seq $(, $arg)*).await;
        })
    };
}

#[test]
fn insert_in_the_middle_example() {
    against_all_stores!(scenario_insert_in_middle);
}

#[test]
fn move_earlier_example() {
    against_all_stores!(scenario_move_earlier);
}

#[test]
fn delete_in_the_middle_example() {
    against_all_stores!(scenario_delete_middle);
}

fn arb_candidate() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        1 => Just(None),
        4 => (-2i64..12).prop_map(Some),
    ]
}

fn arb_seeds(max: usize) -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(arb_candidate(), 1..max)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_candidate().prop_map(Op::Insert),
        3 => (any::<usize>(), -2i64..12).prop_map(|(pick, to)| Op::Move(pick, to)),
        2 => any::<usize>().prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn density_holds_after_every_operation(ops in prop::collection::vec(arb_op(), 1..40)) {
        against_all_stores!(prop_density, &ops);
    }

    #[test]
    fn insert_at_front_shifts_everything(seeds in arb_seeds(12)) {
        against_all_stores!(prop_insert_at_front, &seeds);
    }

    #[test]
    fn append_shifts_nothing(seeds in arb_seeds(12), explicit in any::<bool>()) {
        against_all_stores!(prop_append, &seeds, explicit);
    }

    #[test]
    fn move_to_own_position_is_a_no_op(seeds in arb_seeds(12), pick in any::<usize>()) {
        against_all_stores!(prop_move_in_place, &seeds, pick);
    }

    #[test]
    fn move_round_trip_restores_ordering(
        seeds in arb_seeds(12),
        pick in any::<usize>(),
        to in -2i64..16
    ) {
        against_all_stores!(prop_move_round_trip, &seeds, pick, to);
    }

    #[test]
    fn delete_leaves_nothing_to_renumber(seeds in arb_seeds(12), pick in any::<usize>()) {
        against_all_stores!(prop_delete_then_renumber, &seeds, pick);
    }
}
