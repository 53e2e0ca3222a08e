#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use timeline::contracts::{Fields, Sequencer};
use timeline::sequencer::{OrdinalSequencer, SequencerConfig};
use timeline::storage::MemoryRecordStore;

fuzz_target!(|data: &[u8]| {
    // Each 3-byte chunk is one operation: kind, record pick, position
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let atomic = data.first().is_some_and(|b| b & 1 == 0);
    let store = if atomic {
        MemoryRecordStore::new()
    } else {
        MemoryRecordStore::without_atomic_batches()
    };
    let seq = OrdinalSequencer::new(Arc::new(store), SequencerConfig::default());

    rt.block_on(async {
        for chunk in data.chunks_exact(3) {
            let (kind, pick, position) = (chunk[0], chunk[1] as usize, chunk[2] as i8 as i64);
            let records = seq.list().await.unwrap();

            match kind % 3 {
                0 => {
                    let candidate = (position != 0).then_some(position);
                    seq.insert_at(candidate, Fields::new()).await.unwrap();
                }
                1 if !records.is_empty() => {
                    let id = records[pick % records.len()].id;
                    seq.move_to(id, position).await.unwrap();
                }
                2 if !records.is_empty() => {
                    let id = records[pick % records.len()].id;
                    seq.delete_at(id).await.unwrap();
                }
                _ => continue,
            }

            assert_eq!(seq.verify().await.unwrap(), None, "orders drifted");
        }
    });
});
