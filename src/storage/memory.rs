use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::contracts::{
    current_timestamp_ms, IdGenerator, LockResultExt, NewRecord, Record, RecordFilter, RecordId,
    RecordPatch, RecordStore, StorageError, WriteOp,
};
use crate::storage::AtomicIdGenerator;

/// In-process record store.
///
/// Batches are applied to a copy of the collection and swapped in only when
/// every op succeeds, so `apply_batch` is all-or-nothing.
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<RecordId, Record>>,
    ids: AtomicIdGenerator,
    atomic_batches: bool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            ids: AtomicIdGenerator::new(),
            atomic_batches: true,
        }
    }

    /// A store that reports no transaction support, forcing callers onto
    /// sequential writes.
    pub fn without_atomic_batches() -> Self {
        Self {
            atomic_batches: false,
            ..Self::new()
        }
    }

    /// Seeds the store with existing records, keeping their ids and orders
    /// as given (gaps and duplicates included).
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        {
            let mut map = store
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for record in records {
                store.ids.observe(record.id.0);
                map.insert(record.id, record);
            }
        }
        store
    }

    /// All records sorted by `(order, id)`.
    pub fn snapshot(&self) -> Result<Vec<Record>, StorageError> {
        let map = self.records.read().map_lock_err()?;
        let mut records: Vec<Record> = map.values().cloned().collect();
        RecordFilter::all().arrange(&mut records);
        Ok(records)
    }

    fn insert_new(
        &self,
        map: &mut BTreeMap<RecordId, Record>,
        new: NewRecord,
        now_ms: i64,
    ) -> Result<Record, StorageError> {
        let id = RecordId(self.ids.next()?);
        let record = new.into_record(id, now_ms);
        map.insert(id, record.clone());
        Ok(record)
    }

    fn patch_existing(
        map: &mut BTreeMap<RecordId, Record>,
        id: RecordId,
        patch: &RecordPatch,
        now_ms: i64,
    ) -> Result<Record, StorageError> {
        let record = map.get_mut(&id).ok_or(StorageError::RecordNotFound(id))?;
        patch.apply_to(record, now_ms);
        Ok(record.clone())
    }

    fn remove_existing(
        map: &mut BTreeMap<RecordId, Record>,
        id: RecordId,
    ) -> Result<(), StorageError> {
        map.remove(&id)
            .map(|_| ())
            .ok_or(StorageError::RecordNotFound(id))
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    async fn find_all(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError> {
        let map = self.records.read().map_lock_err()?;
        let mut records: Vec<Record> = map
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        filter.arrange(&mut records);
        Ok(records)
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>, StorageError> {
        let map = self.records.read().map_lock_err()?;
        Ok(map.get(&id).cloned())
    }

    async fn find_by_order(&self, order: u64) -> Result<Option<Record>, StorageError> {
        let map = self.records.read().map_lock_err()?;
        // BTreeMap iterates by id, so the first hit is the lowest id.
        Ok(map.values().find(|r| r.order == order).cloned())
    }

    async fn create(&self, record: NewRecord) -> Result<Record, StorageError> {
        let mut map = self.records.write().map_lock_err()?;
        self.insert_new(&mut map, record, current_timestamp_ms())
    }

    async fn update_by_id(&self, id: RecordId, patch: RecordPatch) -> Result<Record, StorageError> {
        let mut map = self.records.write().map_lock_err()?;
        Self::patch_existing(&mut map, id, &patch, current_timestamp_ms())
    }

    async fn delete_by_id(&self, id: RecordId) -> Result<(), StorageError> {
        let mut map = self.records.write().map_lock_err()?;
        Self::remove_existing(&mut map, id)
    }

    async fn count_all(&self, filter: &RecordFilter) -> Result<u64, StorageError> {
        let map = self.records.read().map_lock_err()?;
        Ok(map.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn bulk_update(&self, updates: Vec<(RecordId, RecordPatch)>) -> Result<(), StorageError> {
        let mut map = self.records.write().map_lock_err()?;
        let now_ms = current_timestamp_ms();
        for (id, patch) in &updates {
            Self::patch_existing(&mut map, *id, patch, now_ms)?;
        }
        Ok(())
    }

    fn supports_atomic_batches(&self) -> bool {
        self.atomic_batches
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<Vec<Record>, StorageError> {
        if !self.atomic_batches {
            return Err(StorageError::Unsupported("atomic write batches".into()));
        }

        let mut map = self.records.write().map_lock_err()?;
        let mut staged = map.clone();
        let now_ms = current_timestamp_ms();
        let mut written = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                WriteOp::Create(new) => written.push(self.insert_new(&mut staged, new, now_ms)?),
                WriteOp::Update(id, patch) => {
                    written.push(Self::patch_existing(&mut staged, id, &patch, now_ms)?)
                }
                WriteOp::Delete(id) => Self::remove_existing(&mut staged, id)?,
            }
        }

        *map = staged;
        Ok(written)
    }
}
