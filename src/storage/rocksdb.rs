use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rocksdb::{Direction, IteratorMode, Options, ReadOptions, WriteBatch, DB};

use crate::contracts::{
    current_timestamp_ms, IdGenerator, LockResultExt, NewRecord, Record, RecordFilter, RecordId,
    RecordPatch, RecordStore, SortDirection, StorageError, WriteOp,
};
use crate::storage::AtomicIdGenerator;

/// Key prefix for record bodies
const RECORD_PREFIX: &str = "rec";
/// Key prefix for the (order, id) secondary index
const ORDER_INDEX_PREFIX: &str = "ord";
/// Upper bound for index scans: ';' sorts right after ':'
const ORDER_INDEX_END: &str = "ord;";
/// Highest record id ever written
const LAST_ID_KEY: &str = "meta:last_id";

/// RocksDB-backed record store.
///
/// Layout:
/// - `rec:{id_hex}` → record as JSON
/// - `ord:{order_hex}:{id_hex}` → empty, one per record
/// - `meta:last_id` → big-endian u64
///
/// Every mutation, single or batched, is one `WriteBatch`, so a record and
/// its index entry never diverge.
pub struct RocksDbRecordStore {
    db: DB,
    ids: AtomicIdGenerator,
    /// Serializes read-modify-write batch construction
    write_lock: Mutex<()>,
}

impl RocksDbRecordStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)
            .map_err(|e| StorageError::Io(format!("{}: {}", path.display(), e)))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let parallelism = std::thread::available_parallelism()
            .map(|p| p.get() as i32)
            .unwrap_or(2);
        opts.increase_parallelism(parallelism.min(4));

        let db = DB::open(&opts, path).map_err(|e| StorageError::RocksDb(e.to_string()))?;

        let last_id = match db.get(LAST_ID_KEY.as_bytes()) {
            Ok(Some(bytes)) => Self::parse_u64_be(&bytes)?,
            Ok(None) => 0,
            Err(e) => return Err(StorageError::RocksDb(e.to_string())),
        };

        tracing::debug!(path = %path.display(), last_id, "Opened record store");

        Ok(Self {
            db,
            ids: AtomicIdGenerator::starting_from(last_id),
            write_lock: Mutex::new(()),
        })
    }

    /// Creates a record key.
    fn record_key(id: RecordId) -> String {
        format!("{}:{:016x}", RECORD_PREFIX, id.0)
    }

    /// Creates an order index key.
    /// Format: ord:{order_hex}:{id_hex}
    fn order_key(order: u64, id: RecordId) -> String {
        format!("{}:{:016x}:{:016x}", ORDER_INDEX_PREFIX, order, id.0)
    }

    /// Parses an order index key into `(order, id)`.
    fn parse_order_key(key: &[u8]) -> Option<(u64, RecordId)> {
        let key = std::str::from_utf8(key).ok()?;
        let mut parts = key.split(':');
        if parts.next()? != ORDER_INDEX_PREFIX {
            return None;
        }
        let order = u64::from_str_radix(parts.next()?, 16).ok()?;
        let id = u64::from_str_radix(parts.next()?, 16).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((order, RecordId(id)))
    }

    /// First index key that can hold `order`.
    fn order_index_start(order: u64) -> String {
        format!("{}:{:016x}:", ORDER_INDEX_PREFIX, order)
    }

    /// Exclusive upper bound for an index scan ending at `max` (inclusive).
    fn order_index_upper(max: Option<u64>) -> String {
        match max.and_then(|m| m.checked_add(1)) {
            Some(bound) => Self::order_index_start(bound),
            None => ORDER_INDEX_END.to_string(),
        }
    }

    #[inline]
    fn parse_u64_be(bytes: &[u8]) -> Result<u64, StorageError> {
        bytes
            .try_into()
            .map(u64::from_be_bytes)
            .map_err(|_| StorageError::Serialization("Invalid u64 bytes".into()))
    }

    fn get_record(&self, id: RecordId) -> Result<Option<Record>, StorageError> {
        match self.db.get(Self::record_key(id).as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(Record::from_bytes(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::RocksDb(e.to_string())),
        }
    }

    /// Walks the order index in the filter's direction and returns matching
    /// `(order, id)` keys, stopping once the limit is reached.
    fn scan_index(&self, filter: &RecordFilter) -> Result<Vec<(u64, RecordId)>, StorageError> {
        let start = Self::order_index_start(filter.min_order.unwrap_or(0));
        let upper = Self::order_index_upper(filter.max_order);

        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_lower_bound(start.clone().into_bytes());
        read_opts.set_iterate_upper_bound(upper.into_bytes());

        let mode = match filter.direction {
            SortDirection::Ascending => IteratorMode::From(start.as_bytes(), Direction::Forward),
            SortDirection::Descending => IteratorMode::End,
        };
        let iter = self.db.iterator_opt(mode, read_opts);

        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut keys = Vec::new();
        for item in iter {
            if keys.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(|e| StorageError::RocksDb(e.to_string()))?;
            let (order, id) = Self::parse_order_key(&key).ok_or_else(|| {
                StorageError::Serialization(format!(
                    "Malformed order index key: {}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            if filter.matches_key(order, id) {
                keys.push((order, id));
            }
        }
        Ok(keys)
    }

    /// Resolves index keys to records, preserving their order.
    fn load_indexed(&self, keys: Vec<(u64, RecordId)>) -> Result<Vec<Record>, StorageError> {
        keys.into_iter()
            .map(|(_, id)| {
                self.get_record(id)?.ok_or_else(|| {
                    StorageError::InvariantViolation(format!(
                        "order index references missing record {}",
                        id
                    ))
                })
            })
            .collect()
    }
}

impl RecordStore for RocksDbRecordStore {
    async fn find_all(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError> {
        let keys = self.scan_index(filter)?;
        self.load_indexed(keys)
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>, StorageError> {
        self.get_record(id)
    }

    async fn find_by_order(&self, order: u64) -> Result<Option<Record>, StorageError> {
        let keys = self.scan_index(&RecordFilter::order_between(order, order).limit(1))?;
        Ok(self.load_indexed(keys)?.into_iter().next())
    }

    async fn create(&self, record: NewRecord) -> Result<Record, StorageError> {
        let _guard = self.write_lock.lock().map_lock_err()?;
        let mut staged = StagedWrite::new(self);
        let created = staged.create(record)?;
        staged.commit()?;
        Ok(created)
    }

    async fn update_by_id(&self, id: RecordId, patch: RecordPatch) -> Result<Record, StorageError> {
        let _guard = self.write_lock.lock().map_lock_err()?;
        let mut staged = StagedWrite::new(self);
        let updated = staged.update(id, &patch)?;
        staged.commit()?;
        Ok(updated)
    }

    async fn delete_by_id(&self, id: RecordId) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_lock_err()?;
        let mut staged = StagedWrite::new(self);
        staged.delete(id)?;
        staged.commit()
    }

    async fn count_all(&self, filter: &RecordFilter) -> Result<u64, StorageError> {
        Ok(self.scan_index(filter)?.len() as u64)
    }

    async fn bulk_update(&self, updates: Vec<(RecordId, RecordPatch)>) -> Result<(), StorageError> {
        if updates.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().map_lock_err()?;
        let mut staged = StagedWrite::new(self);
        for (id, patch) in &updates {
            staged.update(*id, patch)?;
        }
        staged.commit()
    }

    fn supports_atomic_batches(&self) -> bool {
        true
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<Vec<Record>, StorageError> {
        let _guard = self.write_lock.lock().map_lock_err()?;
        let mut staged = StagedWrite::new(self);
        let mut written = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                WriteOp::Create(new) => written.push(staged.create(new)?),
                WriteOp::Update(id, patch) => written.push(staged.update(id, &patch)?),
                WriteOp::Delete(id) => staged.delete(id)?,
            }
        }

        staged.commit()?;
        Ok(written)
    }
}

/// Mutations accumulated into one `WriteBatch`.
///
/// Reads go through `overlay` first so later ops in the same batch see the
/// effect of earlier ones.
struct StagedWrite<'a> {
    store: &'a RocksDbRecordStore,
    batch: WriteBatch,
    overlay: HashMap<RecordId, Option<Record>>,
    last_id: Option<u64>,
    now_ms: i64,
}

impl<'a> StagedWrite<'a> {
    fn new(store: &'a RocksDbRecordStore) -> Self {
        Self {
            store,
            batch: WriteBatch::default(),
            overlay: HashMap::new(),
            last_id: None,
            now_ms: current_timestamp_ms(),
        }
    }

    fn load(&self, id: RecordId) -> Result<Record, StorageError> {
        let current = match self.overlay.get(&id) {
            Some(staged) => staged.clone(),
            None => self.store.get_record(id)?,
        };
        current.ok_or(StorageError::RecordNotFound(id))
    }

    fn create(&mut self, new: NewRecord) -> Result<Record, StorageError> {
        let id = self.store.ids.next()?;
        let record = new.into_record(RecordId(id), self.now_ms);
        self.put(&record, None)?;
        self.last_id = Some(id);
        Ok(record)
    }

    fn update(&mut self, id: RecordId, patch: &RecordPatch) -> Result<Record, StorageError> {
        let previous = self.load(id)?;
        let mut record = previous.clone();
        patch.apply_to(&mut record, self.now_ms);
        self.put(&record, Some(&previous))?;
        Ok(record)
    }

    fn delete(&mut self, id: RecordId) -> Result<(), StorageError> {
        let previous = self.load(id)?;
        self.batch
            .delete(RocksDbRecordStore::record_key(id).as_bytes());
        self.batch
            .delete(RocksDbRecordStore::order_key(previous.order, id).as_bytes());
        self.overlay.insert(id, None);
        Ok(())
    }

    fn put(&mut self, record: &Record, previous: Option<&Record>) -> Result<(), StorageError> {
        if let Some(previous) = previous {
            if previous.order != record.order {
                self.batch.delete(
                    RocksDbRecordStore::order_key(previous.order, previous.id).as_bytes(),
                );
            }
        }
        self.batch.put(
            RocksDbRecordStore::order_key(record.order, record.id).as_bytes(),
            b"",
        );
        self.batch.put(
            RocksDbRecordStore::record_key(record.id).as_bytes(),
            record.to_bytes()?,
        );
        self.overlay.insert(record.id, Some(record.clone()));
        Ok(())
    }

    fn commit(self) -> Result<(), StorageError> {
        let mut batch = self.batch;
        if let Some(last_id) = self.last_id {
            batch.put(LAST_ID_KEY.as_bytes(), last_id.to_be_bytes());
        }
        self.store
            .db
            .write(batch)
            .map_err(|e| StorageError::RocksDb(e.to_string()))
    }
}
