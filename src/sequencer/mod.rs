//! Ordinal sequencer: keeps a collection's `order` field dense across
//! insert, move, delete and renumber.

mod locks;
pub mod shift;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::contracts::{
    strip_reserved, Fields, InvariantViolation, Moved, NewRecord, NextOrder, Placement, Record,
    RecordFilter, RecordId, RecordPatch, RecordStore, RecordUpdate, Removal, Sequencer,
    SequencerError, StorageError, WriteOp,
};
use crate::metrics::SequencerMetrics;

pub use locks::CollectionLocks;
pub use shift::{check_density, clamp_insert, clamp_move, resequence_plan, Rewrite, Shift};

/// Collection name used when none is given.
pub const DEFAULT_COLLECTION: &str = "timeline";

/// Configuration for the ordinal sequencer.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Re-read the collection after every move and resequence it if any
    /// order drifted from its position.
    pub heal_after_move: bool,
    /// When a write sequence fails part-way on a store without atomic
    /// batches, run one repair pass before returning the error.
    pub repair_on_failure: bool,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            heal_after_move: true,
            repair_on_failure: true,
        }
    }
}

impl SequencerConfig {
    /// Creates a config from environment variables.
    ///
    /// Reads:
    /// - `TIMELINE_HEAL_AFTER_MOVE` (default: true)
    /// - `TIMELINE_REPAIR_ON_FAILURE` (default: true)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            heal_after_move: env_flag("TIMELINE_HEAL_AFTER_MOVE")
                .unwrap_or(default.heal_after_move),
            repair_on_failure: env_flag("TIMELINE_REPAIR_ON_FAILURE")
                .unwrap_or(default.repair_on_failure),
        }
    }
}

/// Reads a boolean environment variable (`1`/`true`/`0`/`false`).
pub fn env_flag(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %value, "Ignoring unrecognised boolean value");
            None
        }
    }
}

/// Parses a requested order from a JSON value.
///
/// Accepts integers, integral floats and numeric strings, including integral
/// decimal strings such as `"3.0"`. `null` is the caller's concern (it means
/// "not given").
pub fn parse_order(value: &Value) -> Result<i64, SequencerError> {
    let invalid = || SequencerError::InvalidArgument(format!("order must be an integer, got {}", value));
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if n.as_u64().is_some() {
                Ok(i64::MAX)
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
                    _ => Err(invalid()),
                }
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(i);
            }
            match s.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
                _ => Err(invalid()),
            }
        }
        _ => Err(invalid()),
    }
}

/// [`Sequencer`] over an injected [`RecordStore`].
///
/// Every mutating operation holds the collection lock for its whole
/// duration. Shifts and the primary write go through one atomic batch when
/// the store supports it; otherwise they are written one by one.
pub struct OrdinalSequencer<S: RecordStore> {
    store: Arc<S>,
    collection: String,
    lock: Arc<Mutex<()>>,
    config: SequencerConfig,
    metrics: Arc<SequencerMetrics>,
}

impl<S: RecordStore> OrdinalSequencer<S> {
    /// Creates a sequencer with its own private lock.
    pub fn new(store: Arc<S>, config: SequencerConfig) -> Self {
        Self::with_locks(store, DEFAULT_COLLECTION, &CollectionLocks::new(), config)
    }

    /// Creates a sequencer sharing `locks` with other sequencers on the same
    /// collection.
    pub fn with_locks(
        store: Arc<S>,
        collection: impl Into<String>,
        locks: &CollectionLocks,
        config: SequencerConfig,
    ) -> Self {
        let collection = collection.into();
        let lock = locks.lock_for(&collection);
        Self {
            store,
            collection,
            lock,
            config,
            metrics: Arc::new(SequencerMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SequencerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<SequencerMetrics> {
        &self.metrics
    }

    /// Writes `ops`; the record produced by the last Create/Update is the
    /// primary result.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<Vec<Record>, SequencerError> {
        if self.store.supports_atomic_batches() {
            return Ok(self.store.apply_batch(ops).await?);
        }

        match self.apply_sequential(ops).await {
            Ok(written) => Ok(written),
            Err(e) => {
                self.metrics.record_partial_failure();
                tracing::error!(
                    collection = %self.collection,
                    error = %e,
                    "Write sequence failed part-way, ordering may have drifted"
                );
                if self.config.repair_on_failure {
                    match self.resequence().await {
                        Ok(changed) => tracing::warn!(
                            collection = %self.collection,
                            changed,
                            "Repaired ordering after partial failure"
                        ),
                        Err(repair_err) => tracing::error!(
                            collection = %self.collection,
                            error = %repair_err,
                            "Repair pass failed, renumber before trusting ordering"
                        ),
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn apply_sequential(&self, ops: Vec<WriteOp>) -> Result<Vec<Record>, StorageError> {
        let mut written = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                WriteOp::Create(new) => written.push(self.store.create(new).await?),
                WriteOp::Update(id, patch) => {
                    written.push(self.store.update_by_id(id, patch).await?)
                }
                WriteOp::Delete(id) => self.store.delete_by_id(id).await?,
            }
        }
        Ok(written)
    }

    /// Assigns every record its position. Caller holds the lock.
    async fn resequence(&self) -> Result<usize, StorageError> {
        let records = self.store.find_all(&RecordFilter::all()).await?;
        let updates = resequence_plan(&records, Rewrite::Changed);
        let changed = updates.len();
        if changed > 0 {
            self.store.bulk_update(updates).await?;
        }
        Ok(changed)
    }

    /// Post-move density check. Returns whether the collection was rewritten.
    async fn heal(&self) -> Result<bool, StorageError> {
        let records = self.store.find_all(&RecordFilter::all()).await?;
        let Some(violation) = check_density(&records) else {
            return Ok(false);
        };

        tracing::warn!(
            collection = %self.collection,
            %violation,
            "Order drift detected after move, resequencing collection"
        );
        self.metrics.record_heal();
        self.store
            .bulk_update(resequence_plan(&records, Rewrite::All))
            .await?;
        Ok(true)
    }

    /// A store reporting `id` itself as missing means the caller's target
    /// vanished; any other missing record stays a storage error.
    fn target_missing(id: RecordId) -> impl Fn(SequencerError) -> SequencerError {
        move |e| match e {
            SequencerError::Storage(StorageError::RecordNotFound(missing)) if missing == id => {
                SequencerError::NotFound(id)
            }
            other => other,
        }
    }

    fn primary(written: &mut Vec<Record>) -> Result<Record, SequencerError> {
        written.pop().ok_or_else(|| {
            StorageError::InvariantViolation("write batch returned no record".into()).into()
        })
    }
}

impl<S: RecordStore> Sequencer for OrdinalSequencer<S> {
    async fn insert_at(
        &self,
        candidate: Option<i64>,
        mut fields: Fields,
    ) -> Result<Placement, SequencerError> {
        let started = Instant::now();
        let _guard = self.lock.lock().await;
        strip_reserved(&mut fields);

        let total = self.store.count_all(&RecordFilter::all()).await?;
        let order = clamp_insert(candidate, total);

        let displaced = self
            .store
            .find_all(&RecordFilter::order_at_least(order).descending())
            .await?;
        let shifted = displaced.len();

        let mut ops: Vec<WriteOp> = displaced
            .iter()
            .map(|r| WriteOp::Update(r.id, RecordPatch::order(r.order + 1)))
            .collect();
        ops.push(WriteOp::Create(NewRecord { order, fields }));

        let record = Self::primary(&mut self.commit(ops).await?)?;

        tracing::info!(
            collection = %self.collection,
            id = %record.id,
            order,
            shifted,
            "Inserted record"
        );
        self.metrics
            .record_insert(shifted, started.elapsed().as_micros() as u64);

        Ok(Placement { record, shifted })
    }

    async fn update(&self, id: RecordId, update: RecordUpdate) -> Result<Moved, SequencerError> {
        let started = Instant::now();
        let _guard = self.lock.lock().await;

        let current = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(SequencerError::NotFound(id))?;
        let previous_order = current.order;

        let mut fields = update.fields;
        if let Some(fields) = fields.as_mut() {
            strip_reserved(fields);
        }

        let target = match update.order {
            Some(requested) => {
                let total = self.store.count_all(&RecordFilter::all()).await?;
                clamp_move(requested, total)
            }
            None => previous_order,
        };

        let Some(shift) = Shift::for_move(previous_order, target) else {
            let patch = RecordPatch {
                order: None,
                fields,
            };
            let record = if patch.is_empty() {
                current
            } else {
                let mut written = self
                    .commit(vec![WriteOp::Update(id, patch)])
                    .await
                    .map_err(Self::target_missing(id))?;
                Self::primary(&mut written)?
            };
            self.metrics
                .record_edit(started.elapsed().as_micros() as u64);
            return Ok(Moved {
                record,
                previous_order,
                resequenced: false,
            });
        };

        let neighbours = self.store.find_all(&shift.neighbours(id)).await?;
        let shifted = neighbours.len();

        let mut ops: Vec<WriteOp> = neighbours
            .iter()
            .map(|r| WriteOp::Update(r.id, RecordPatch::order(shift.apply(r.order))))
            .collect();
        ops.push(WriteOp::Update(
            id,
            RecordPatch {
                order: Some(target),
                fields,
            },
        ));
        self.commit(ops).await.map_err(Self::target_missing(id))?;

        let resequenced = if self.config.heal_after_move {
            self.heal().await?
        } else {
            false
        };

        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(SequencerError::NotFound(id))?;

        tracing::info!(
            collection = %self.collection,
            id = %id,
            from = previous_order,
            to = record.order,
            shifted,
            resequenced,
            "Moved record"
        );
        self.metrics
            .record_move(shifted, started.elapsed().as_micros() as u64);

        Ok(Moved {
            record,
            previous_order,
            resequenced,
        })
    }

    async fn delete_at(&self, id: RecordId) -> Result<Removal, SequencerError> {
        let started = Instant::now();
        let _guard = self.lock.lock().await;

        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(SequencerError::NotFound(id))?;

        let followers = self
            .store
            .find_all(&RecordFilter::order_at_least(record.order + 1).excluding(id))
            .await?;
        let shifted = followers.len();

        let mut ops = Vec::with_capacity(shifted + 1);
        ops.push(WriteOp::Delete(id));
        ops.extend(
            followers
                .iter()
                .map(|r| WriteOp::Update(r.id, RecordPatch::order(r.order - 1))),
        );
        self.commit(ops).await.map_err(Self::target_missing(id))?;

        tracing::info!(
            collection = %self.collection,
            id = %id,
            order = record.order,
            shifted,
            "Deleted record"
        );
        self.metrics
            .record_delete(shifted, started.elapsed().as_micros() as u64);

        Ok(Removal {
            id,
            order: record.order,
            shifted,
        })
    }

    async fn renumber_all(&self) -> Result<usize, SequencerError> {
        let started = Instant::now();
        let _guard = self.lock.lock().await;

        let changed = self.resequence().await?;

        tracing::info!(collection = %self.collection, changed, "Renumbered collection");
        self.metrics
            .record_renumber(changed, started.elapsed().as_micros() as u64);
        Ok(changed)
    }

    async fn list(&self) -> Result<Vec<Record>, SequencerError> {
        Ok(self.store.find_all(&RecordFilter::all()).await?)
    }

    async fn get(&self, id: RecordId) -> Result<Record, SequencerError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(SequencerError::NotFound(id))
    }

    async fn record_at(&self, order: u64) -> Result<Option<Record>, SequencerError> {
        Ok(self.store.find_by_order(order).await?)
    }

    async fn next_order(&self) -> Result<NextOrder, SequencerError> {
        let last = self
            .store
            .find_all(&RecordFilter::all().descending().limit(1))
            .await?;
        let total = self.store.count_all(&RecordFilter::all()).await?;
        Ok(NextOrder {
            next_order: last.first().map_or(1, |r| r.order + 1),
            total,
        })
    }

    async fn verify(&self) -> Result<Option<InvariantViolation>, SequencerError> {
        let records = self.store.find_all(&RecordFilter::all()).await?;
        Ok(check_density(&records))
    }
}
