use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::contracts::error::StorageError;

/// Opaque payload carried by a record. The sequencer never looks inside it.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Keys owned by the store; stripped from any incoming payload.
pub const RESERVED_FIELDS: [&str; 4] = ["id", "order", "created_at_ms", "updated_at_ms"];

/// Store-assigned record identifier.
///
/// Ids are handed out in increasing order, so sorting by `(order, id)` puts
/// older records first when two records share an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RecordId)
    }
}

/// A sequenced record as held by a [`RecordStore`](crate::contracts::RecordStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub order: u64,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Serializes the record for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Deserializes a record previously written with [`Record::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Removes store-owned keys from a payload.
pub fn strip_reserved(fields: &mut Fields) {
    for key in RESERVED_FIELDS {
        fields.remove(key);
    }
}

/// Data for a record about to be created.
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub order: u64,
    pub fields: Fields,
}

impl NewRecord {
    /// Builds the stored form of this record.
    pub fn into_record(self, id: RecordId, now_ms: i64) -> Record {
        let mut fields = self.fields;
        strip_reserved(&mut fields);
        Record {
            id,
            order: self.order,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            fields,
        }
    }
}

/// Partial update of a record. `fields` is shallow-merged into the payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub order: Option<u64>,
    pub fields: Option<Fields>,
}

impl RecordPatch {
    /// A patch that only sets `order`.
    pub fn order(order: u64) -> Self {
        Self {
            order: Some(order),
            fields: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_none() && self.fields.as_ref().is_none_or(|f| f.is_empty())
    }

    /// Applies the patch in place.
    pub fn apply_to(&self, record: &mut Record, now_ms: i64) {
        if let Some(order) = self.order {
            record.order = order;
        }
        if let Some(fields) = &self.fields {
            for (key, value) in fields {
                if RESERVED_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                record.fields.insert(key.clone(), value.clone());
            }
        }
        record.updated_at_ms = now_ms;
    }
}

/// One write inside a batch handed to [`RecordStore::apply_batch`](crate::contracts::RecordStore::apply_batch).
#[derive(Debug, Clone)]
pub enum WriteOp {
    Create(NewRecord),
    Update(RecordId, RecordPatch),
    Delete(RecordId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Selection and sort for record queries.
///
/// Results are always sorted by `(order, id)` in `direction`. Order bounds
/// are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub min_order: Option<u64>,
    pub max_order: Option<u64>,
    pub exclude: Option<RecordId>,
    pub direction: SortDirection,
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches records with `order >= min`.
    pub fn order_at_least(min: u64) -> Self {
        Self {
            min_order: Some(min),
            ..Self::default()
        }
    }

    /// Matches records with `min <= order <= max`.
    pub fn order_between(min: u64, max: u64) -> Self {
        Self {
            min_order: Some(min),
            max_order: Some(max),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, id: RecordId) -> Self {
        self.exclude = Some(id);
        self
    }

    pub fn descending(mut self) -> Self {
        self.direction = SortDirection::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.matches_key(record.order, record.id)
    }

    pub fn matches_key(&self, order: u64, id: RecordId) -> bool {
        self.min_order.is_none_or(|min| order >= min)
            && self.max_order.is_none_or(|max| order <= max)
            && self.exclude != Some(id)
    }

    /// Sorts matched records by `(order, id)` in this filter's direction and
    /// applies the limit.
    pub fn arrange(&self, records: &mut Vec<Record>) {
        records.sort_by_key(|r| (r.order, r.id));
        if self.direction == SortDirection::Descending {
            records.reverse();
        }
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
