pub mod error;
pub mod record;
pub mod sequence;
pub mod sequencer;
pub mod storage;

pub use error::{
    IdError, InvariantViolation, LockResultExt, SequencerError, StorageError,
};
pub use record::{
    current_timestamp_ms, strip_reserved, Fields, NewRecord, Record, RecordFilter, RecordId,
    RecordPatch, SortDirection, WriteOp, RESERVED_FIELDS,
};
pub use sequence::IdGenerator;
pub use sequencer::{Moved, NextOrder, Placement, RecordUpdate, Removal, Sequencer};
pub use storage::RecordStore;
