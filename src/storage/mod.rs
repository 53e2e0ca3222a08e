mod memory;
mod rocksdb;
mod sequence;

pub use memory::MemoryRecordStore;
pub use self::rocksdb::RocksDbRecordStore;
pub use sequence::AtomicIdGenerator;
