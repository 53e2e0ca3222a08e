pub mod api;
pub mod contracts;
pub mod metrics;
pub mod sequencer;
pub mod storage;
