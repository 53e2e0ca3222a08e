//! Observability metrics for the timeline service.
//!
//! Counters and the latency histogram use relaxed atomics; they are read
//! by the `/stats` and `/metrics` endpoints.

pub mod histogram;
pub mod registry;

pub use histogram::{Histogram, HistogramSnapshot};
pub use registry::{MetricsSnapshot, SequencerMetrics};
