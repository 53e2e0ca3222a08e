//! Lock-free latency histogram.
//!
//! A sequencer operation is several store round-trips, so buckets span
//! 100μs to 5s rather than single-call latencies.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Upper bounds of the histogram buckets, in microseconds.
pub const LATENCY_BUCKETS_US: [u64; 10] = [
    100, 250, 500, 1_000, 2_500, 10_000, 50_000, 250_000, 1_000_000, 5_000_000,
];

const BUCKET_COUNT: usize = LATENCY_BUCKETS_US.len();

/// Cumulative histogram in the Prometheus sense: each bucket counts every
/// observation at or below its bound.
///
/// ```
/// use timeline::metrics::Histogram;
///
/// let histogram = Histogram::new();
/// histogram.observe(300);
///
/// let snapshot = histogram.snapshot();
/// assert_eq!(snapshot.count, 1);
/// assert_eq!(snapshot.sum_us, 300);
/// ```
pub struct Histogram {
    sum: AtomicU64,
    count: AtomicU64,
    buckets: [AtomicU64; BUCKET_COUNT],
}

/// Point-in-time copy of a [`Histogram`].
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub sum_us: u64,
    pub count: u64,
    pub buckets: Vec<u64>,
}

impl HistogramSnapshot {
    pub fn mean_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_us as f64 / self.count as f64
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Records one observation in microseconds.
    #[inline]
    pub fn observe(&self, value_us: u64) {
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let first = LATENCY_BUCKETS_US.partition_point(|&bound| bound < value_us);
        for bucket in &self.buckets[first..] {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            sum_us: self.sum.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            buckets: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Writes the histogram in Prometheus exposition format.
    pub fn write_prometheus(&self, output: &mut String, name: &str, help: &str) {
        let snapshot = self.snapshot();

        let _ = writeln!(output, "# HELP {name} {help}");
        let _ = writeln!(output, "# TYPE {name} histogram");
        for (bound, count) in LATENCY_BUCKETS_US.iter().zip(&snapshot.buckets) {
            let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {count}");
        }
        let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {}", snapshot.count);
        let _ = writeln!(output, "{name}_sum {}", snapshot.sum_us);
        let _ = writeln!(output, "{name}_count {}", snapshot.count);
    }
}
