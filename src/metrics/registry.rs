//! Counters for sequencer activity.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use super::histogram::{Histogram, HistogramSnapshot};

/// Sequencer operation metrics, shared between the sequencer and the API.
pub struct SequencerMetrics {
    pub inserts_total: AtomicU64,
    pub moves_total: AtomicU64,
    /// Updates that changed fields only
    pub edits_total: AtomicU64,
    pub deletes_total: AtomicU64,
    pub renumbers_total: AtomicU64,
    /// Neighbour records whose order was shifted by insert/move/delete
    pub records_shifted_total: AtomicU64,
    /// Post-move density checks that had to rewrite the collection
    pub heals_total: AtomicU64,
    /// Write sequences that failed part-way on a store without batches
    pub partial_failures_total: AtomicU64,
    pub errors_total: AtomicU64,
    pub op_latency_us: Histogram,
    started_at: Instant,
}

impl Default for SequencerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencerMetrics {
    pub fn new() -> Self {
        Self {
            inserts_total: AtomicU64::new(0),
            moves_total: AtomicU64::new(0),
            edits_total: AtomicU64::new(0),
            deletes_total: AtomicU64::new(0),
            renumbers_total: AtomicU64::new(0),
            records_shifted_total: AtomicU64::new(0),
            heals_total: AtomicU64::new(0),
            partial_failures_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            op_latency_us: Histogram::new(),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_insert(&self, shifted: usize, latency_us: u64) {
        self.inserts_total.fetch_add(1, Ordering::Relaxed);
        self.record_shift(shifted, latency_us);
    }

    #[inline]
    pub fn record_move(&self, shifted: usize, latency_us: u64) {
        self.moves_total.fetch_add(1, Ordering::Relaxed);
        self.record_shift(shifted, latency_us);
    }

    #[inline]
    pub fn record_edit(&self, latency_us: u64) {
        self.edits_total.fetch_add(1, Ordering::Relaxed);
        self.op_latency_us.observe(latency_us);
    }

    #[inline]
    pub fn record_delete(&self, shifted: usize, latency_us: u64) {
        self.deletes_total.fetch_add(1, Ordering::Relaxed);
        self.record_shift(shifted, latency_us);
    }

    #[inline]
    pub fn record_renumber(&self, changed: usize, latency_us: u64) {
        self.renumbers_total.fetch_add(1, Ordering::Relaxed);
        self.record_shift(changed, latency_us);
    }

    #[inline]
    pub fn record_heal(&self) {
        self.heals_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_partial_failure(&self) {
        self.partial_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_shift(&self, shifted: usize, latency_us: u64) {
        self.records_shifted_total
            .fetch_add(shifted as u64, Ordering::Relaxed);
        self.op_latency_us.observe(latency_us);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            inserts_total: self.inserts_total.load(Ordering::Relaxed),
            moves_total: self.moves_total.load(Ordering::Relaxed),
            edits_total: self.edits_total.load(Ordering::Relaxed),
            deletes_total: self.deletes_total.load(Ordering::Relaxed),
            renumbers_total: self.renumbers_total.load(Ordering::Relaxed),
            records_shifted_total: self.records_shifted_total.load(Ordering::Relaxed),
            heals_total: self.heals_total.load(Ordering::Relaxed),
            partial_failures_total: self.partial_failures_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            op_latency: self.op_latency_us.snapshot(),
        }
    }

    /// Formats all metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut output = String::with_capacity(2048);

        let counters = [
            ("timeline_inserts_total", "Records inserted", s.inserts_total),
            ("timeline_moves_total", "Records moved to a new order", s.moves_total),
            ("timeline_edits_total", "Field-only record updates", s.edits_total),
            ("timeline_deletes_total", "Records deleted", s.deletes_total),
            ("timeline_renumbers_total", "Explicit renumber passes", s.renumbers_total),
            (
                "timeline_records_shifted_total",
                "Neighbour orders rewritten by sequencer operations",
                s.records_shifted_total,
            ),
            (
                "timeline_heals_total",
                "Post-move checks that resequenced the collection",
                s.heals_total,
            ),
            (
                "timeline_partial_failures_total",
                "Write sequences that failed part-way",
                s.partial_failures_total,
            ),
            ("timeline_errors_total", "Failed API requests", s.errors_total),
        ];

        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {value}");
        }

        let _ = writeln!(output, "# HELP timeline_uptime_seconds Process uptime");
        let _ = writeln!(output, "# TYPE timeline_uptime_seconds gauge");
        let _ = writeln!(output, "timeline_uptime_seconds {:.3}", s.uptime_secs);

        self.op_latency_us.write_prometheus(
            &mut output,
            "timeline_op_latency_us",
            "Latency of mutating sequencer operations in microseconds",
        );

        output
    }
}

/// Serializable view of [`SequencerMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub inserts_total: u64,
    pub moves_total: u64,
    pub edits_total: u64,
    pub deletes_total: u64,
    pub renumbers_total: u64,
    pub records_shifted_total: u64,
    pub heals_total: u64,
    pub partial_failures_total: u64,
    pub errors_total: u64,
    pub op_latency: HistogramSnapshot,
}
