//! Per-stream observability counters
//!
//! Data inconsistencies in the feed (frames for unknown rates, stale
//! ticks, misrouted updates) are absorbed rather than raised. These
//! counters make them visible.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::order_book::ApplyOutcome;

/// Counters for one market stream.
pub struct StreamMetrics {
    // Order book
    pub book_updates: AtomicU64,
    pub frames_applied: AtomicU64,
    pub stale_references: AtomicU64,
    pub rate_collisions: AtomicU64,
    pub book_update_ns: Mutex<LatencyTracker>,

    // Candles
    pub ticks_merged: AtomicU64,
    pub ticks_ignored: AtomicU64,
    pub stale_ticks: AtomicU64,

    // Routing
    pub instrument_mismatches: AtomicU64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            book_updates: AtomicU64::new(0),
            frames_applied: AtomicU64::new(0),
            stale_references: AtomicU64::new(0),
            rate_collisions: AtomicU64::new(0),
            book_update_ns: Mutex::new(LatencyTracker::new(1000)),
            ticks_merged: AtomicU64::new(0),
            ticks_ignored: AtomicU64::new(0),
            stale_ticks: AtomicU64::new(0),
            instrument_mismatches: AtomicU64::new(0),
        }
    }

    /// Record one applied book batch.
    pub fn record_book_update(&self, outcome: &ApplyOutcome, latency_ns: u64) {
        self.book_updates.fetch_add(1, Ordering::Relaxed);
        self.frames_applied
            .fetch_add(outcome.applied as u64, Ordering::Relaxed);
        self.stale_references
            .fetch_add(outcome.stale_references as u64, Ordering::Relaxed);
        self.rate_collisions
            .fetch_add(outcome.rate_collisions as u64, Ordering::Relaxed);
        self.book_update_ns.lock().record(latency_ns);
    }

    /// Record a tick merged into the candle series.
    pub fn record_tick_merged(&self) {
        self.ticks_merged.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick without a last price.
    pub fn record_tick_ignored(&self) {
        self.ticks_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick that was too old for one of the series.
    pub fn record_stale_tick(&self) {
        self.stale_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an update addressed to another instrument.
    pub fn record_instrument_mismatch(&self) {
        self.instrument_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Check alert thresholds and generate alerts.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let stale = self.stale_references.load(Ordering::Relaxed);
        if stale > thresholds.max_stale_references {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "stale_references".to_string(),
                message: format!(
                    "Stale book references: {} > threshold {}",
                    stale, thresholds.max_stale_references
                ),
            });
        }

        let mismatches = self.instrument_mismatches.load(Ordering::Relaxed);
        if mismatches > thresholds.max_instrument_mismatches {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "instrument_mismatches".to_string(),
                message: format!(
                    "Misrouted updates: {} > threshold {}",
                    mismatches, thresholds.max_instrument_mismatches
                ),
            });
        }

        if let Some(p99) = self.book_update_ns.lock().percentile(99) {
            if p99 > thresholds.max_book_update_p99_ns {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    metric: "book_update_p99".to_string(),
                    message: format!(
                        "Book update p99: {}ns > threshold {}ns",
                        p99, thresholds.max_book_update_p99_ns
                    ),
                });
            }
        }

        alerts
    }

    /// Export counters as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("book_updates".to_string(), self.book_updates.load(Ordering::Relaxed));
        m.insert("frames_applied".to_string(), self.frames_applied.load(Ordering::Relaxed));
        m.insert("stale_references".to_string(), self.stale_references.load(Ordering::Relaxed));
        m.insert("rate_collisions".to_string(), self.rate_collisions.load(Ordering::Relaxed));
        m.insert("ticks_merged".to_string(), self.ticks_merged.load(Ordering::Relaxed));
        m.insert("ticks_ignored".to_string(), self.ticks_ignored.load(Ordering::Relaxed));
        m.insert("stale_ticks".to_string(), self.stale_ticks.load(Ordering::Relaxed));
        m.insert(
            "instrument_mismatches".to_string(),
            self.instrument_mismatches.load(Ordering::Relaxed),
        );
        m
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: std::collections::VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: std::collections::VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }
}

/// Alert severity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// An alert triggered by threshold breach.
#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Configurable alert thresholds.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Max Update/Remove frames for unknown rates before alert.
    pub max_stale_references: u64,
    /// Max misrouted updates before critical alert.
    pub max_instrument_mismatches: u64,
    /// Max book update p99 latency in nanoseconds.
    pub max_book_update_p99_ns: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_stale_references: 100,
            max_instrument_mismatches: 0,
            max_book_update_p99_ns: 1_000_000, // 1ms
        }
    }
}
