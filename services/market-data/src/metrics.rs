//! Engine metrics
//!
//! Lock-free counters plus bounded latency windows for tick ingestion,
//! upstream lookups and sector recomputation. `export` flattens everything
//! into a sorted map for Prometheus-style exposition.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Counters shared by every engine component.
pub struct EngineMetrics {
    // Tick ingestion
    pub ticks_ingested: AtomicU64,
    pub ticks_rejected: AtomicU64,
    pub tick_ingest_ns: Mutex<LatencyTracker>,

    // Upstream lookups
    pub fetch_batches: AtomicU64,
    pub lookups_succeeded: AtomicU64,
    pub lookups_failed: AtomicU64,
    pub lookups_timed_out: AtomicU64,

    // Sector cache
    pub sector_cache_hits: AtomicU64,
    pub sector_cache_misses: AtomicU64,
    pub sector_recomputes: AtomicU64,
    pub sector_recompute_ms: Mutex<LatencyTracker>,

    // Alerts
    pub alerts: Mutex<Vec<Alert>>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            ticks_ingested: AtomicU64::new(0),
            ticks_rejected: AtomicU64::new(0),
            tick_ingest_ns: Mutex::new(LatencyTracker::new(1000)),
            fetch_batches: AtomicU64::new(0),
            lookups_succeeded: AtomicU64::new(0),
            lookups_failed: AtomicU64::new(0),
            lookups_timed_out: AtomicU64::new(0),
            sector_cache_hits: AtomicU64::new(0),
            sector_cache_misses: AtomicU64::new(0),
            sector_recomputes: AtomicU64::new(0),
            sector_recompute_ms: Mutex::new(LatencyTracker::new(100)),
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn record_tick_ingested(&self, latency_ns: u64) {
        self.ticks_ingested.fetch_add(1, Ordering::Relaxed);
        self.tick_ingest_ns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(latency_ns);
    }

    pub fn record_tick_rejected(&self) {
        self.ticks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_batch(&self) {
        self.fetch_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_succeeded(&self) {
        self.lookups_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed lookup. Timeouts also count as failures.
    pub fn record_lookup_failed(&self, timed_out: bool) {
        self.lookups_failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.lookups_timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_sector_cache_hit(&self) {
        self.sector_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sector_cache_miss(&self) {
        self.sector_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sector_recompute(&self, duration_ms: u64) {
        self.sector_recomputes.fetch_add(1, Ordering::Relaxed);
        self.sector_recompute_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(duration_ms);
    }

    /// Check alert thresholds and generate alerts.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let rejected = self.ticks_rejected.load(Ordering::Relaxed);
        if rejected > thresholds.max_ticks_rejected {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "ticks_rejected".to_string(),
                message: format!(
                    "Ticks rejected: {} > threshold {}",
                    rejected, thresholds.max_ticks_rejected
                ),
            });
        }

        let failed = self.lookups_failed.load(Ordering::Relaxed);
        if failed > thresholds.max_lookups_failed {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "lookups_failed".to_string(),
                message: format!(
                    "Lookups failed: {} > threshold {}",
                    failed, thresholds.max_lookups_failed
                ),
            });
        }

        let p99 = self
            .tick_ingest_ns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .percentile(99);
        if let Some(p99) = p99 {
            if p99 > thresholds.max_tick_ingest_p99_ns {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    metric: "tick_ingest_p99".to_string(),
                    message: format!(
                        "Tick ingest p99: {}ns > threshold {}ns",
                        p99, thresholds.max_tick_ingest_p99_ns
                    ),
                });
            }
        }

        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(alerts.clone());

        alerts
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("ticks_ingested".to_string(), self.ticks_ingested.load(Ordering::Relaxed));
        m.insert("ticks_rejected".to_string(), self.ticks_rejected.load(Ordering::Relaxed));
        m.insert("fetch_batches".to_string(), self.fetch_batches.load(Ordering::Relaxed));
        m.insert("lookups_succeeded".to_string(), self.lookups_succeeded.load(Ordering::Relaxed));
        m.insert("lookups_failed".to_string(), self.lookups_failed.load(Ordering::Relaxed));
        m.insert("lookups_timed_out".to_string(), self.lookups_timed_out.load(Ordering::Relaxed));
        m.insert("sector_cache_hits".to_string(), self.sector_cache_hits.load(Ordering::Relaxed));
        m.insert("sector_cache_misses".to_string(), self.sector_cache_misses.load(Ordering::Relaxed));
        m.insert("sector_recomputes".to_string(), self.sector_recomputes.load(Ordering::Relaxed));
        let p99 = self
            .tick_ingest_ns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .percentile(99);
        if let Some(p99) = p99 {
            m.insert("tick_ingest_p99_ns".to_string(), p99);
        }
        let avg = self
            .sector_recompute_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .average();
        if let Some(avg) = avg {
            m.insert("sector_recompute_avg_ms".to_string(), avg);
        }
        m
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding window of latency samples for percentile calculation.
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

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

/// Alert severity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
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
    pub max_ticks_rejected: u64,
    /// Failed lookups before a critical alert.
    pub max_lookups_failed: u64,
    pub max_tick_ingest_p99_ns: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_ticks_rejected: 100,
            max_lookups_failed: 50,
            max_tick_ingest_p99_ns: 1_000_000, // 1ms
        }
    }
}
