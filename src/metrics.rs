//! Counters and timing statistics for the batch pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector shared across batches
pub struct PipelineMetrics {
    /// Raw rows submitted for scoring
    pub rows_submitted: AtomicU64,
    /// Predictions produced
    pub predictions_made: AtomicU64,
    /// Records excluded before scoring
    pub records_excluded: AtomicU64,
    /// Batches persisted successfully
    pub batches_completed: AtomicU64,
    /// Batches that failed with an error
    pub batches_failed: AtomicU64,
    /// Records archived by same-day replacement
    pub records_replaced: AtomicU64,
    /// Records archived by retention sweeps
    pub records_expired: AtomicU64,
    /// Field parse warnings by field name
    field_warnings: RwLock<HashMap<String, u64>>,
    /// Predictions by income segment
    segments: RwLock<HashMap<String, u64>>,
    /// Batch durations (in milliseconds)
    batch_times: RwLock<Vec<u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            rows_submitted: AtomicU64::new(0),
            predictions_made: AtomicU64::new(0),
            records_excluded: AtomicU64::new(0),
            batches_completed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            records_replaced: AtomicU64::new(0),
            records_expired: AtomicU64::new(0),
            field_warnings: RwLock::new(HashMap::new()),
            segments: RwLock::new(HashMap::new()),
            batch_times: RwLock::new(Vec::with_capacity(64)),
            start_time: Instant::now(),
        }
    }

    /// Record a scored batch
    pub fn record_scoring(&self, submitted: usize, predicted: usize, excluded: usize) {
        self.rows_submitted.fetch_add(submitted as u64, Ordering::Relaxed);
        self.predictions_made.fetch_add(predicted as u64, Ordering::Relaxed);
        self.records_excluded.fetch_add(excluded as u64, Ordering::Relaxed);
    }

    /// Record a field that failed to parse
    pub fn record_warning(&self, field: &str) {
        if let Ok(mut warnings) = self.field_warnings.write() {
            *warnings.entry(field.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_segment(&self, segment: &str) {
        if let Ok(mut segments) = self.segments.write() {
            *segments.entry(segment.to_string()).or_insert(0) += 1;
        }
    }

    /// Record a persisted batch
    pub fn record_batch(&self, duration: Duration, replaced: usize, expired: usize) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.records_replaced.fetch_add(replaced as u64, Ordering::Relaxed);
        self.records_expired.fetch_add(expired as u64, Ordering::Relaxed);

        if let Ok(mut times) = self.batch_times.write() {
            times.push(duration.as_millis() as u64);
            // Keep only last 10000
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    pub fn record_failure(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Batch duration statistics
    pub fn get_batch_stats(&self) -> BatchStats {
        let Ok(times) = self.batch_times.read() else {
            return BatchStats::default();
        };
        if times.is_empty() {
            return BatchStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        BatchStats {
            count: count as u64,
            mean_ms: sum / count as u64,
            p50_ms: sorted[count / 2],
            p95_ms: sorted[((count as f64 * 0.95) as usize).min(count - 1)],
            max_ms: sorted[count - 1],
        }
    }

    /// Rows scored per second since start
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_submitted.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_field_warnings(&self) -> HashMap<String, u64> {
        self.field_warnings
            .read()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    pub fn get_segments(&self) -> HashMap<String, u64> {
        self.segments.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let rows = self.rows_submitted.load(Ordering::Relaxed);
        let predictions = self.predictions_made.load(Ordering::Relaxed);
        let excluded = self.records_excluded.load(Ordering::Relaxed);
        let completed = self.batches_completed.load(Ordering::Relaxed);
        let failed = self.batches_failed.load(Ordering::Relaxed);
        let batch = self.get_batch_stats();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            INCOME ESTIMATION PIPELINE - SUMMARY              ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Rows Submitted: {:>8}  │  Throughput: {:>8.1} rows/s     ║",
            rows,
            self.get_throughput()
        );
        info!(
            "║ Predictions:    {:>8}  │  Excluded:   {:>8}            ║",
            predictions, excluded
        );
        info!(
            "║ Batches OK:     {:>8}  │  Failed:     {:>8}            ║",
            completed, failed
        );
        info!(
            "║ Replaced:       {:>8}  │  Expired:    {:>8}            ║",
            self.records_replaced.load(Ordering::Relaxed),
            self.records_expired.load(Ordering::Relaxed)
        );
        info!(
            "║ Batch Time (ms): mean={:>5} p50={:>5} p95={:>5} max={:>5}    ║",
            batch.mean_ms, batch.p50_ms, batch.p95_ms, batch.max_ms
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Income Segments:                                             ║");
        let mut segments: Vec<(String, u64)> = self.get_segments().into_iter().collect();
        segments.sort();
        for (segment, count) in &segments {
            let pct = if predictions > 0 {
                (*count as f64 / predictions as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:22}: {:>6} ({:>5.1}%)", segment, count, pct);
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let warnings = self.get_field_warnings();
        if !warnings.is_empty() {
            info!("Field parse warnings:");
            for (field, count) in &warnings {
                info!("  {}: {}", field, count);
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch duration statistics
#[derive(Debug, Default, PartialEq)]
pub struct BatchStats {
    pub count: u64,
    pub mean_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}
