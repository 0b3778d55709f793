//! Per-stage latency tracking.
//!
//! One [`PerfTracker`] is created per run and passed to the code it
//! measures. Unknown labels read as zero.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Latency summary for one label.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StageStats {
    pub count: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

/// Summary of every label ever started, keyed by label.
pub type PerfReport = BTreeMap<String, StageStats>;

/// Latency observations grouped by label.
#[derive(Debug, Default)]
pub struct PerfTracker {
    samples: Mutex<BTreeMap<String, Vec<Duration>>>,
}

impl PerfTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<Duration>>> {
        // Samples are plain data; a panic mid-push cannot leave them invalid.
        self.samples
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Begin timing one observation of `label`.
    pub fn start(&self, label: &str) -> StageTimer<'_> {
        self.lock().entry(label.to_string()).or_default();
        StageTimer {
            tracker: self,
            label: label.to_string(),
            started: Instant::now(),
        }
    }

    /// Record an externally measured observation.
    pub fn record(&self, label: &str, elapsed: Duration) {
        self.lock()
            .entry(label.to_string())
            .or_default()
            .push(elapsed);
    }

    /// Time a synchronous closure under `label`.
    pub fn measure<T>(&self, label: &str, f: impl FnOnce() -> T) -> T {
        let timer = self.start(label);
        let out = f();
        timer.end();
        out
    }

    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.lock().get(label).map_or(0, Vec::len)
    }

    /// Median latency of `label` in milliseconds.
    #[must_use]
    pub fn p50(&self, label: &str) -> f64 {
        self.percentile(label, 50.0)
    }

    /// 95th percentile latency of `label` in milliseconds.
    #[must_use]
    pub fn p95(&self, label: &str) -> f64 {
        self.percentile(label, 95.0)
    }

    fn percentile(&self, label: &str, pct: f64) -> f64 {
        self.lock()
            .get(label)
            .map_or(0.0, |samples| nearest_rank_ms(samples, pct))
    }

    #[must_use]
    pub fn to_report(&self) -> PerfReport {
        self.lock()
            .iter()
            .map(|(label, samples)| {
                (
                    label.clone(),
                    StageStats {
                        count: samples.len(),
                        p50_ms: nearest_rank_ms(samples, 50.0),
                        p95_ms: nearest_rank_ms(samples, 95.0),
                    },
                )
            })
            .collect()
    }

    /// Forget every label and observation.
    pub fn reset(&self) {
        self.lock().clear();
    }
}

/// An in-flight observation. Recorded only when [`StageTimer::end`] is called.
#[must_use = "a stage timer records nothing unless `end` is called"]
pub struct StageTimer<'a> {
    tracker: &'a PerfTracker,
    label: String,
    started: Instant,
}

impl StageTimer<'_> {
    /// Stop the timer and record the elapsed time.
    pub fn end(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.tracker.record(&self.label, elapsed);
        elapsed
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn nearest_rank_ms(samples: &[Duration], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    sorted[idx].as_secs_f64() * 1000.0
}
