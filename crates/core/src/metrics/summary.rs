//! Rolling-window duration summary.
//!
//! Prometheus histograms are cumulative and cannot answer "P95 over the last
//! five minutes" directly, so the monitoring surface keeps its own bounded
//! sample window and computes quantiles on demand. Samples older than the
//! window are evicted on every record and every query.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Hard cap on retained samples to bound memory under burst load.
const MAX_SAMPLES: usize = 10_000;

/// Percentile summary over a sliding time window.
#[derive(Debug)]
pub struct RollingSummary {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, f64)>>,
}

/// Computed quantiles of the current window.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SummarySnapshot {
    pub count: usize,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl RollingSummary {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one observation (milliseconds for check durations).
    pub fn observe(&self, value: f64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());

        samples.push_back((now, value));

        // Evict by age, then by the hard cap
        let cutoff = now - self.window;
        while let Some(&(at, _)) = samples.front() {
            if at < cutoff {
                samples.pop_front();
            } else {
                break;
            }
        }
        while samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
    }

    /// Compute the quantiles of the live window.
    pub fn snapshot(&self) -> SummarySnapshot {
        let now = Instant::now();
        let cutoff = now - self.window;

        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(&(at, _)) = samples.front() {
            if at < cutoff {
                samples.pop_front();
            } else {
                break;
            }
        }

        if samples.is_empty() {
            return SummarySnapshot::default();
        }

        let mut values: Vec<f64> = samples.iter().map(|&(_, v)| v).collect();
        drop(samples);

        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;

        SummarySnapshot {
            count,
            mean,
            p50: percentile(&values, 0.50),
            p90: percentile(&values, 0.90),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
        }
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_is_zeroed() {
        let summary = RollingSummary::new(Duration::from_secs(60));
        let snap = summary.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.p99, 0.0);
    }

    #[test]
    fn percentiles_over_uniform_samples() {
        let summary = RollingSummary::new(Duration::from_secs(60));
        for i in 1..=100 {
            summary.observe(i as f64);
        }

        let snap = summary.snapshot();
        assert_eq!(snap.count, 100);
        assert_eq!(snap.p50, 50.0);
        assert_eq!(snap.p90, 90.0);
        assert_eq!(snap.p95, 95.0);
        assert_eq!(snap.p99, 99.0);
        assert!((snap.mean - 50.5).abs() < 1e-9);
    }

    #[test]
    fn single_sample_dominates_every_quantile() {
        let summary = RollingSummary::new(Duration::from_secs(60));
        summary.observe(7.0);

        let snap = summary.snapshot();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.p50, 7.0);
        assert_eq!(snap.p99, 7.0);
    }

    #[test]
    fn old_samples_are_evicted() {
        let summary = RollingSummary::new(Duration::from_millis(50));
        summary.observe(1000.0);
        std::thread::sleep(Duration::from_millis(80));
        summary.observe(1.0);

        let snap = summary.snapshot();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.p99, 1.0);
    }

    #[test]
    fn sample_count_is_bounded() {
        let summary = RollingSummary::new(Duration::from_secs(3600));
        for i in 0..(MAX_SAMPLES + 500) {
            summary.observe(i as f64);
        }
        let snap = summary.snapshot();
        assert_eq!(snap.count, MAX_SAMPLES);
    }
}
