use super::summary::{RollingSummary, SummarySnapshot};
use prometheus::{
    GaugeVec, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// SLO thresholds recorded as violations.
pub const SLO_CHECK_LATENCY_MS: f64 = 100.0;
pub const SLO_BATCH_CACHE_HIT_RATE: f64 = 0.80;

/// Authorization check metrics
#[derive(Clone)]
pub struct CheckMetrics {
    // Check outcomes
    pub checks_total: IntCounterVec,
    pub checks_allowed_total: IntCounter,
    pub checks_denied_total: IntCounter,

    // Cache behavior
    pub cache_hits_total: IntCounterVec,
    pub cache_misses_total: IntCounterVec,
    pub invalidations_total: IntCounterVec,
    pub invalidation_failures_total: IntCounterVec,

    // Guards
    pub timeouts_total: IntCounter,
    pub slo_violations_total: IntCounterVec,
    pub breaker_failures_total: IntCounterVec,

    // Durations
    pub check_duration_seconds: HistogramVec,
    pub db_query_duration_seconds: HistogramVec,
    pub batch_size: HistogramVec,
    pub batch_duration_seconds: HistogramVec,

    // Gauges
    pub breaker_state: GaugeVec,
    pub active_checks: IntGauge,

    // Rolling percentile window for the monitoring surface
    duration_summary: Arc<RollingSummary>,
}

impl CheckMetrics {
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let checks_total = IntCounterVec::new(
            Opts::new(
                format!("{}_checks_total", namespace),
                "Total permission checks by resolution source and outcome",
            ),
            &["source", "outcome"],
        )?;

        let checks_allowed_total = IntCounter::new(
            format!("{}_checks_allowed_total", namespace),
            "Total checks that resolved to allowed",
        )?;

        let checks_denied_total = IntCounter::new(
            format!("{}_checks_denied_total", namespace),
            "Total checks that resolved to denied",
        )?;

        let cache_hits_total = IntCounterVec::new(
            Opts::new(
                format!("{}_cache_hits_total", namespace),
                "Cache hits by layer (matrix, redis)",
            ),
            &["layer"],
        )?;

        let cache_misses_total = IntCounterVec::new(
            Opts::new(
                format!("{}_cache_misses_total", namespace),
                "Cache misses by layer",
            ),
            &["layer"],
        )?;

        let invalidations_total = IntCounterVec::new(
            Opts::new(
                format!("{}_invalidations_total", namespace),
                "Cache and matrix invalidations by target",
            ),
            &["target"],
        )?;

        let invalidation_failures_total = IntCounterVec::new(
            Opts::new(
                format!("{}_invalidation_failures_total", namespace),
                "Failed invalidations by target",
            ),
            &["target"],
        )?;

        let timeouts_total = IntCounter::new(
            format!("{}_timeouts_total", namespace),
            "Permission checks that exceeded their deadline",
        )?;

        let slo_violations_total = IntCounterVec::new(
            Opts::new(
                format!("{}_slo_violations_total", namespace),
                "SLO violations by kind (latency, batch_hit_rate)",
            ),
            &["kind"],
        )?;

        let breaker_failures_total = IntCounterVec::new(
            Opts::new(
                format!("{}_breaker_failures_total", namespace),
                "Failures recorded by circuit breakers",
            ),
            &["dependency"],
        )?;

        let check_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                format!("{}_check_duration_seconds", namespace),
                "Time spent resolving permission checks by source",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
            &["source"],
        )?;

        let db_query_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                format!("{}_db_query_duration_seconds", namespace),
                "Database query latency by query kind",
            )
            .buckets(vec![0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
            &["query"],
        )?;

        let batch_size = HistogramVec::new(
            prometheus::HistogramOpts::new(
                format!("{}_batch_size", namespace),
                "Size of batch check requests",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0]),
            &["operation"],
        )?;

        let batch_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                format!("{}_batch_duration_seconds", namespace),
                "Time spent on batch operations",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["operation"],
        )?;

        let breaker_state = GaugeVec::new(
            Opts::new(
                format!("{}_breaker_state", namespace),
                "Circuit breaker state (0=closed, 0.5=half-open, 1=open)",
            ),
            &["dependency"],
        )?;

        let active_checks = IntGauge::new(
            format!("{}_active_checks", namespace),
            "Permission checks currently in flight",
        )?;

        Ok(Self {
            checks_total,
            checks_allowed_total,
            checks_denied_total,
            cache_hits_total,
            cache_misses_total,
            invalidations_total,
            invalidation_failures_total,
            timeouts_total,
            slo_violations_total,
            breaker_failures_total,
            check_duration_seconds,
            db_query_duration_seconds,
            batch_size,
            batch_duration_seconds,
            breaker_state,
            active_checks,
            duration_summary: Arc::new(RollingSummary::new(Duration::from_secs(300))),
        })
    }

    pub fn register_all(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.checks_total.clone()))?;
        registry.register(Box::new(self.checks_allowed_total.clone()))?;
        registry.register(Box::new(self.checks_denied_total.clone()))?;
        registry.register(Box::new(self.cache_hits_total.clone()))?;
        registry.register(Box::new(self.cache_misses_total.clone()))?;
        registry.register(Box::new(self.invalidations_total.clone()))?;
        registry.register(Box::new(self.invalidation_failures_total.clone()))?;
        registry.register(Box::new(self.timeouts_total.clone()))?;
        registry.register(Box::new(self.slo_violations_total.clone()))?;
        registry.register(Box::new(self.breaker_failures_total.clone()))?;
        registry.register(Box::new(self.check_duration_seconds.clone()))?;
        registry.register(Box::new(self.db_query_duration_seconds.clone()))?;
        registry.register(Box::new(self.batch_size.clone()))?;
        registry.register(Box::new(self.batch_duration_seconds.clone()))?;
        registry.register(Box::new(self.breaker_state.clone()))?;
        registry.register(Box::new(self.active_checks.clone()))?;
        Ok(())
    }

    /// Record a resolved check: outcome counters, per-source histogram,
    /// rolling summary, and the latency SLO violation counter.
    pub fn record_check(&self, source: &str, allowed: bool, duration_ms: f64) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.checks_total.with_label_values(&[source, outcome]).inc();
        if allowed {
            self.checks_allowed_total.inc();
        } else {
            self.checks_denied_total.inc();
        }
        self.check_duration_seconds
            .with_label_values(&[source])
            .observe(duration_ms / 1000.0);
        self.duration_summary.observe(duration_ms);

        if duration_ms > SLO_CHECK_LATENCY_MS {
            self.slo_violations_total
                .with_label_values(&["latency"])
                .inc();
        }
    }

    /// Record a batch's cache hit rate against its SLO.
    pub fn record_batch(&self, operation: &str, size: usize, hits: usize, duration_secs: f64) {
        self.batch_size
            .with_label_values(&[operation])
            .observe(size as f64);
        self.batch_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);

        if size > 0 {
            let hit_rate = hits as f64 / size as f64;
            if hit_rate < SLO_BATCH_CACHE_HIT_RATE {
                self.slo_violations_total
                    .with_label_values(&["batch_hit_rate"])
                    .inc();
            }
        }
    }

    pub fn record_cache_hit(&self, layer: &str) {
        self.cache_hits_total.with_label_values(&[layer]).inc();
    }

    pub fn record_cache_miss(&self, layer: &str) {
        self.cache_misses_total.with_label_values(&[layer]).inc();
    }

    pub fn set_breaker_state(&self, dependency: &str, gauge_value: f64) {
        self.breaker_state
            .with_label_values(&[dependency])
            .set(gauge_value);
    }

    /// Current rolling-window percentiles (P50/P90/P95/P99 in ms).
    pub fn duration_percentiles(&self) -> SummarySnapshot {
        self.duration_summary.snapshot()
    }

    /// Cache hit rate across all layers since process start.
    pub fn cache_hit_rate(&self) -> f64 {
        let hits: u64 = ["matrix", "redis"]
            .iter()
            .map(|l| self.cache_hits_total.with_label_values(&[l]).get())
            .sum();
        let misses: u64 = ["matrix", "redis"]
            .iter()
            .map(|l| self.cache_misses_total.with_label_values(&[l]).get())
            .sum();
        let total = hits + misses;
        if total == 0 {
            1.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_check_tracks_outcomes_and_slo() {
        let metrics = CheckMetrics::new("test_a").unwrap();

        metrics.record_check("database", true, 50.0);
        metrics.record_check("redis", false, 150.0);

        assert_eq!(metrics.checks_allowed_total.get(), 1);
        assert_eq!(metrics.checks_denied_total.get(), 1);
        assert_eq!(
            metrics
                .slo_violations_total
                .with_label_values(&["latency"])
                .get(),
            1
        );
    }

    #[test]
    fn batch_hit_rate_violation() {
        let metrics = CheckMetrics::new("test_b").unwrap();

        // 50% hit rate on a batch of 10 violates the 80% SLO
        metrics.record_batch("batch_check", 10, 5, 0.01);
        assert_eq!(
            metrics
                .slo_violations_total
                .with_label_values(&["batch_hit_rate"])
                .get(),
            1
        );

        // 90% does not
        metrics.record_batch("batch_check", 10, 9, 0.01);
        assert_eq!(
            metrics
                .slo_violations_total
                .with_label_values(&["batch_hit_rate"])
                .get(),
            1
        );
    }

    #[test]
    fn hit_rate_defaults_to_full_when_no_traffic() {
        let metrics = CheckMetrics::new("test_c").unwrap();
        assert_eq!(metrics.cache_hit_rate(), 1.0);

        metrics.record_cache_hit("redis");
        metrics.record_cache_miss("redis");
        metrics.record_cache_miss("matrix");
        assert!((metrics.cache_hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn percentiles_reflect_recorded_durations() {
        let metrics = CheckMetrics::new("test_d").unwrap();
        for i in 1..=100 {
            metrics.record_check("database", true, i as f64);
        }
        let snap = metrics.duration_percentiles();
        assert_eq!(snap.p50, 50.0);
        assert_eq!(snap.p99, 99.0);
    }
}
