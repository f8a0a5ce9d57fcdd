//! Monitoring surface (C13).
//!
//! Aggregates the circuit breakers and check metrics into one health
//! verdict: `unhealthy` when any breaker is open, `degraded` when the error
//! rate, average check latency or cache hit rate violates its threshold,
//! `healthy` otherwise.

use crate::dto::HealthStatusResponse;
use authz_core::{BreakerRegistry, CheckMetrics, ErrorMetrics};
use chrono::Utc;
use std::sync::Arc;

const DEGRADED_ERROR_RATE: f64 = 0.05;
const DEGRADED_AVG_DURATION_MS: f64 = 100.0;
const DEGRADED_CACHE_HIT_RATE: f64 = 0.70;

#[derive(Clone)]
pub struct MonitoringService {
    breakers: Arc<BreakerRegistry>,
    metrics: CheckMetrics,
    error_metrics: Arc<ErrorMetrics>,
}

impl MonitoringService {
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        metrics: CheckMetrics,
        error_metrics: Arc<ErrorMetrics>,
    ) -> Self {
        Self {
            breakers,
            metrics,
            error_metrics,
        }
    }

    pub async fn health(&self) -> HealthStatusResponse {
        let snapshots = self.breakers.snapshots().await;
        for snapshot in &snapshots {
            self.metrics
                .set_breaker_state(&snapshot.name, snapshot.state.gauge_value());
        }

        let percentiles = self.metrics.duration_percentiles();
        let hit_rate = self.metrics.cache_hit_rate();
        let error_rate = self.error_rate(percentiles.count).await;
        let errors = self.error_metrics.snapshot().await;

        let status = if self.breakers.any_open().await {
            "unhealthy"
        } else if error_rate > DEGRADED_ERROR_RATE
            || percentiles.mean > DEGRADED_AVG_DURATION_MS
            || hit_rate < DEGRADED_CACHE_HIT_RATE
        {
            "degraded"
        } else {
            "healthy"
        };

        HealthStatusResponse {
            status: status.to_string(),
            metrics: serde_json::json!({
                "checks_allowed": self.metrics.checks_allowed_total.get(),
                "checks_denied": self.metrics.checks_denied_total.get(),
                "cache_hit_rate": hit_rate,
                "error_rate": error_rate,
                "errors": errors,
                "active_checks": self.metrics.active_checks.get(),
                "check_duration_ms": {
                    "mean": percentiles.mean,
                    "p50": percentiles.p50,
                    "p90": percentiles.p90,
                    "p95": percentiles.p95,
                    "p99": percentiles.p99,
                },
            }),
            circuit_breakers: snapshots,
            timestamp: Utc::now(),
        }
    }

    /// Infrastructure failures relative to checks over the shared rolling
    /// window. Business outcomes (validation, lookup misses, deny-style
    /// conflicts) are excluded so they cannot degrade the verdict.
    async fn error_rate(&self, checks_in_window: usize) -> f64 {
        let errors_in_window = self.error_metrics.infrastructure_errors_in_window().await;
        if checks_in_window == 0 {
            return 0.0;
        }
        (errors_in_window as f64 / checks_in_window as f64).min(1.0)
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }
}
