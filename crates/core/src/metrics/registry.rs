//! Metrics registry and scrape exporter.
//!
//! The registry owns the namespaced prometheus registry and knows how to
//! install the authorization check-metrics bundle into it. The exporter
//! renders the scrape text and appends the rolling-window check-duration
//! quantiles, which live outside prometheus (a cumulative histogram cannot
//! answer "P95 over the last five minutes", so the engine keeps its own
//! window and the exporter writes it out as a quantile-labelled series).

use super::check_metrics::CheckMetrics;
use crate::config::MetricsConfig;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    registry: Arc<Mutex<Registry>>,
    config: MetricsConfig,
}

impl MetricsRegistry {
    pub fn new(config: MetricsConfig) -> Self {
        let registry = Registry::new_custom(Some(config.namespace.clone()), None)
            .unwrap_or_else(|_| {
                warn!("Failed to create custom registry, using default");
                Registry::new()
            });

        Self {
            registry: Arc::new(Mutex::new(registry)),
            config,
        }
    }

    /// Build the check-metrics bundle for this registry's namespace and
    /// register every collector. With metrics disabled the bundle is still
    /// returned (recording into unregistered collectors is harmless) but
    /// nothing is installed, so the scrape stays empty.
    pub fn install_check_metrics(&self) -> Result<CheckMetrics, prometheus::Error> {
        let check_metrics = CheckMetrics::new(&self.config.namespace)?;

        if self.config.enabled {
            let registry = self
                .registry
                .lock()
                .map_err(|_| prometheus::Error::Msg("Failed to acquire registry lock".to_string()))?;
            check_metrics.register_all(&registry)?;
            info!(
                namespace = %self.config.namespace,
                "Authorization check metrics registered"
            );
        }

        Ok(check_metrics)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn metrics_text(&self) -> String {
        let metric_families = match self.registry.lock() {
            Ok(registry) => registry.gather(),
            Err(_) => Vec::new(),
        };

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_else(|e| {
            warn!("Failed to convert metrics to UTF-8: {}", e);
            String::new()
        })
    }
}

/// Scrape endpoint backend: prometheus text plus the sliding-window
/// check-duration quantiles.
pub struct MetricsExporter {
    registry: MetricsRegistry,
    check_metrics: CheckMetrics,
}

impl MetricsExporter {
    pub fn new(registry: MetricsRegistry, check_metrics: CheckMetrics) -> Self {
        Self {
            registry,
            check_metrics,
        }
    }

    pub fn scrape(&self) -> String {
        if !self.registry.is_enabled() {
            return "# Metrics disabled\n".to_string();
        }

        let namespace = self.registry.namespace();
        let mut response = format!(
            "# HELP {ns}_build_info Authorization core build information\n\
             # TYPE {ns}_build_info gauge\n\
             {ns}_build_info{{version=\"{version}\"}} 1\n",
            ns = namespace,
            version = env!("CARGO_PKG_VERSION")
        );

        response.push_str(&self.registry.metrics_text());
        response.push_str(&self.window_quantiles_text(namespace));
        response
    }

    /// Render the rolling-window percentile summary as an exposition
    /// series the prometheus registry cannot produce itself.
    fn window_quantiles_text(&self, namespace: &str) -> String {
        let snapshot = self.check_metrics.duration_percentiles();

        let mut text = format!(
            "# HELP {ns}_check_duration_window_ms Check duration quantiles over the rolling window\n\
             # TYPE {ns}_check_duration_window_ms gauge\n",
            ns = namespace
        );
        for (quantile, value) in [
            ("0.5", snapshot.p50),
            ("0.9", snapshot.p90),
            ("0.95", snapshot.p95),
            ("0.99", snapshot.p99),
        ] {
            text.push_str(&format!(
                "{ns}_check_duration_window_ms{{quantile=\"{q}\"}} {v}\n",
                ns = namespace,
                q = quantile,
                v = value
            ));
        }
        text.push_str(&format!(
            "{ns}_check_duration_window_count {count}\n",
            ns = namespace,
            count = snapshot.count
        ));
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> MetricsConfig {
        MetricsConfig {
            enabled,
            namespace: "authz_reg_test".to_string(),
        }
    }

    #[test]
    fn install_registers_collectors_when_enabled() {
        let registry = MetricsRegistry::new(config(true));
        let check_metrics = registry.install_check_metrics().unwrap();

        check_metrics.record_check("database", true, 12.0);

        let exporter = MetricsExporter::new(registry, check_metrics);
        let text = exporter.scrape();
        assert!(text.contains("authz_reg_test_checks_total"));
        assert!(text.contains("check_duration_window_ms{quantile=\"0.95\"}"));
        assert!(text.contains("build_info"));
    }

    #[test]
    fn disabled_registry_scrapes_nothing() {
        let registry = MetricsRegistry::new(config(false));
        let check_metrics = registry.install_check_metrics().unwrap();

        let exporter = MetricsExporter::new(registry, check_metrics);
        assert_eq!(exporter.scrape(), "# Metrics disabled\n");
    }

    #[test]
    fn window_quantiles_follow_recorded_durations() {
        let registry = MetricsRegistry::new(config(true));
        let check_metrics = registry.install_check_metrics().unwrap();

        for i in 1..=100 {
            check_metrics.record_check("database", true, i as f64);
        }

        let exporter = MetricsExporter::new(registry, check_metrics);
        let text = exporter.scrape();
        assert!(text.contains("{quantile=\"0.5\"} 50"));
        assert!(text.contains("{quantile=\"0.99\"} 99"));
        assert!(text.contains("check_duration_window_count 100"));
    }
}
