//! Error accounting for the authorization core.
//!
//! Tracks failures by the taxonomy's category labels over a sliding window
//! sized to match the monitoring surface's percentile window. The split the
//! health verdict cares about is infrastructure versus business: cache and
//! database outages (and timeouts) degrade the service, while lookup misses,
//! conflicts and validation failures are expected outcomes and must never
//! push the status to degraded.

use super::{Error, ErrorCode, ErrorSeverity};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Window matching the check-duration percentile window (5 minutes).
const WINDOW_SECS: i64 = 300;

/// Hard cap on retained window entries under error storms.
const MAX_WINDOW_ENTRIES: usize = 10_000;

/// Categories that count against availability. Everything else is a normal
/// business outcome of the authorization API.
const INFRASTRUCTURE_CATEGORIES: &[&str] = &["cache", "database", "system", "performance"];

#[derive(Debug, Default)]
struct ErrorWindow {
    /// Recent errors with the category they were filed under
    entries: VecDeque<(DateTime<Utc>, ErrorCode)>,
    /// Lifetime totals per error code
    totals: HashMap<ErrorCode, u64>,
}

impl ErrorWindow {
    fn record(&mut self, code: ErrorCode) {
        let now = Utc::now();
        self.entries.push_back((now, code));
        *self.totals.entry(code).or_insert(0) += 1;

        self.evict(now);
        while self.entries.len() > MAX_WINDOW_ENTRIES {
            self.entries.pop_front();
        }
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(WINDOW_SECS);
        while let Some(&(at, _)) = self.entries.front() {
            if at < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_count_where(&self, predicate: impl Fn(ErrorCode) -> bool) -> usize {
        let cutoff = Utc::now() - Duration::seconds(WINDOW_SECS);
        self.entries
            .iter()
            .filter(|(at, code)| *at >= cutoff && predicate(*code))
            .count()
    }
}

/// Error metrics keyed to the authorization error taxonomy.
#[derive(Debug, Default)]
pub struct ErrorMetrics {
    window: RwLock<ErrorWindow>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one error and log it at a level matching its severity.
    pub async fn record_error(&self, error: &Error) {
        {
            let mut window = self.window.write().await;
            window.record(error.code);
        }

        match error.severity {
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_id = %error.context.error_id,
                    error_code = %error.code,
                    category = error.code.category(),
                    "Error recorded"
                );
            }
            ErrorSeverity::Medium => {
                tracing::info!(
                    error_id = %error.context.error_id,
                    error_code = %error.code,
                    category = error.code.category(),
                    message = %error.message,
                    "Error recorded"
                );
            }
            ErrorSeverity::High => {
                tracing::warn!(
                    error_id = %error.context.error_id,
                    error_code = %error.code,
                    category = error.code.category(),
                    message = %error.message,
                    details = ?error.details,
                    "High severity error recorded"
                );
            }
            ErrorSeverity::Critical => {
                tracing::error!(
                    error_id = %error.context.error_id,
                    error_code = %error.code,
                    category = error.code.category(),
                    message = %error.message,
                    details = ?error.details,
                    context = ?error.context,
                    "Critical error recorded"
                );
            }
        }
    }

    /// Errors of every kind inside the current window.
    pub async fn errors_in_window(&self) -> usize {
        let window = self.window.read().await;
        window.window_count_where(|_| true)
    }

    /// Infrastructure failures (cache, database, system, timeout classes)
    /// inside the current window. This is the numerator of the monitoring
    /// surface's error rate; business outcomes are excluded so a burst of
    /// validation failures cannot degrade the health verdict.
    pub async fn infrastructure_errors_in_window(&self) -> usize {
        let window = self.window.read().await;
        window.window_count_where(|code| INFRASTRUCTURE_CATEGORIES.contains(&code.category()))
    }

    /// Window count for one category label of the taxonomy.
    pub async fn category_errors_in_window(&self, category: &str) -> usize {
        let window = self.window.read().await;
        window.window_count_where(|code| code.category() == category)
    }

    /// Lifetime total for one error code.
    pub async fn total_for_code(&self, code: ErrorCode) -> u64 {
        let window = self.window.read().await;
        window.totals.get(&code).copied().unwrap_or(0)
    }

    /// All errors per minute over the window (operator-facing summary).
    pub async fn get_error_rate(&self) -> f64 {
        let count = self.errors_in_window().await;
        count as f64 / (WINDOW_SECS as f64 / 60.0)
    }

    /// Point-in-time snapshot for the monitoring surface.
    pub async fn snapshot(&self) -> ErrorMetricsSnapshot {
        let window = self.window.read().await;

        let mut category_counts: HashMap<&'static str, u64> = HashMap::new();
        let cutoff = Utc::now() - Duration::seconds(WINDOW_SECS);
        for (at, code) in window.entries.iter() {
            if *at >= cutoff {
                *category_counts.entry(code.category()).or_insert(0) += 1;
            }
        }

        let infrastructure_errors = INFRASTRUCTURE_CATEGORIES
            .iter()
            .filter_map(|c| category_counts.get(c))
            .sum();

        ErrorMetricsSnapshot {
            window_secs: WINDOW_SECS as u64,
            total_errors: category_counts.values().sum(),
            infrastructure_errors,
            category_counts: category_counts
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            timestamp: Utc::now(),
        }
    }

    /// Reset all tracking (used by tests).
    pub async fn reset(&self) {
        let mut window = self.window.write().await;
        window.entries.clear();
        window.totals.clear();
    }
}

/// Snapshot of error accounting at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorMetricsSnapshot {
    pub window_secs: u64,
    pub total_errors: u64,
    pub infrastructure_errors: u64,
    pub category_counts: HashMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn business_outcomes_do_not_count_as_infrastructure() {
        let metrics = ErrorMetrics::new();

        metrics
            .record_error(&Error::new(ErrorCode::ValidationFailed, "bad input"))
            .await;
        metrics
            .record_error(&Error::new(ErrorCode::PermissionNotFound, "missing"))
            .await;
        metrics
            .record_error(&Error::new(ErrorCode::PermissionAlreadyGranted, "dup"))
            .await;

        assert_eq!(metrics.errors_in_window().await, 3);
        assert_eq!(metrics.infrastructure_errors_in_window().await, 0);
    }

    #[tokio::test]
    async fn outages_and_timeouts_count_as_infrastructure() {
        let metrics = ErrorMetrics::new();

        metrics
            .record_error(&Error::new(ErrorCode::PermissionCacheError, "redis down"))
            .await;
        metrics
            .record_error(&Error::new(
                ErrorCode::PermissionDbConnectionError,
                "pool exhausted",
            ))
            .await;
        metrics
            .record_error(&Error::new(ErrorCode::PermissionCheckTimeout, "deadline"))
            .await;
        metrics
            .record_error(&Error::new(ErrorCode::PermissionDenied, "no"))
            .await;

        assert_eq!(metrics.infrastructure_errors_in_window().await, 3);
        assert_eq!(metrics.category_errors_in_window("cache").await, 1);
        assert_eq!(metrics.category_errors_in_window("database").await, 1);
        assert_eq!(metrics.category_errors_in_window("authorization").await, 1);
    }

    #[tokio::test]
    async fn lifetime_totals_survive_window_queries() {
        let metrics = ErrorMetrics::new();

        for _ in 0..5 {
            metrics
                .record_error(&Error::new(ErrorCode::PermissionCacheError, "flap"))
                .await;
        }

        assert_eq!(metrics.total_for_code(ErrorCode::PermissionCacheError).await, 5);
        assert_eq!(metrics.total_for_code(ErrorCode::PermissionDenied).await, 0);
        assert!(metrics.get_error_rate().await > 0.0);
    }

    #[tokio::test]
    async fn snapshot_groups_by_category() {
        let metrics = ErrorMetrics::new();

        metrics
            .record_error(&Error::new(ErrorCode::PermissionCacheError, "a"))
            .await;
        metrics
            .record_error(&Error::new(ErrorCode::PermissionCacheInvalidationFailed, "b"))
            .await;
        metrics
            .record_error(&Error::new(ErrorCode::ValidationFailed, "c"))
            .await;

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.total_errors, 3);
        assert_eq!(snapshot.infrastructure_errors, 2);
        assert_eq!(snapshot.category_counts.get("cache"), Some(&2));
        assert_eq!(snapshot.category_counts.get("validation"), Some(&1));
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let metrics = ErrorMetrics::new();
        metrics
            .record_error(&Error::new(ErrorCode::InternalError, "boom"))
            .await;
        metrics.reset().await;

        assert_eq!(metrics.errors_in_window().await, 0);
        assert_eq!(metrics.total_for_code(ErrorCode::InternalError).await, 0);
    }
}
