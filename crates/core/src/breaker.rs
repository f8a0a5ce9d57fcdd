//! Circuit breaker for downstream dependencies of the check engine.
//!
//! One breaker guards each named dependency (`database`, `cache`, `matrix`).
//! The state machine:
//!
//! - **Closed**: calls proceed. Failures within the monitoring period are
//!   counted; reaching the threshold opens the circuit. A quiet monitoring
//!   period resets the counter.
//! - **Open**: calls are short-circuited to the provided fallback (or fail
//!   fast without one). After the reset timeout has elapsed since the last
//!   failure, the next call moves the breaker to half-open.
//! - **Half-open**: a bounded number of probe calls is admitted. That many
//!   consecutive successes close the circuit; any failure reopens it and
//!   zeroes the probe count.
//!
//! State is process-local and exported through a metrics gauge
//! (0 = closed, 0.5 = half-open, 1 = open).

use crate::config::{BreakerConfig, BreakersConfig};
use crate::error::{Error, ErrorCode, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Too many failures - calls are short-circuited
    Open,
    /// Testing recovery - limited probe calls allowed
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding for the metrics surface.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Failures recorded in the current monitoring window
    failures: u32,
    /// Start of the current monitoring window
    window_started: Instant,
    /// When the last failure occurred (drives the open -> half-open wait)
    last_failure: Option<Instant>,
    /// Consecutive successes while half-open
    half_open_successes: u32,
    /// Probe calls admitted while half-open
    half_open_attempts: u32,
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Arc<RwLock<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                window_started: Instant::now(),
                last_failure: None,
                half_open_successes: 0,
                half_open_attempts: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run an operation under the breaker. When the circuit is open the
    /// fallback decides the outcome; without a fallback the call fails fast
    /// with `SERVICE_UNAVAILABLE`.
    pub async fn execute<T, F, Fut>(&self, operation: F, fallback: Option<T>) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.try_acquire().await {
            return match fallback {
                Some(value) => {
                    debug!(breaker = %self.name, "Circuit open, serving fallback");
                    Ok(value)
                }
                None => Err(Error::new(
                    ErrorCode::ServiceUnavailable,
                    format!("Circuit breaker '{}' is open", self.name),
                )),
            };
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    /// Decide whether a call may proceed, transitioning open -> half-open
    /// when the reset timeout has elapsed.
    pub async fn try_acquire(&self) -> bool {
        let mut inner = self.inner.write().await;

        match inner.state {
            CircuitState::Closed => {
                // A quiet monitoring period resets the failure count
                if inner.window_started.elapsed()
                    >= Duration::from_secs(self.config.monitoring_period_secs)
                {
                    inner.failures = 0;
                    inner.window_started = Instant::now();
                }
                true
            }
            CircuitState::Open => {
                let waited_out = inner
                    .last_failure
                    .map(|at| at.elapsed() >= Duration::from_secs(self.config.reset_timeout_secs))
                    .unwrap_or(true);

                if waited_out {
                    debug!(breaker = %self.name, "Reset timeout elapsed, probing half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_attempts = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_max_attempts {
                    inner.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;

        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_attempts {
                    debug!(breaker = %self.name, "Recovered, closing circuit");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.window_started = Instant::now();
                    inner.half_open_successes = 0;
                    inner.half_open_attempts = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.window_started.elapsed()
                    >= Duration::from_secs(self.config.monitoring_period_secs)
                {
                    inner.failures = 0;
                    inner.window_started = Instant::now();
                }
                inner.failures += 1;

                if inner.failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "Failure threshold reached, opening circuit"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Probe failed, reopening circuit");
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                inner.half_open_attempts = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn failure_count(&self) -> u32 {
        self.inner.read().await.failures
    }

    /// Manually reset to closed (operational escape hatch).
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.window_started = Instant::now();
        inner.last_failure = None;
        inner.half_open_successes = 0;
        inner.half_open_attempts = 0;
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read().await;
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            failure_threshold: self.config.failure_threshold,
        }
    }
}

/// Point-in-time view of a breaker for the monitoring surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    #[serde(serialize_with = "serialize_state")]
    pub state: CircuitState,
    pub failures: u32,
    pub failure_threshold: u32,
}

fn serialize_state<S>(state: &CircuitState, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(state.as_str())
}

/// The named breakers guarding the check engine's dependencies.
pub struct BreakerRegistry {
    breakers: HashMap<&'static str, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: &BreakersConfig) -> Self {
        let mut breakers: HashMap<&'static str, Arc<CircuitBreaker>> = HashMap::new();
        breakers.insert(
            "database",
            Arc::new(CircuitBreaker::new("database", config.database.clone())),
        );
        breakers.insert(
            "cache",
            Arc::new(CircuitBreaker::new("cache", config.cache.clone())),
        );
        breakers.insert(
            "matrix",
            Arc::new(CircuitBreaker::new("matrix", config.matrix.clone())),
        );
        Self { breakers }
    }

    pub fn database(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breakers["database"])
    }

    pub fn cache(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breakers["cache"])
    }

    pub fn matrix(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breakers["matrix"])
    }

    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots = Vec::with_capacity(self.breakers.len());
        for breaker in self.breakers.values() {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub async fn any_open(&self) -> bool {
        for breaker in self.breakers.values() {
            if breaker.state().await == CircuitState::Open {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout_secs: 1,
            half_open_max_attempts: 2,
            monitoring_period_secs: 60,
        }
    }

    #[tokio::test]
    async fn starts_closed_and_admits_calls() {
        let cb = CircuitBreaker::new("test", fast_config());
        assert!(cb.try_acquire().await);
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", fast_config());

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.try_acquire().await);
    }

    #[tokio::test]
    async fn probes_half_open_after_reset_timeout() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(cb.try_acquire().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_admits_bounded_attempts() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;

        // First acquire transitions to half-open and counts as attempt one
        assert!(cb.try_acquire().await);
        assert!(cb.try_acquire().await);
        assert!(!cb.try_acquire().await);
    }

    #[tokio::test]
    async fn consecutive_successes_close_the_circuit() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;
        cb.try_acquire().await;

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;
        cb.try_acquire().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let cb = CircuitBreaker::new("test", fast_config());
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.failure_count().await, 2);

        cb.record_success().await;
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn execute_serves_fallback_when_open() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure().await;
        }

        let result = cb
            .execute(|| async { Ok::<_, crate::error::Error>(1u32) }, Some(42u32))
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn execute_fails_fast_without_fallback() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure().await;
        }

        let result: Result<u32> = cb
            .execute(|| async { Ok::<_, crate::error::Error>(1u32) }, None)
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code, ErrorCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn gauge_values() {
        assert_eq!(CircuitState::Closed.gauge_value(), 0.0);
        assert_eq!(CircuitState::HalfOpen.gauge_value(), 0.5);
        assert_eq!(CircuitState::Open.gauge_value(), 1.0);
    }

    #[tokio::test]
    async fn registry_reports_open_breakers() {
        let registry = BreakerRegistry::new(&BreakersConfig::default());
        assert!(!registry.any_open().await);

        let db = registry.database();
        for _ in 0..5 {
            db.record_failure().await;
        }
        assert!(registry.any_open().await);

        let snapshots = registry.snapshots().await;
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].name, "cache");
    }
}
