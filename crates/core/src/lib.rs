pub mod audit;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod metrics;
pub mod types;

pub use audit::{AuditBackend, AuditEvent, AuditLogger, DatabaseAuditRepository};
pub use breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use cache::{PipelineSet, RedisCacheAdapter};
pub use config::Config;
pub use database::DatabasePool;
pub use error::{Error, ErrorCode, ErrorContext, ErrorMetrics, Result};
pub use metrics::{CheckMetrics, MetricsExporter, MetricsRegistry, RollingSummary};
pub use types::*;

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
