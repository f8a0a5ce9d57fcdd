use super::AuditEvent;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trait for audit backends (database, file, remote sink)
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Append an audit event. The sink is append-only.
    async fn store_event(&self, event: &AuditEvent) -> Result<()>;

    /// Retrieve audit events with filtering
    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>>;

    /// Count audit events matching filter
    async fn count_events(&self, filter: &AuditFilter) -> Result<u64>;

    /// Clean up old events based on retention policy
    async fn cleanup_old_events(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

/// Filter for querying audit events
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Start time range
    pub start_time: Option<DateTime<Utc>>,
    /// End time range
    pub end_time: Option<DateTime<Utc>>,
    /// Filter by actor ID
    pub actor_id: Option<String>,
    /// Filter by resource type
    pub resource_type: Option<String>,
    /// Filter by resource ID
    pub resource_id: Option<String>,
    /// Pagination limit
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

impl AuditFilter {
    pub fn for_actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Default::default()
        }
    }

    pub fn for_resource(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            resource_id: Some(resource_id.into()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}
