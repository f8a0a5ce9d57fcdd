use super::{
    event::{AuditEvent, EventOutcome, EventSeverity, EventType},
    traits::AuditBackend,
};
use crate::error::{ErrorMetrics, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// High-level audit logger.
///
/// Every mutating service operation emits exactly one event through here.
/// The sink is best-effort at this layer: a backend failure is recorded and
/// logged but never propagated into the mutation's outcome — the database
/// transaction that carried the mutation has its own change-history record.
#[derive(Clone)]
pub struct AuditLogger {
    backend: Arc<dyn AuditBackend>,
    error_metrics: Arc<ErrorMetrics>,
}

impl AuditLogger {
    pub fn new(backend: Arc<dyn AuditBackend>, error_metrics: Arc<ErrorMetrics>) -> Self {
        Self {
            backend,
            error_metrics,
        }
    }

    /// Log a generic audit event
    pub async fn log_event(&self, event: AuditEvent) -> Result<()> {
        match event.severity {
            EventSeverity::Info => {
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    actor_id = ?event.actor_id,
                    resource = ?event.resource_type,
                    description = %event.description,
                    "Audit event"
                );
            }
            EventSeverity::Warning => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    actor_id = ?event.actor_id,
                    resource = ?event.resource_type,
                    description = %event.description,
                    "Audit event (warning)"
                );
            }
            EventSeverity::Critical => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    actor_id = ?event.actor_id,
                    resource = ?event.resource_type,
                    description = %event.description,
                    metadata = ?event.metadata,
                    "Critical audit event"
                );
            }
        }

        match self.backend.store_event(&event).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.error_metrics.record_error(&e).await;
                error!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to store audit event"
                );
                Err(e)
            }
        }
    }

    /// Fire-and-forget variant; failures are swallowed after being recorded.
    pub async fn log_event_best_effort(&self, event: AuditEvent) {
        let _ = self.log_event(event).await;
    }

    /// Log a grant-layer mutation against a target user.
    pub async fn log_grant_change(
        &self,
        event_type: EventType,
        actor_id: &str,
        target_user_id: &str,
        details: &str,
        previous: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) {
        let description = format!("{} for user {}: {}", event_type, target_user_id, details);

        let mut builder = AuditEvent::builder(event_type, description)
            .actor_id(actor_id)
            .resource("user_profile", target_user_id);

        if let Some(prev) = previous {
            builder = builder.previous_values(prev);
        }
        if let Some(new) = new {
            builder = builder.new_values(new);
        }

        self.log_event_best_effort(builder.build()).await;
    }

    /// Log an entity lifecycle mutation (permission/role/policy/delegation).
    pub async fn log_entity_change(
        &self,
        event_type: EventType,
        actor_id: &str,
        resource_type: &str,
        resource_id: &str,
        previous: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) {
        let description = format!("{} {} {}", event_type, resource_type, resource_id);

        let mut builder = AuditEvent::builder(event_type, description)
            .actor_id(actor_id)
            .resource(resource_type, resource_id);

        if let Some(prev) = previous {
            builder = builder.previous_values(prev);
        }
        if let Some(new) = new {
            builder = builder.new_values(new);
        }

        self.log_event_best_effort(builder.build()).await;
    }

    /// Log a bulk operation with its partial-failure accounting.
    pub async fn log_bulk_operation(
        &self,
        event_type: EventType,
        actor_id: &str,
        processed: u64,
        failed: u64,
    ) {
        let outcome = if failed == 0 {
            EventOutcome::Success
        } else if processed > 0 {
            EventOutcome::Partial
        } else {
            EventOutcome::Failure
        };

        let event = AuditEvent::builder(
            event_type,
            format!("bulk operation: {} processed, {} failed", processed, failed),
        )
        .actor_id(actor_id)
        .outcome(outcome)
        .metadata("processed".to_string(), serde_json::json!(processed))
        .metadata("failed".to_string(), serde_json::json!(failed))
        .build();

        self.log_event_best_effort(event).await;
    }
}
