use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity levels for audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// Audit event types emitted by the authorization core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Decisions
    AuthorizationGranted,
    AuthorizationDenied,

    // Permission entity lifecycle
    PermissionCreated,
    PermissionUpdated,
    PermissionDeleted,

    // Role lifecycle and membership
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    RoleAssigned,
    RoleRevoked,
    RolePermissionGranted,
    RolePermissionRevoked,

    // Direct and resource-scoped grants
    PermissionGranted,
    PermissionRevoked,
    ResourcePermissionGranted,
    ResourcePermissionRevoked,

    // Delegations
    DelegationCreated,
    DelegationRevoked,
    DelegationExtended,

    // Policies
    PolicyCreated,
    PolicyUpdated,
    PolicyDeleted,
    PolicyAssigned,
    PolicyUnassigned,

    // Bulk and recovery
    BulkGrant,
    BulkRevoke,
    RollbackApplied,

    // System
    SystemStartup,
    MaintenanceRun,

    // Extensions
    Custom(String),
}

/// Core audit event structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this event
    pub id: String,
    /// Event type
    pub event_type: EventType,
    /// Event severity
    pub severity: EventSeverity,
    /// Timestamp when event occurred
    pub timestamp: DateTime<Utc>,
    /// Principal who performed the action (if applicable)
    pub actor_id: Option<String>,
    /// Request ID for correlation
    pub request_id: Option<String>,
    /// Entity being acted upon
    pub resource_type: Option<String>,
    /// ID of the entity
    pub resource_id: Option<String>,
    /// Human-readable description
    pub description: String,
    /// Structured metadata
    pub metadata: HashMap<String, serde_json::Value>,
    /// Previous values (for update operations)
    pub previous_values: Option<serde_json::Value>,
    /// New values (for create/update operations)
    pub new_values: Option<serde_json::Value>,
    /// Operation outcome
    pub outcome: EventOutcome,
}

/// Event outcome enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Success,
    Failure,
    Partial,
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOutcome::Success => write!(f, "success"),
            EventOutcome::Failure => write!(f, "failure"),
            EventOutcome::Partial => write!(f, "partial"),
        }
    }
}

/// Builder for creating audit events
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            event: AuditEvent {
                id: Uuid::new_v4().to_string(),
                event_type,
                severity: EventSeverity::Info,
                timestamp: Utc::now(),
                actor_id: None,
                request_id: None,
                resource_type: None,
                resource_id: None,
                description: description.into(),
                metadata: HashMap::new(),
                previous_values: None,
                new_values: None,
                outcome: EventOutcome::Success,
            },
        }
    }

    pub fn severity(mut self, severity: EventSeverity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.event.actor_id = Some(actor_id.into());
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.event.request_id = Some(request_id.into());
        self
    }

    pub fn resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.event.resource_type = Some(resource_type.into());
        self.event.resource_id = Some(resource_id.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.event.metadata.insert(key.into(), value);
        self
    }

    pub fn previous_values(mut self, values: serde_json::Value) -> Self {
        self.event.previous_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: serde_json::Value) -> Self {
        self.event.new_values = Some(values);
        self
    }

    pub fn outcome(mut self, outcome: EventOutcome) -> Self {
        self.event.outcome = outcome;
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}

impl AuditEvent {
    /// Create a new builder
    pub fn builder(event_type: EventType, description: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type, description)
    }

    /// Get event category for grouping
    pub fn category(&self) -> &'static str {
        match &self.event_type {
            EventType::AuthorizationGranted | EventType::AuthorizationDenied => "decision",

            EventType::PermissionCreated
            | EventType::PermissionUpdated
            | EventType::PermissionDeleted => "permission",

            EventType::RoleCreated
            | EventType::RoleUpdated
            | EventType::RoleDeleted
            | EventType::RoleAssigned
            | EventType::RoleRevoked
            | EventType::RolePermissionGranted
            | EventType::RolePermissionRevoked => "role",

            EventType::PermissionGranted
            | EventType::PermissionRevoked
            | EventType::ResourcePermissionGranted
            | EventType::ResourcePermissionRevoked => "grant",

            EventType::DelegationCreated
            | EventType::DelegationRevoked
            | EventType::DelegationExtended => "delegation",

            EventType::PolicyCreated
            | EventType::PolicyUpdated
            | EventType::PolicyDeleted
            | EventType::PolicyAssigned
            | EventType::PolicyUnassigned => "policy",

            EventType::BulkGrant | EventType::BulkRevoke => "bulk",
            EventType::RollbackApplied => "rollback",
            EventType::SystemStartup | EventType::MaintenanceRun => "system",
            EventType::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Custom(name) => write!(f, "CUSTOM_{}", name.to_uppercase()),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
