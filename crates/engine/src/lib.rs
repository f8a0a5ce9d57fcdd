//! Authorization engine.
//!
//! The domain crate of the authorization core: data model, grant store,
//! condition validation, policy evaluators, permission cache and matrix,
//! the check engine, delegations, change history with rollback, bulk
//! operations, the invalidation fabric, scheduled maintenance and the HTTP
//! surface.

pub mod cache;
pub mod conditions;
pub mod dto;
pub mod engine;
pub mod handlers;
pub mod invalidation;
pub mod maintenance;
pub mod matrix;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod notify;
pub mod policy;
pub mod repository;
pub mod service;

pub use cache::{PermissionCacheService, TtlClass};
pub use engine::CheckEngine;
pub use handlers::{authz_routes, AuthzState};
pub use invalidation::InvalidationFabric;
pub use maintenance::{MaintenanceJobs, MaintenanceScheduler};
pub use matrix::PermissionMatrixService;
pub use monitoring::MonitoringService;
pub use notify::{NotificationSink, TracingNotificationSink};
pub use policy::{EvaluationContext, PolicyEvaluation, PolicyEvaluatorRegistry};
pub use repository::AuthzRepository;
pub use service::{
    BulkOperationService, DelegationService, GrantService, HistoryService, PermissionService,
    PolicyService, RoleService, TemplateService,
};
