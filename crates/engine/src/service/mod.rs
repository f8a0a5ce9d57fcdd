//! Mutation services.
//!
//! Each service wraps the grant store for one entity family. Every mutating
//! operation runs inside a single database transaction that also appends
//! the change-history record; after commit the invalidation fabric runs and
//! the audit event is emitted. Invalidation completes before the operation
//! returns to the caller, so no stale "allowed" survives a revoke.

mod bulk;
mod delegations;
mod grants;
mod history;
mod permissions;
mod policies;
mod roles;
mod templates;

pub use bulk::BulkOperationService;
pub use delegations::DelegationService;
pub use grants::GrantService;
pub use history::HistoryService;
pub use permissions::PermissionService;
pub use policies::PolicyService;
pub use roles::RoleService;
pub use templates::TemplateService;
