use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Actions a permission can describe. Stored as TEXT; the enum exists for
/// validation and cache-key construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionAction {
    Create,
    Read,
    Update,
    Delete,
    Approve,
    Assign,
    Export,
    Import,
}

impl PermissionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Approve => "APPROVE",
            Self::Assign => "ASSIGN",
            Self::Export => "EXPORT",
            Self::Import => "IMPORT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(Self::Create),
            "READ" => Some(Self::Read),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "APPROVE" => Some(Self::Approve),
            "ASSIGN" => Some(Self::Assign),
            "EXPORT" => Some(Self::Export),
            "IMPORT" => Some(Self::Import),
            _ => None,
        }
    }
}

/// Coarse relational qualifier narrowing where a permission applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionScope {
    Own,
    Department,
    School,
    All,
}

impl PermissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Own => "OWN",
            Self::Department => "DEPARTMENT",
            Self::School => "SCHOOL",
            Self::All => "ALL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OWN" => Some(Self::Own),
            "DEPARTMENT" => Some(Self::Department),
            "SCHOOL" => Some(Self::School),
            "ALL" => Some(Self::All),
            _ => None,
        }
    }
}

/// Typed form of a policy's rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyType {
    TimeBased,
    LocationBased,
    AttributeBased,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeBased => "TIME_BASED",
            Self::LocationBased => "LOCATION_BASED",
            Self::AttributeBased => "ATTRIBUTE_BASED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TIME_BASED" => Some(Self::TimeBased),
            "LOCATION_BASED" => Some(Self::LocationBased),
            "ATTRIBUTE_BASED" => Some(Self::AttributeBased),
            _ => None,
        }
    }
}

/// Principal kind a policy can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    User,
    Role,
    Department,
    Position,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Role => "ROLE",
            Self::Department => "DEPARTMENT",
            Self::Position => "POSITION",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "ROLE" => Some(Self::Role),
            "DEPARTMENT" => Some(Self::Department),
            "POSITION" => Some(Self::Position),
            _ => None,
        }
    }
}

/// Permission codes that may only be revoked with `force_revoke`.
pub const CRITICAL_PERMISSION_CODES: &[&str] =
    &["system.admin", "permission.grant", "permission.revoke"];

/// The atomic unit of authority, addressed by `(resource, action, scope)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    /// Stable unique code, e.g. `document.read`
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub resource: String,
    pub action: String,
    pub scope: Option<String>,
    /// Immutable flag: system permissions are never deleted or restructured
    pub is_system_permission: bool,
    /// Optional taxonomy bucket
    pub group_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    /// Matrix/cache key coordinate, `resource:action:scope`.
    pub fn permission_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.resource,
            self.action,
            self.scope.as_deref().unwrap_or("none")
        )
    }
}

/// Dependency edge: holding `permission_id` requires also holding
/// `depends_on_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionDependency {
    pub permission_id: Uuid,
    pub depends_on_id: Uuid,
}

/// A named bundle of permissions. Lower `hierarchy_level` is more
/// authoritative. Roles form a DAG via [`RoleHierarchy`] edges.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub hierarchy_level: i32,
    /// Immutable flag: system roles admit no permission or hierarchy edits
    pub is_system_role: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parent edge in the role DAG.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoleHierarchy {
    pub role_id: Uuid,
    pub parent_role_id: Uuid,
    pub inherit_permissions: bool,
}

/// Edge (role -> permission) with grant/deny semantics and a temporal window.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RolePermission {
    pub id: Uuid,
    pub role_id: Uuid,
    pub permission_id: Uuid,
    /// Grant vs explicit deny
    pub is_granted: bool,
    pub conditions: Option<serde_json::Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub grant_reason: Option<String>,
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Assignment of a role to a user profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRole {
    pub id: Uuid,
    pub user_profile_id: Uuid,
    pub role_id: Uuid,
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub assigned_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Direct grant to a user profile. Within the direct layer the highest
/// `priority` wins; `is_granted = false` is an explicit deny that beats any
/// role-derived grant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserPermission {
    pub id: Uuid,
    pub user_profile_id: Uuid,
    pub permission_id: Uuid,
    pub is_granted: bool,
    pub conditions: Option<serde_json::Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// 0..=1000, higher overrides lower within the direct layer
    pub priority: i32,
    pub is_temporary: bool,
    pub grant_reason: Option<String>,
    pub granted_by: Option<Uuid>,
    pub revoke_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserPermission {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.valid_from {
            if from > now {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if until < now {
                return false;
            }
        }
        true
    }
}

/// Grant targeted at one object instance `(resource_type, resource_id)`.
/// Resource grants can allow but never deny by themselves.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResourcePermission {
    pub id: Uuid,
    pub user_profile_id: Uuid,
    pub permission_id: Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub is_granted: bool,
    pub conditions: Option<serde_json::Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub grant_reason: Option<String>,
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Typed rule set applied to principals. Lower `priority` value takes
/// precedence during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionPolicy {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub policy_type: String,
    /// Typed JSON, validated by the matching evaluator at write time
    pub rules: serde_json::Value,
    pub priority: i32,
    pub is_active: bool,
    /// Permission codes this policy can grant when applicable
    pub grant_permissions: Option<serde_json::Value>,
    /// Permission codes this policy denies when applicable
    pub deny_permissions: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PermissionPolicy {
    pub fn policy_type(&self) -> Option<PolicyType> {
        PolicyType::from_str(&self.policy_type)
    }

    fn codes_of(value: &Option<serde_json::Value>) -> Vec<String> {
        value
            .as_ref()
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn grant_codes(&self) -> Vec<String> {
        Self::codes_of(&self.grant_permissions)
    }

    pub fn deny_codes(&self) -> Vec<String> {
        Self::codes_of(&self.deny_permissions)
    }
}

/// (policy -> principal) assignment with a temporal window.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PolicyAssignment {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub principal_type: String,
    pub principal_id: Uuid,
    pub conditions: Option<serde_json::Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub assigned_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Temporal, revocable transfer of a subset of the delegator's permission
/// codes to the delegate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionDelegation {
    pub id: Uuid,
    pub delegator_id: Uuid,
    pub delegate_id: Uuid,
    /// JSON array of permission codes
    pub permissions: serde_json::Value,
    pub reason: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_by: Option<Uuid>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PermissionDelegation {
    pub fn permission_codes(&self) -> Vec<String> {
        serde_json::from_value(self.permissions.clone()).unwrap_or_default()
    }

    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && self.valid_from <= now && self.valid_until > now
    }
}

/// Reusable bundle of permission codes applied to users as one unit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionTemplate {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    /// JSON array of permission codes
    pub permissions: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One application of a template to a user profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TemplateApplication {
    pub id: Uuid,
    pub template_id: Uuid,
    pub user_profile_id: Uuid,
    pub is_active: bool,
    pub applied_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Pre-computed effective permission row. `priority` stores the maximum of
/// the contributing layers (direct = 100, role = 50).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionMatrixEntry {
    pub id: Uuid,
    pub user_profile_id: Uuid,
    /// `resource:action:scope`
    pub permission_key: String,
    pub is_allowed: bool,
    /// JSON array of grant sources
    pub granted_by: serde_json::Value,
    pub priority: i32,
    pub expires_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
    pub computed_at: DateTime<Utc>,
}

pub const MATRIX_PRIORITY_DIRECT: i32 = 100;
pub const MATRIX_PRIORITY_ROLE: i32 = 50;

impl PermissionMatrixEntry {
    pub fn granted_by_sources(&self) -> Vec<String> {
        serde_json::from_value(self.granted_by.clone()).unwrap_or_default()
    }
}

/// Rolling per-user counter of recent checks, driving warm-up and matrix
/// refresh scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActiveUserTracking {
    pub user_profile_id: Uuid,
    pub check_count: i64,
    pub window_started_at: DateTime<Utc>,
    pub last_check_at: DateTime<Utc>,
    pub is_high_priority: bool,
}

/// Entity kinds recorded in the change history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEntityType {
    UserPermission,
    RolePermission,
    UserRole,
    ResourcePermission,
    PermissionDelegation,
    TemplateApplication,
    Permission,
    Role,
    PermissionPolicy,
}

impl HistoryEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPermission => "user_permission",
            Self::RolePermission => "role_permission",
            Self::UserRole => "user_role",
            Self::ResourcePermission => "resource_permission",
            Self::PermissionDelegation => "permission_delegation",
            Self::TemplateApplication => "template_application",
            Self::Permission => "permission",
            Self::Role => "role",
            Self::PermissionPolicy => "permission_policy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user_permission" => Some(Self::UserPermission),
            "role_permission" => Some(Self::RolePermission),
            "user_role" => Some(Self::UserRole),
            "resource_permission" => Some(Self::ResourcePermission),
            "permission_delegation" => Some(Self::PermissionDelegation),
            "template_application" => Some(Self::TemplateApplication),
            "permission" => Some(Self::Permission),
            "role" => Some(Self::Role),
            "permission_policy" => Some(Self::PermissionPolicy),
            _ => None,
        }
    }
}

/// Append-only record of one permission mutation, carrying the payload
/// needed to undo it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionChangeHistory {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    /// grant, revoke, update, create, delete, rollback_<original>
    pub operation: String,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub performed_by: Option<Uuid>,
    pub performed_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
    pub is_rollbackable: bool,
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Links a rollback entry to the entry it undid
    pub rollback_of: Option<Uuid>,
}

/// One resolved check, persisted for analytics and the weekly cleanup.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionCheckLog {
    pub id: Uuid,
    pub user_profile_id: Uuid,
    pub resource: String,
    pub action: String,
    pub scope: Option<String>,
    pub resource_id: Option<String>,
    pub is_allowed: bool,
    pub denied_reason: Option<String>,
    pub duration_ms: i64,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Minimal view of a user profile owned by the upstream identity domain.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub is_superadmin: bool,
    pub is_active: bool,
    pub department_id: Option<Uuid>,
    pub position_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_key_includes_scope_placeholder() {
        let mut permission = Permission {
            id: Uuid::new_v4(),
            code: "document.read".to_string(),
            name: "Read documents".to_string(),
            description: None,
            resource: "document".to_string(),
            action: "READ".to_string(),
            scope: Some("OWN".to_string()),
            is_system_permission: false,
            group_name: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(permission.permission_key(), "document:READ:OWN");

        permission.scope = None;
        assert_eq!(permission.permission_key(), "document:READ:none");
    }

    #[test]
    fn action_and_scope_round_trip() {
        for action in ["CREATE", "READ", "UPDATE", "DELETE", "APPROVE", "ASSIGN"] {
            assert_eq!(PermissionAction::from_str(action).unwrap().as_str(), action);
        }
        assert!(PermissionAction::from_str("FROB").is_none());

        for scope in ["OWN", "DEPARTMENT", "SCHOOL", "ALL"] {
            assert_eq!(PermissionScope::from_str(scope).unwrap().as_str(), scope);
        }
        assert!(PermissionScope::from_str("GLOBAL").is_none());
    }

    #[test]
    fn temporal_validity_of_user_permission() {
        let now = Utc::now();
        let mut grant = UserPermission {
            id: Uuid::new_v4(),
            user_profile_id: Uuid::new_v4(),
            permission_id: Uuid::new_v4(),
            is_granted: true,
            conditions: None,
            valid_from: None,
            valid_until: None,
            priority: 100,
            is_temporary: false,
            grant_reason: None,
            granted_by: None,
            revoke_reason: None,
            created_at: now,
            updated_at: now,
        };

        assert!(grant.is_effective(now));

        grant.valid_until = Some(now - chrono::Duration::hours(1));
        assert!(!grant.is_effective(now));

        grant.valid_until = None;
        grant.valid_from = Some(now + chrono::Duration::hours(1));
        assert!(!grant.is_effective(now));
    }

    #[test]
    fn delegation_effectiveness() {
        let now = Utc::now();
        let mut delegation = PermissionDelegation {
            id: Uuid::new_v4(),
            delegator_id: Uuid::new_v4(),
            delegate_id: Uuid::new_v4(),
            permissions: serde_json::json!(["a.read", "b.write"]),
            reason: None,
            valid_from: now - chrono::Duration::hours(1),
            valid_until: now + chrono::Duration::hours(1),
            is_revoked: false,
            revoked_by: None,
            revoked_at: None,
            revoked_reason: None,
            created_at: now,
        };

        assert!(delegation.is_effective(now));
        assert_eq!(delegation.permission_codes(), vec!["a.read", "b.write"]);

        delegation.is_revoked = true;
        assert!(!delegation.is_effective(now));
    }

    #[test]
    fn history_entity_type_round_trip() {
        for entity in [
            "user_permission",
            "role_permission",
            "permission_delegation",
            "template_application",
        ] {
            assert_eq!(
                HistoryEntityType::from_str(entity).unwrap().as_str(),
                entity
            );
        }
    }
}
