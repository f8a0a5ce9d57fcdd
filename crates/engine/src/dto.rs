use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// Check engine DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub resource: String,
    #[validate(length(min = 1, max = 50))]
    pub action: String,
    pub scope: Option<String>,
    pub resource_id: Option<String>,
    /// Evaluation context forwarded to policy evaluators
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub is_allowed: bool,
    pub granted_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub check_duration_ms: u64,
}

impl CheckResult {
    pub fn allowed(granted_by: Vec<String>) -> Self {
        Self {
            is_allowed: true,
            granted_by,
            reason: None,
            check_duration_ms: 0,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            is_allowed: false,
            granted_by: Vec::new(),
            reason: Some(reason.into()),
            check_duration_ms: 0,
        }
    }
}

/// One triple of a batch check.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckTriple {
    pub resource: String,
    pub action: String,
    pub scope: Option<String>,
}

impl CheckTriple {
    /// Map key in the batch response, `resource:action:scope`.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.resource,
            self.action,
            self.scope.as_deref().unwrap_or("none")
        )
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BatchCheckRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1))]
    pub checks: Vec<CheckTriple>,
}

#[derive(Debug, Serialize)]
pub struct BatchCheckResponse {
    pub results: std::collections::HashMap<String, bool>,
    pub total_checked: usize,
    pub total_allowed: usize,
    pub cache_hits: usize,
}

// Permission entity DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 100))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub resource: String,
    #[validate(length(min = 1, max = 50))]
    pub action: String,
    pub scope: Option<String>,
    pub group_name: Option<String>,
    #[serde(default)]
    pub is_system_permission: bool,
    /// Permission ids that must also hold
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePermissionRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub group_name: Option<String>,
    pub is_active: Option<bool>,
    pub dependencies: Option<Vec<Uuid>>,
}

// Role DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 100))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub hierarchy_level: i32,
    #[serde(default)]
    pub is_system_role: bool,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
    #[serde(default)]
    pub parent_roles: Vec<ParentRoleEdge>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParentRoleEdge {
    pub role_id: Uuid,
    #[serde(default = "default_true")]
    pub inherit_permissions: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub hierarchy_level: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GrantRolePermissionRequest {
    pub permission_id: Uuid,
    #[serde(default = "default_true")]
    pub is_granted: bool,
    pub conditions: Option<serde_json::Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub grant_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

// User grant DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GrantUserPermissionRequest {
    pub permission_id: Uuid,
    pub conditions: Option<serde_json::Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Defaults to 100 within the direct layer
    #[validate(range(min = 0, max = 1000))]
    pub priority: Option<i32>,
    #[serde(default)]
    pub is_temporary: bool,
    #[validate(length(max = 500))]
    pub grant_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RevokeUserPermissionRequest {
    pub permission_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub revoke_reason: String,
    #[serde(default)]
    pub force_revoke: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GrantResourcePermissionRequest {
    pub permission_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub resource_type: String,
    #[validate(length(min = 1, max = 255))]
    pub resource_id: String,
    pub conditions: Option<serde_json::Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub grant_reason: Option<String>,
}

// Bulk operation DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BulkGrantRequest {
    #[validate(length(min = 1, max = 100))]
    pub user_ids: Vec<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub permission_codes: Vec<String>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_temporary: bool,
    pub grant_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BulkRevokeRequest {
    #[validate(length(min = 1, max = 100))]
    pub user_ids: Vec<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub permission_codes: Vec<String>,
    #[validate(length(min = 1, max = 500))]
    pub revoke_reason: String,
    #[serde(default)]
    pub force_revoke: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkErrorItem {
    pub target_id: Uuid,
    pub permission_code: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BulkSummary {
    pub created: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkOperationResult {
    pub processed: u64,
    pub failed: u64,
    pub summary: BulkSummary,
    pub errors: Vec<BulkErrorItem>,
}

// Delegation DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDelegationRequest {
    pub delegate_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub permissions: Vec<String>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RevokeDelegationRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExtendDelegationRequest {
    pub valid_until: DateTime<Utc>,
}

// Policy DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePolicyRequest {
    #[validate(length(min = 1, max = 100))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub policy_type: String,
    pub rules: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    pub grant_permissions: Option<Vec<String>>,
    pub deny_permissions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePolicyRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub rules: Option<serde_json::Value>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
    pub grant_permissions: Option<Vec<String>>,
    pub deny_permissions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignPolicyRequest {
    #[validate(length(min = 1, max = 50))]
    pub principal_type: String,
    pub principal_id: Uuid,
    pub conditions: Option<serde_json::Value>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluatePolicyRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub context: serde_json::Value,
}

// Template DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 100))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyTemplateRequest {
    pub user_id: Uuid,
}

// History / rollback DTOs

#[derive(Debug, Clone, Deserialize)]
pub struct RollbackRequest {
    pub change_id: Uuid,
}

// List filters

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PermissionListQuery {
    pub resource: Option<String>,
    pub action: Option<String>,
    pub group_name: Option<String>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// Monitoring DTOs

#[derive(Debug, Serialize)]
pub struct HealthStatusResponse {
    pub status: String,
    pub metrics: serde_json::Value,
    pub circuit_breakers: Vec<authz_core::BreakerSnapshot>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn triple_key_uses_none_placeholder() {
        let triple = CheckTriple {
            resource: "document".to_string(),
            action: "READ".to_string(),
            scope: None,
        };
        assert_eq!(triple.key(), "document:READ:none");

        let scoped = CheckTriple {
            resource: "user".to_string(),
            action: "DELETE".to_string(),
            scope: Some("ALL".to_string()),
        };
        assert_eq!(scoped.key(), "user:DELETE:ALL");
    }

    #[test]
    fn bulk_request_size_limits() {
        let over_limit = BulkGrantRequest {
            user_ids: (0..101).map(|_| Uuid::new_v4()).collect(),
            permission_codes: vec!["a.read".to_string()],
            valid_until: None,
            is_temporary: false,
            grant_reason: None,
        };
        assert!(over_limit.validate().is_err());

        let ok = BulkGrantRequest {
            user_ids: vec![Uuid::new_v4()],
            permission_codes: vec!["a.read".to_string()],
            valid_until: None,
            is_temporary: false,
            grant_reason: None,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn revoke_requires_reason() {
        let request = RevokeUserPermissionRequest {
            permission_id: Uuid::new_v4(),
            revoke_reason: String::new(),
            force_revoke: false,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn grant_priority_bounds() {
        let request = GrantUserPermissionRequest {
            permission_id: Uuid::new_v4(),
            conditions: None,
            valid_from: None,
            valid_until: None,
            priority: Some(1001),
            is_temporary: false,
            grant_reason: None,
        };
        assert!(request.validate().is_err());
    }
}
