use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for the authorization core.
/// These are surfaced verbatim in error responses and must not be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Lookup misses
    PermissionNotFound,
    PermissionCodeNotFound,
    RoleNotFound,
    UserNotFound,
    PolicyNotFound,
    DelegationNotFound,

    // Unique-key conflicts
    PermissionAlreadyExists,
    PermissionCombinationExists,
    RoleAlreadyExists,
    PermissionAlreadyGranted,

    // System-entity protection
    SystemPermissionImmutable,
    SystemPermissionDeleteForbidden,
    SystemRoleImmutable,
    RoleInUse,

    // Authorization decisions surfaced as errors (admin endpoints)
    PermissionDenied,
    PermissionExpired,

    // Dependency / hierarchy integrity
    PermissionDependencyCycle,
    PermissionDependencyNotFound,
    RoleHierarchyCycle,

    // Delegation contract violations
    DelegationNotHeld,
    DelegationAlreadyRevoked,
    DelegationInvalidWindow,
    DelegationNotDelegator,

    // Cache outages
    PermissionCacheError,
    PermissionCacheInvalidationFailed,

    // Database outages
    PermissionDbConnectionError,
    PermissionDbQueryError,
    PermissionDbTransactionError,

    // Validation
    PermissionInvalidResource,
    PermissionInvalidAction,
    PermissionInvalidScope,
    PermissionInvalidConditions,
    PolicyInvalidRules,
    ValidationFailed,

    // Performance guards
    PermissionCheckTimeout,
    PermissionRateLimitExceeded,

    // Bulk operations
    PermissionBatchPartialFailure,
    PermissionBatchSizeExceeded,

    // Rollback
    RollbackNotPossible,

    // Infrastructure
    SerializationError,
    ConfigurationError,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    /// HTTP status the code maps to at the API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            // 404 - Not Found
            ErrorCode::PermissionNotFound
            | ErrorCode::PermissionCodeNotFound
            | ErrorCode::RoleNotFound
            | ErrorCode::UserNotFound
            | ErrorCode::PolicyNotFound
            | ErrorCode::DelegationNotFound
            | ErrorCode::PermissionDependencyNotFound => 404,

            // 409 - Conflict
            ErrorCode::PermissionAlreadyExists
            | ErrorCode::PermissionCombinationExists
            | ErrorCode::RoleAlreadyExists
            | ErrorCode::PermissionAlreadyGranted
            | ErrorCode::RoleInUse
            | ErrorCode::DelegationAlreadyRevoked => 409,

            // 403 - Forbidden
            ErrorCode::SystemPermissionImmutable
            | ErrorCode::SystemPermissionDeleteForbidden
            | ErrorCode::SystemRoleImmutable
            | ErrorCode::PermissionDenied
            | ErrorCode::PermissionExpired
            | ErrorCode::DelegationNotDelegator => 403,

            // 400 - Bad Request
            ErrorCode::PermissionDependencyCycle
            | ErrorCode::RoleHierarchyCycle
            | ErrorCode::DelegationNotHeld
            | ErrorCode::DelegationInvalidWindow
            | ErrorCode::PermissionInvalidResource
            | ErrorCode::PermissionInvalidAction
            | ErrorCode::PermissionInvalidScope
            | ErrorCode::PermissionInvalidConditions
            | ErrorCode::PolicyInvalidRules
            | ErrorCode::ValidationFailed
            | ErrorCode::PermissionBatchSizeExceeded => 400,

            // 408 - Request Timeout
            ErrorCode::PermissionCheckTimeout => 408,

            // 429 - Too Many Requests
            ErrorCode::PermissionRateLimitExceeded => 429,

            // 422 - Unprocessable Entity
            ErrorCode::RollbackNotPossible
            | ErrorCode::PermissionBatchPartialFailure => 422,

            // 503 - Service Unavailable
            ErrorCode::PermissionCacheError
            | ErrorCode::PermissionCacheInvalidationFailed
            | ErrorCode::PermissionDbConnectionError
            | ErrorCode::ServiceUnavailable => 503,

            // 500 - Internal Server Error
            ErrorCode::PermissionDbQueryError
            | ErrorCode::PermissionDbTransactionError
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::InternalError => 500,
        }
    }

    /// Category label for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::PermissionNotFound
            | ErrorCode::PermissionCodeNotFound
            | ErrorCode::RoleNotFound
            | ErrorCode::UserNotFound
            | ErrorCode::PolicyNotFound
            | ErrorCode::DelegationNotFound
            | ErrorCode::PermissionDependencyNotFound => "lookup",

            ErrorCode::PermissionAlreadyExists
            | ErrorCode::PermissionCombinationExists
            | ErrorCode::RoleAlreadyExists
            | ErrorCode::PermissionAlreadyGranted
            | ErrorCode::RoleInUse
            | ErrorCode::DelegationAlreadyRevoked => "conflict",

            ErrorCode::SystemPermissionImmutable
            | ErrorCode::SystemPermissionDeleteForbidden
            | ErrorCode::SystemRoleImmutable => "immutable",

            ErrorCode::PermissionDenied
            | ErrorCode::PermissionExpired
            | ErrorCode::DelegationNotDelegator => "authorization",

            ErrorCode::PermissionDependencyCycle
            | ErrorCode::RoleHierarchyCycle => "integrity",

            ErrorCode::DelegationNotHeld
            | ErrorCode::DelegationInvalidWindow => "delegation",

            ErrorCode::PermissionCacheError
            | ErrorCode::PermissionCacheInvalidationFailed => "cache",

            ErrorCode::PermissionDbConnectionError
            | ErrorCode::PermissionDbQueryError
            | ErrorCode::PermissionDbTransactionError => "database",

            ErrorCode::PermissionInvalidResource
            | ErrorCode::PermissionInvalidAction
            | ErrorCode::PermissionInvalidScope
            | ErrorCode::PermissionInvalidConditions
            | ErrorCode::PolicyInvalidRules
            | ErrorCode::ValidationFailed => "validation",

            ErrorCode::PermissionCheckTimeout
            | ErrorCode::PermissionRateLimitExceeded => "performance",

            ErrorCode::PermissionBatchPartialFailure
            | ErrorCode::PermissionBatchSizeExceeded => "bulk",

            ErrorCode::RollbackNotPossible => "rollback",

            ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::ServiceUnavailable
            | ErrorCode::InternalError => "system",
        }
    }

    /// Check if the failed operation is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::PermissionCacheError
                | ErrorCode::PermissionDbConnectionError
                | ErrorCode::ServiceUnavailable
                | ErrorCode::PermissionCheckTimeout
        )
    }

    /// Check if the error should be logged at error level.
    /// Expected business outcomes (validation failures, lookup misses,
    /// conflicts, deny decisions) stay at warn.
    pub fn should_log_as_error(&self) -> bool {
        !matches!(
            self.category(),
            "lookup" | "conflict" | "validation" | "authorization" | "delegation" | "bulk"
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Render the wire form, e.g. PERMISSION_NOT_FOUND
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_screaming_snake_case() {
        assert_eq!(ErrorCode::PermissionNotFound.to_string(), "PERMISSION_NOT_FOUND");
        assert_eq!(
            ErrorCode::PermissionBatchSizeExceeded.to_string(),
            "PERMISSION_BATCH_SIZE_EXCEEDED"
        );
        assert_eq!(ErrorCode::PermissionCheckTimeout.to_string(), "PERMISSION_CHECK_TIMEOUT");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorCode::PermissionNotFound.http_status(), 404);
        assert_eq!(ErrorCode::PermissionCombinationExists.http_status(), 409);
        assert_eq!(ErrorCode::PermissionCheckTimeout.http_status(), 408);
        assert_eq!(ErrorCode::PermissionDbConnectionError.http_status(), 503);
        assert_eq!(ErrorCode::PermissionBatchSizeExceeded.http_status(), 400);
    }

    #[test]
    fn deny_style_codes_do_not_log_as_error() {
        assert!(!ErrorCode::PermissionDenied.should_log_as_error());
        assert!(!ErrorCode::ValidationFailed.should_log_as_error());
        assert!(ErrorCode::PermissionDbTransactionError.should_log_as_error());
    }
}
