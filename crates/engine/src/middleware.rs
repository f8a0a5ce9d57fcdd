//! HTTP middleware.
//!
//! Identity verification happens upstream; the gateway attaches the
//! authenticated principal as headers. [`principal_middleware`] lifts them
//! into a [`RequestContext`] request extension, and [`require_permission`]
//! builds per-route layers that consult the check engine before letting an
//! administrative handler run.

use crate::dto::CheckRequest;
use crate::engine::CheckEngine;
use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use authz_core::RequestContext;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// Headers the upstream gateway attaches to every request.
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_PROFILE_ID: &str = "x-profile-id";
pub const HEADER_SUPERADMIN: &str = "x-superadmin";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Lift the gateway's principal headers into a `RequestContext` extension.
pub async fn principal_middleware(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let user_id = match header_uuid(&request, HEADER_USER_ID) {
        Some(user_id) => user_id,
        None => {
            return Ok(unauthorized_response("Missing authenticated principal"));
        }
    };

    // The profile defaults to the user when the gateway sends no profile
    let profile_id = header_uuid(&request, HEADER_PROFILE_ID).unwrap_or(user_id);

    let is_superadmin = request
        .headers()
        .get(HEADER_SUPERADMIN)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == "true" || value == "1")
        .unwrap_or(false);

    let mut context = RequestContext::new(user_id, profile_id, is_superadmin);
    if let Some(request_id) = request
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
    {
        context = context.with_request_id(request_id.to_string());
    }

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Declarative permission requirement for a route: the handler runs only
/// when the check engine allows `(resource, action, scope)` for the caller.
#[derive(Debug, Clone)]
pub struct RequirePermission {
    pub resource: &'static str,
    pub action: &'static str,
    pub scope: Option<&'static str>,
}

impl RequirePermission {
    pub const fn new(resource: &'static str, action: &'static str) -> Self {
        Self {
            resource,
            action,
            scope: None,
        }
    }

    pub const fn scoped(resource: &'static str, action: &'static str, scope: &'static str) -> Self {
        Self {
            resource,
            action,
            scope: Some(scope),
        }
    }
}

/// Build a middleware closure enforcing one permission requirement through
/// the check engine.
pub fn require_permission(
    engine: Arc<CheckEngine>,
    requirement: RequirePermission,
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, StatusCode>> + Send>>
       + Clone {
    move |request: Request, next: Next| {
        let engine = Arc::clone(&engine);
        let requirement = requirement.clone();
        Box::pin(async move {
            let context = match request.extensions().get::<RequestContext>() {
                Some(context) => context.clone(),
                None => {
                    error!("Request context not found in require_permission middleware");
                    return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
                }
            };

            let check = CheckRequest {
                user_id: context.profile_id,
                resource: requirement.resource.to_string(),
                action: requirement.action.to_string(),
                scope: requirement.scope.map(|s| s.to_string()),
                resource_id: None,
                context: None,
            };

            match engine.check(check).await {
                Ok(result) if result.is_allowed => Ok(next.run(request).await),
                Ok(result) => {
                    warn!(
                        user_id = %context.profile_id,
                        resource = requirement.resource,
                        action = requirement.action,
                        reason = ?result.reason,
                        "Administrative request denied"
                    );
                    Ok(forbidden_response(&format!(
                        "Missing required permission: {}:{}",
                        requirement.resource, requirement.action
                    )))
                }
                Err(e) => {
                    error!(error = %e, "Permission check failed in middleware");
                    Ok((
                        StatusCode::from_u16(e.http_status())
                            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                        Json(e.to_api_response()),
                    )
                        .into_response())
                }
            }
        })
    }
}

// Helpers

fn header_uuid(request: &Request, name: &str) -> Option<Uuid> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn forbidden_response(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
