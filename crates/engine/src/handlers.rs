use crate::{
    dto::*,
    engine::CheckEngine,
    middleware::{principal_middleware, require_permission, RequirePermission},
    monitoring::MonitoringService,
    service::{
        BulkOperationService, DelegationService, GrantService, HistoryService, PermissionService,
        PolicyService, RoleService, TemplateService,
    },
};
use authz_core::{Error, ErrorCode, RequestContext};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Shared service bundle behind every authorization route.
#[derive(Clone)]
pub struct AuthzState {
    pub engine: Arc<CheckEngine>,
    pub permissions: PermissionService,
    pub roles: RoleService,
    pub grants: GrantService,
    pub delegations: DelegationService,
    pub policies: PolicyService,
    pub bulk: BulkOperationService,
    pub history: HistoryService,
    pub templates: TemplateService,
    pub monitoring: MonitoringService,
}

/// Assemble the full authorization router with the gateway principal
/// middleware applied and administrative routes guarded by the check
/// engine itself.
pub fn authz_routes(state: AuthzState) -> Router {
    let engine = Arc::clone(&state.engine);

    let admin = |resource: &'static str, action: &'static str| {
        middleware::from_fn(require_permission(
            Arc::clone(&engine),
            RequirePermission::new(resource, action),
        ))
    };

    let check_routes = Router::new()
        .route("/permissions/check", post(check_permission))
        .route("/permissions/batch-check", post(batch_check));

    let permission_routes = Router::new()
        .route("/permissions", get(list_permissions))
        .route(
            "/permissions",
            post(create_permission).layer(admin("permission", "CREATE")),
        )
        .route("/permissions/:id", get(get_permission))
        .route(
            "/permissions/:id",
            put(update_permission).layer(admin("permission", "UPDATE")),
        )
        .route(
            "/permissions/:id",
            delete(delete_permission).layer(admin("permission", "DELETE")),
        )
        .route("/permissions/rollback", post(rollback_change))
        .route("/permission-groups/:group", get(list_permissions_by_group));

    let role_routes = Router::new()
        .route("/roles", get(list_roles))
        .route("/roles", post(create_role).layer(admin("role", "CREATE")))
        .route("/roles/:id", get(get_role))
        .route("/roles/:id", put(update_role).layer(admin("role", "UPDATE")))
        .route(
            "/roles/:id",
            delete(delete_role).layer(admin("role", "DELETE")),
        )
        .route("/roles/:id/permissions", get(get_role_permissions))
        .route(
            "/roles/:id/permissions",
            post(grant_role_permission).layer(admin("role", "UPDATE")),
        )
        .route(
            "/roles/:id/permissions/:permission_id",
            delete(revoke_role_permission).layer(admin("role", "UPDATE")),
        )
        .route(
            "/roles/:id/parents",
            post(add_parent_role).layer(admin("role", "UPDATE")),
        );

    let user_permission_routes = Router::new()
        .route(
            "/user-permissions/:user_id",
            post(grant_user_permission).layer(admin("permission", "ASSIGN")),
        )
        .route(
            "/user-permissions/:user_id",
            delete(revoke_user_permission).layer(admin("permission", "ASSIGN")),
        )
        .route(
            "/user-permissions/:user_id/roles",
            post(assign_role).layer(admin("role", "ASSIGN")),
        )
        .route(
            "/user-permissions/:user_id/roles/:role_id",
            delete(remove_role).layer(admin("role", "ASSIGN")),
        )
        .route(
            "/user-permissions/:user_id/resources",
            post(grant_resource_permission).layer(admin("permission", "ASSIGN")),
        )
        .route(
            "/user-permissions/bulk-grant",
            post(bulk_grant).layer(admin("permission", "ASSIGN")),
        )
        .route(
            "/user-permissions/bulk-revoke",
            post(bulk_revoke).layer(admin("permission", "ASSIGN")),
        )
        .route(
            "/user-permissions/:user_id/effective",
            get(get_effective_permissions),
        )
        .route(
            "/user-permissions/:user_id/history",
            get(get_user_permission_history),
        );

    let policy_routes = Router::new()
        .route("/permission-policies", get(list_policies))
        .route(
            "/permission-policies",
            post(create_policy).layer(admin("permission", "CREATE")),
        )
        .route("/permission-policies/:id", get(get_policy))
        .route(
            "/permission-policies/:id",
            put(update_policy).layer(admin("permission", "UPDATE")),
        )
        .route(
            "/permission-policies/:id",
            delete(delete_policy).layer(admin("permission", "DELETE")),
        )
        .route(
            "/permission-policies/:id/assignments",
            post(assign_policy).layer(admin("permission", "ASSIGN")),
        )
        .route(
            "/permission-policies/:id/assignments/:principal_type/:principal_id",
            delete(unassign_policy).layer(admin("permission", "ASSIGN")),
        )
        .route("/permission-policies/:id/evaluate", post(evaluate_policy))
        .route("/permission-policies/evaluate-all", post(evaluate_all_policies));

    let delegation_routes = Router::new()
        .route("/permission-delegations", get(list_delegations))
        .route("/permission-delegations", post(create_delegation))
        .route("/permission-delegations/:id", get(get_delegation))
        .route("/permission-delegations/:id/revoke", post(revoke_delegation))
        .route("/permission-delegations/:id/extend", post(extend_delegation));

    let template_routes = Router::new()
        .route("/permission-templates", get(list_templates))
        .route(
            "/permission-templates",
            post(create_template).layer(admin("permission", "CREATE")),
        )
        .route("/permission-templates/:id", get(get_template))
        .route(
            "/permission-templates/:id/apply",
            post(apply_template).layer(admin("permission", "ASSIGN")),
        );

    let monitoring_routes = Router::new()
        .route("/permissions/monitoring/health", get(monitoring_health))
        .route(
            "/permissions/monitoring/circuit-breakers",
            get(monitoring_breakers),
        );

    check_routes
        .merge(permission_routes)
        .merge(role_routes)
        .merge(user_permission_routes)
        .merge(policy_routes)
        .merge(delegation_routes)
        .merge(template_routes)
        .merge(monitoring_routes)
        .layer(middleware::from_fn(principal_middleware))
        .with_state(state)
}

// Check handlers

async fn check_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(mut request): Json<CheckRequest>,
) -> Result<Json<CheckResult>, AppError> {
    request.validate().map_err(validation_error)?;

    // Non-superadmin callers may only check themselves
    if request.user_id != ctx.profile_id && !ctx.is_superadmin {
        request.user_id = ctx.profile_id;
    }

    let result = state.engine.check(request).await?;
    Ok(Json(result))
}

async fn batch_check(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(mut request): Json<BatchCheckRequest>,
) -> Result<Json<BatchCheckResponse>, AppError> {
    request.validate().map_err(validation_error)?;

    if request.user_id != ctx.profile_id && !ctx.is_superadmin {
        request.user_id = ctx.profile_id;
    }

    let response = state.engine.batch_check(request).await?;
    Ok(Json(response))
}

// Permission handlers

async fn list_permissions(
    State(state): State<AuthzState>,
    Query(query): Query<PermissionListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let permissions = state.permissions.list_permissions(&query).await?;
    Ok(Json(serde_json::json!({
        "permissions": permissions,
        "count": permissions.len()
    })))
}

async fn list_permissions_by_group(
    State(state): State<AuthzState>,
    Path(group): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let permissions = state.permissions.list_by_group(&group).await?;
    Ok(Json(serde_json::json!({
        "group": group,
        "permissions": permissions
    })))
}

async fn get_permission(
    State(state): State<AuthzState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::Permission>, AppError> {
    Ok(Json(state.permissions.get_permission(id).await?))
}

async fn create_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(request): Json<CreatePermissionRequest>,
) -> Result<(StatusCode, Json<crate::models::Permission>), AppError> {
    request.validate().map_err(validation_error)?;
    let permission = state.permissions.create_permission(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

async fn update_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePermissionRequest>,
) -> Result<Json<crate::models::Permission>, AppError> {
    request.validate().map_err(validation_error)?;
    Ok(Json(
        state.permissions.update_permission(&ctx, id, request).await?,
    ))
}

async fn delete_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.permissions.delete_permission(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rollback_change(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<crate::models::PermissionChangeHistory>, AppError> {
    info!(change_id = %request.change_id, "Rollback requested");
    let entry = state.history.rollback(&ctx, request.change_id).await?;
    Ok(Json(entry))
}

// Role handlers

async fn list_roles(
    State(state): State<AuthzState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let roles = state
        .roles
        .list_roles(query.limit.unwrap_or(100), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(serde_json::json!({ "roles": roles, "count": roles.len() })))
}

async fn get_role(
    State(state): State<AuthzState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::Role>, AppError> {
    Ok(Json(state.roles.get_role(id).await?))
}

async fn create_role(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(request): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<crate::models::Role>), AppError> {
    request.validate().map_err(validation_error)?;
    let role = state.roles.create_role(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

async fn update_role(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<crate::models::Role>, AppError> {
    request.validate().map_err(validation_error)?;
    Ok(Json(state.roles.update_role(&ctx, id, request).await?))
}

async fn delete_role(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.roles.delete_role(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_role_permissions(
    State(state): State<AuthzState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let permissions = state.roles.list_role_permissions(id).await?;
    Ok(Json(serde_json::json!({
        "role_id": id,
        "permissions": permissions
    })))
}

async fn grant_role_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<GrantRolePermissionRequest>,
) -> Result<Json<crate::models::RolePermission>, AppError> {
    request.validate().map_err(validation_error)?;
    Ok(Json(
        state.roles.grant_role_permission(&ctx, id, request).await?,
    ))
}

async fn revoke_role_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path((id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .roles
        .revoke_role_permission(&ctx, id, permission_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(serde::Deserialize)]
struct AddParentRoleRequest {
    parent_role_id: Uuid,
    #[serde(default = "default_inherit")]
    inherit_permissions: bool,
}

fn default_inherit() -> bool {
    true
}

async fn add_parent_role(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<AddParentRoleRequest>,
) -> Result<StatusCode, AppError> {
    state
        .roles
        .add_parent_role(&ctx, id, request.parent_role_id, request.inherit_permissions)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// User grant handlers

async fn grant_user_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(user_id): Path<Uuid>,
    Json(request): Json<GrantUserPermissionRequest>,
) -> Result<(StatusCode, Json<crate::models::UserPermission>), AppError> {
    request.validate().map_err(validation_error)?;
    let granted = state
        .grants
        .grant_user_permission(&ctx, user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(granted)))
}

async fn revoke_user_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(user_id): Path<Uuid>,
    Json(request): Json<RevokeUserPermissionRequest>,
) -> Result<Json<crate::models::UserPermission>, AppError> {
    request.validate().map_err(validation_error)?;
    Ok(Json(
        state
            .grants
            .revoke_user_permission(&ctx, user_id, request)
            .await?,
    ))
}

async fn assign_role(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(user_id): Path<Uuid>,
    Json(request): Json<AssignRoleRequest>,
) -> Result<(StatusCode, Json<crate::models::UserRole>), AppError> {
    request.validate().map_err(validation_error)?;
    let assignment = state.roles.assign_role(&ctx, user_id, request).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn remove_role(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.roles.remove_role(&ctx, user_id, role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn grant_resource_permission(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(user_id): Path<Uuid>,
    Json(request): Json<GrantResourcePermissionRequest>,
) -> Result<(StatusCode, Json<crate::models::ResourcePermission>), AppError> {
    request.validate().map_err(validation_error)?;
    let granted = state
        .grants
        .grant_resource_permission(&ctx, user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(granted)))
}

async fn bulk_grant(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(request): Json<BulkGrantRequest>,
) -> Result<Json<BulkOperationResult>, AppError> {
    request.validate().map_err(|_| {
        Error::new(
            ErrorCode::PermissionBatchSizeExceeded,
            "Bulk request exceeds the 100 x 100 target limit",
        )
    })?;
    Ok(Json(state.bulk.bulk_grant(&ctx, request).await?))
}

async fn bulk_revoke(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(request): Json<BulkRevokeRequest>,
) -> Result<Json<BulkOperationResult>, AppError> {
    request.validate().map_err(|_| {
        Error::new(
            ErrorCode::PermissionBatchSizeExceeded,
            "Bulk request exceeds the 100 x 100 target limit",
        )
    })?;
    Ok(Json(state.bulk.bulk_revoke(&ctx, request).await?))
}

async fn get_effective_permissions(
    State(state): State<AuthzState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let codes = state.grants.get_effective_codes(user_id).await?;
    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "permissions": codes
    })))
}

async fn get_user_permission_history(
    State(state): State<AuthzState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entries = state
        .history
        .list_for_entity("user_permission", user_id, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "history": entries
    })))
}

// Policy handlers

async fn list_policies(
    State(state): State<AuthzState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let policies = state
        .policies
        .list_policies(query.limit.unwrap_or(100), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(serde_json::json!({
        "policies": policies,
        "count": policies.len()
    })))
}

async fn get_policy(
    State(state): State<AuthzState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::PermissionPolicy>, AppError> {
    Ok(Json(state.policies.get_policy(id).await?))
}

async fn create_policy(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<(StatusCode, Json<crate::models::PermissionPolicy>), AppError> {
    request.validate().map_err(validation_error)?;
    let policy = state.policies.create_policy(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn update_policy(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePolicyRequest>,
) -> Result<Json<crate::models::PermissionPolicy>, AppError> {
    request.validate().map_err(validation_error)?;
    Ok(Json(state.policies.update_policy(&ctx, id, request).await?))
}

async fn delete_policy(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.policies.delete_policy(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_policy(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignPolicyRequest>,
) -> Result<(StatusCode, Json<crate::models::PolicyAssignment>), AppError> {
    request.validate().map_err(validation_error)?;
    let assignment = state.policies.assign_policy(&ctx, id, request).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn unassign_policy(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path((id, principal_type, principal_id)): Path<(Uuid, String, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .policies
        .unassign_policy(&ctx, id, &principal_type, principal_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn evaluate_policy(
    State(state): State<AuthzState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EvaluatePolicyRequest>,
) -> Result<Json<crate::policy::PolicyEvaluation>, AppError> {
    let evaluation = state
        .policies
        .evaluate_policy(id, request.user_id, &request.context)
        .await?;
    Ok(Json(evaluation))
}

async fn evaluate_all_policies(
    State(state): State<AuthzState>,
    Json(request): Json<EvaluatePolicyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let evaluations = state
        .policies
        .evaluate_all(request.user_id, &request.context)
        .await?;

    let results: Vec<serde_json::Value> = evaluations
        .into_iter()
        .map(|(policy_id, evaluation)| {
            serde_json::json!({
                "policy_id": policy_id,
                "evaluation": evaluation
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "results": results })))
}

// Delegation handlers

async fn list_delegations(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let delegations = state
        .delegations
        .list_for_delegator(
            ctx.profile_id,
            query.limit.unwrap_or(100),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(serde_json::json!({
        "delegations": delegations,
        "count": delegations.len()
    })))
}

async fn get_delegation(
    State(state): State<AuthzState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::PermissionDelegation>, AppError> {
    Ok(Json(state.delegations.get_delegation(id).await?))
}

async fn create_delegation(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(request): Json<CreateDelegationRequest>,
) -> Result<(StatusCode, Json<crate::models::PermissionDelegation>), AppError> {
    request.validate().map_err(validation_error)?;
    let delegation = state.delegations.create_delegation(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(delegation)))
}

async fn revoke_delegation(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<RevokeDelegationRequest>,
) -> Result<Json<crate::models::PermissionDelegation>, AppError> {
    request.validate().map_err(validation_error)?;
    Ok(Json(
        state.delegations.revoke_delegation(&ctx, id, request).await?,
    ))
}

async fn extend_delegation(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<ExtendDelegationRequest>,
) -> Result<Json<crate::models::PermissionDelegation>, AppError> {
    Ok(Json(
        state.delegations.extend_delegation(&ctx, id, request).await?,
    ))
}

// Template handlers

async fn list_templates(
    State(state): State<AuthzState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let templates = state
        .templates
        .list_templates(query.limit.unwrap_or(100), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(serde_json::json!({
        "templates": templates,
        "count": templates.len()
    })))
}

async fn get_template(
    State(state): State<AuthzState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::PermissionTemplate>, AppError> {
    Ok(Json(state.templates.get_template(id).await?))
}

async fn create_template(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<crate::models::PermissionTemplate>), AppError> {
    request.validate().map_err(validation_error)?;
    let template = state.templates.create_template(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn apply_template(
    State(state): State<AuthzState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(request): Json<ApplyTemplateRequest>,
) -> Result<(StatusCode, Json<crate::models::TemplateApplication>), AppError> {
    let application = state.templates.apply_template(&ctx, id, request).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

// Monitoring handlers

async fn monitoring_health(
    State(state): State<AuthzState>,
) -> Result<Json<HealthStatusResponse>, AppError> {
    Ok(Json(state.monitoring.health().await))
}

async fn monitoring_breakers(
    State(state): State<AuthzState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let snapshots = state.monitoring.breakers().snapshots().await;
    Ok(Json(serde_json::json!({ "circuit_breakers": snapshots })))
}

// Error handling

fn validation_error(errors: validator::ValidationErrors) -> Error {
    Error::new(ErrorCode::ValidationFailed, errors.to_string())
}

pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = Json(self.0.to_api_response());

        (status, body).into_response()
    }
}
