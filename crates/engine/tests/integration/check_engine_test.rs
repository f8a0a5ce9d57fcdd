use crate::common::TestApp;
use authz_engine::dto::{BatchCheckRequest, CheckRequest, CheckTriple, GrantUserPermissionRequest};
use uuid::Uuid;

fn unique_resource(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

fn check(user_id: Uuid, resource: &str, action: &str, scope: Option<&str>) -> CheckRequest {
    CheckRequest {
        user_id,
        resource: resource.to_string(),
        action: action.to_string(),
        scope: scope.map(|s| s.to_string()),
        resource_id: None,
        context: None,
    }
}

// Cache miss resolves against the database, allows through the direct
// grant, and the second identical call hits the Redis cache with the READ
// TTL class.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn cache_miss_then_db_allow_then_cache_hit() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("document");

    let permission = app.create_permission(&resource, "READ", Some("OWN")).await;
    let user = app.create_user().await;

    app.grants
        .grant_user_permission(
            &app.superadmin_ctx,
            user,
            GrantUserPermissionRequest {
                permission_id: permission.id,
                conditions: None,
                valid_from: None,
                valid_until: None,
                priority: None,
                is_temporary: false,
                grant_reason: None,
            },
        )
        .await
        .unwrap();

    let mut request = check(user, &resource, "READ", Some("OWN"));
    request.resource_id = Some("d1".to_string());

    let first = app.engine.check(request.clone()).await.unwrap();
    assert!(first.is_allowed);
    assert_eq!(first.granted_by, vec!["direct-user-permission"]);

    // The stored entry carries the READ TTL class (600 s)
    let ttl = app
        .cache
        .check_ttl(user, &resource, "READ", Some("OWN"), Some("d1"))
        .await
        .unwrap()
        .expect("entry should be cached");
    assert!(ttl > 500 && ttl <= 600, "unexpected TTL {}", ttl);

    let second = app.engine.check(request).await.unwrap();
    assert!(second.is_allowed);
    assert_eq!(second.granted_by, vec!["cache"]);
}

// An explicit user-level deny wins over any role-derived grant.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn explicit_user_deny_beats_role_allow() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("user");

    let permission = app.create_permission(&resource, "DELETE", Some("ALL")).await;
    let user = app.create_user().await;

    // Role granting the permission
    let role = app
        .roles
        .create_role(
            &app.superadmin_ctx,
            authz_engine::dto::CreateRoleRequest {
                code: format!("admin_{}", &Uuid::new_v4().simple().to_string()[..8]),
                name: "Admin".to_string(),
                description: None,
                hierarchy_level: 1,
                is_system_role: false,
                permission_ids: vec![permission.id],
                parent_roles: Vec::new(),
            },
        )
        .await
        .unwrap();
    app.roles
        .assign_role(
            &app.superadmin_ctx,
            user,
            authz_engine::dto::AssignRoleRequest {
                role_id: role.id,
                valid_from: None,
                valid_until: None,
            },
        )
        .await
        .unwrap();

    // Explicit deny row in the direct layer
    let mut tx = app.repository.db().begin().await.unwrap();
    sqlx::query(
        "INSERT INTO user_permissions
         (id, user_profile_id, permission_id, is_granted, priority, is_temporary,
          revoke_reason, created_at, updated_at)
         VALUES ($1, $2, $3, false, 100, false, 'explicit deny', NOW(), NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(user)
    .bind(permission.id)
    .execute(&mut *tx)
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let result = app
        .engine
        .check(check(user, &resource, "DELETE", Some("ALL")))
        .await
        .unwrap();

    assert!(!result.is_allowed);
    assert_eq!(
        result.reason.as_deref(),
        Some("Explicitly denied by user permission")
    );
}

// Superadmins bypass resolution entirely.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn superadmin_always_allowed() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("anything");

    let result = app
        .engine
        .check(check(
            app.superadmin_ctx.profile_id,
            &resource,
            "DELETE",
            Some("ALL"),
        ))
        .await
        .unwrap();

    assert!(result.is_allowed);
    assert_eq!(result.granted_by, vec!["superadmin"]);
}

// A triple with no matching permission row is denied with the lookup
// reason, not an error.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn unknown_permission_denies() {
    let app = TestApp::spawn().await;
    let user = app.create_user().await;

    let result = app
        .engine
        .check(check(user, &unique_resource("ghost"), "READ", None))
        .await
        .unwrap();

    assert!(!result.is_allowed);
    assert_eq!(result.reason.as_deref(), Some("no matching permission"));
}

// Batch checks return one result per triple and reject oversized batches.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn batch_check_limits_and_results() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("report");

    let permission = app.create_permission(&resource, "READ", None).await;
    let user = app.create_user().await;
    app.grants
        .grant_user_permission(
            &app.superadmin_ctx,
            user,
            GrantUserPermissionRequest {
                permission_id: permission.id,
                conditions: None,
                valid_from: None,
                valid_until: None,
                priority: None,
                is_temporary: false,
                grant_reason: None,
            },
        )
        .await
        .unwrap();

    let response = app
        .engine
        .batch_check(BatchCheckRequest {
            user_id: user,
            checks: vec![
                CheckTriple {
                    resource: resource.clone(),
                    action: "READ".to_string(),
                    scope: None,
                },
                CheckTriple {
                    resource: unique_resource("other"),
                    action: "READ".to_string(),
                    scope: None,
                },
            ],
        })
        .await
        .unwrap();

    assert_eq!(response.total_checked, 2);
    assert_eq!(response.total_allowed, 1);

    // 101 triples exceed the limit
    let oversized: Vec<CheckTriple> = (0..101)
        .map(|i| CheckTriple {
            resource: format!("r{}", i),
            action: "READ".to_string(),
            scope: None,
        })
        .collect();

    let err = app
        .engine
        .batch_check(BatchCheckRequest {
            user_id: user,
            checks: oversized,
        })
        .await
        .unwrap_err();
    assert_eq!(
        err.code,
        authz_core::ErrorCode::PermissionBatchSizeExceeded
    );
}

// A revoke invalidates the cached allow before the call returns.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn revoke_invalidates_cached_allow() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("invoice");

    let permission = app.create_permission(&resource, "APPROVE", None).await;
    let user = app.create_user().await;

    app.grants
        .grant_user_permission(
            &app.superadmin_ctx,
            user,
            GrantUserPermissionRequest {
                permission_id: permission.id,
                conditions: None,
                valid_from: None,
                valid_until: None,
                priority: None,
                is_temporary: false,
                grant_reason: None,
            },
        )
        .await
        .unwrap();

    // Warm the cache with an allow
    let allowed = app
        .engine
        .check(check(user, &resource, "APPROVE", None))
        .await
        .unwrap();
    assert!(allowed.is_allowed);

    app.grants
        .revoke_user_permission(
            &app.superadmin_ctx,
            user,
            authz_engine::dto::RevokeUserPermissionRequest {
                permission_id: permission.id,
                revoke_reason: "test revoke".to_string(),
                force_revoke: false,
            },
        )
        .await
        .unwrap();

    // No stale "allowed" after the revoke
    let after = app
        .engine
        .check(check(user, &resource, "APPROVE", None))
        .await
        .unwrap();
    assert!(!after.is_allowed);
}
