use crate::common::TestApp;
use authz_engine::dto::{BulkGrantRequest, GrantUserPermissionRequest};
use uuid::Uuid;

fn unique_resource(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

// Bulk grant continues past per-target failures and persists every success
// atomically, reporting the failures per (target, permission).
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn bulk_grant_partial_failure() {
    let app = TestApp::spawn().await;

    let p1 = app
        .create_permission(&unique_resource("p1"), "READ", None)
        .await;
    let p2 = app
        .create_permission(&unique_resource("p2"), "READ", None)
        .await;

    let u1 = app.create_user().await;
    let u2 = app.create_user().await;
    let missing_user = Uuid::new_v4();

    let result = app
        .bulk
        .bulk_grant(
            &app.superadmin_ctx,
            BulkGrantRequest {
                user_ids: vec![u1, u2, missing_user],
                permission_codes: vec![p1.code.clone(), p2.code.clone()],
                valid_until: None,
                is_temporary: false,
                grant_reason: Some("onboarding".to_string()),
            },
        )
        .await
        .unwrap();

    // 2 valid users x 2 codes succeed, the missing user fails both
    assert_eq!(result.processed, 4);
    assert_eq!(result.failed, 2);
    assert_eq!(result.summary.created, 4);
    assert_eq!(result.summary.skipped, 0);
    assert!(result.errors.iter().all(|e| e.target_id == missing_user));

    // All successes are persisted
    for user in [u1, u2] {
        let codes = app.grants.get_effective_codes(user).await.unwrap();
        assert!(codes.contains(&p1.code));
        assert!(codes.contains(&p2.code));
    }
}

// Granting twice conflicts; a revoked row is reactivated in place.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn grant_conflict_and_reactivation() {
    let app = TestApp::spawn().await;
    let permission = app
        .create_permission(&unique_resource("file"), "UPDATE", None)
        .await;
    let user = app.create_user().await;

    let grant_request = || GrantUserPermissionRequest {
        permission_id: permission.id,
        conditions: None,
        valid_from: None,
        valid_until: None,
        priority: None,
        is_temporary: false,
        grant_reason: None,
    };

    let first = app
        .grants
        .grant_user_permission(&app.superadmin_ctx, user, grant_request())
        .await
        .unwrap();

    let conflict = app
        .grants
        .grant_user_permission(&app.superadmin_ctx, user, grant_request())
        .await
        .unwrap_err();
    assert_eq!(conflict.code, authz_core::ErrorCode::PermissionAlreadyGranted);

    app.grants
        .revoke_user_permission(
            &app.superadmin_ctx,
            user,
            authz_engine::dto::RevokeUserPermissionRequest {
                permission_id: permission.id,
                revoke_reason: "cleanup".to_string(),
                force_revoke: false,
            },
        )
        .await
        .unwrap();

    // Re-grant reactivates the same row
    let regranted = app
        .grants
        .grant_user_permission(&app.superadmin_ctx, user, grant_request())
        .await
        .unwrap();
    assert_eq!(regranted.id, first.id);
    assert!(regranted.is_granted);
    assert!(regranted.revoke_reason.is_none());
}

// System permissions admit no update or delete.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn system_permission_is_immutable() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("system");

    let permission = app
        .permissions
        .create_permission(
            &app.superadmin_ctx,
            authz_engine::dto::CreatePermissionRequest {
                code: format!("system.core.{}", &Uuid::new_v4().simple().to_string()[..8]),
                name: "Core system permission".to_string(),
                description: None,
                resource,
                action: "READ".to_string(),
                scope: None,
                group_name: None,
                is_system_permission: true,
                dependencies: Vec::new(),
            },
        )
        .await
        .unwrap();

    let update = app
        .permissions
        .update_permission(
            &app.superadmin_ctx,
            permission.id,
            authz_engine::dto::UpdatePermissionRequest {
                name: Some("Renamed".to_string()),
                description: None,
                group_name: None,
                is_active: None,
                dependencies: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(update.code, authz_core::ErrorCode::SystemPermissionImmutable);

    let delete = app
        .permissions
        .delete_permission(&app.superadmin_ctx, permission.id)
        .await
        .unwrap_err();
    assert_eq!(
        delete.code,
        authz_core::ErrorCode::SystemPermissionDeleteForbidden
    );
}

// Duplicate codes and duplicate (resource, action, scope) triples conflict.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn permission_uniqueness() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("ledger");

    let first = app.create_permission(&resource, "READ", Some("OWN")).await;

    let duplicate_code = app
        .permissions
        .create_permission(
            &app.superadmin_ctx,
            authz_engine::dto::CreatePermissionRequest {
                code: first.code.clone(),
                name: "Duplicate".to_string(),
                description: None,
                resource: unique_resource("other"),
                action: "READ".to_string(),
                scope: None,
                group_name: None,
                is_system_permission: false,
                dependencies: Vec::new(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        duplicate_code.code,
        authz_core::ErrorCode::PermissionAlreadyExists
    );

    let duplicate_triple = app
        .permissions
        .create_permission(
            &app.superadmin_ctx,
            authz_engine::dto::CreatePermissionRequest {
                code: format!("fresh.{}", &Uuid::new_v4().simple().to_string()[..8]),
                name: "Same triple".to_string(),
                description: None,
                resource: resource.clone(),
                action: "READ".to_string(),
                scope: Some("OWN".to_string()),
                group_name: None,
                is_system_permission: false,
                dependencies: Vec::new(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        duplicate_triple.code,
        authz_core::ErrorCode::PermissionCombinationExists
    );
}

// Role hierarchy cycle is rejected at write time.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn role_hierarchy_cycle_rejected() {
    let app = TestApp::spawn().await;

    let make_role = |code: String| authz_engine::dto::CreateRoleRequest {
        code,
        name: "Test role".to_string(),
        description: None,
        hierarchy_level: 5,
        is_system_role: false,
        permission_ids: Vec::new(),
        parent_roles: Vec::new(),
    };

    let suffix = Uuid::new_v4().simple().to_string();
    let a = app
        .roles
        .create_role(&app.superadmin_ctx, make_role(format!("a_{}", &suffix[..8])))
        .await
        .unwrap();
    let b = app
        .roles
        .create_role(&app.superadmin_ctx, make_role(format!("b_{}", &suffix[..8])))
        .await
        .unwrap();

    app.roles
        .add_parent_role(&app.superadmin_ctx, a.id, b.id, true)
        .await
        .unwrap();

    // Closing the loop b -> a must fail
    let err = app
        .roles
        .add_parent_role(&app.superadmin_ctx, b.id, a.id, true)
        .await
        .unwrap_err();
    assert_eq!(err.code, authz_core::ErrorCode::RoleHierarchyCycle);
}
