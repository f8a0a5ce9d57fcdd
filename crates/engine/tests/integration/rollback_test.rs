use crate::common::TestApp;
use authz_engine::dto::{CheckRequest, GrantUserPermissionRequest};
use uuid::Uuid;

fn unique_resource(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

// Rolling back a grant restores the pre-grant decision, writes a linked
// rollback entry, and the rollback itself is not rollbackable.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn rollback_of_user_grant() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("x");

    let permission = app.create_permission(&resource, "READ", None).await;
    let user = app.create_user().await;

    let check_request = || CheckRequest {
        user_id: user,
        resource: resource.clone(),
        action: "READ".to_string(),
        scope: None,
        resource_id: None,
        context: None,
    };

    // Pre-grant decision: denied
    let before = app.engine.check(check_request()).await.unwrap();
    assert!(!before.is_allowed);

    let granted = app
        .grants
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
                grant_reason: Some("temporary access".to_string()),
            },
        )
        .await
        .unwrap();

    let during = app.engine.check(check_request()).await.unwrap();
    assert!(during.is_allowed);

    // Find the grant's history entry
    let entries = app
        .history
        .list_for_entity("user_permission", granted.id, 10)
        .await
        .unwrap();
    let grant_entry = entries
        .iter()
        .find(|e| e.operation == "grant")
        .expect("grant history entry");

    let rollback_entry = app
        .history
        .rollback(&app.superadmin_ctx, grant_entry.id)
        .await
        .unwrap();

    assert_eq!(rollback_entry.operation, "rollback_grant");
    assert_eq!(rollback_entry.rollback_of, Some(grant_entry.id));
    assert!(!rollback_entry.is_rollbackable);

    // The original entry is marked rolled back
    let original = app.history.get_entry(grant_entry.id).await.unwrap();
    assert!(original.rolled_back_at.is_some());

    // The decision observable to check is back to pre-grant
    let after = app.engine.check(check_request()).await.unwrap();
    assert!(!after.is_allowed);

    // Rolling back the rollback is refused
    let err = app
        .history
        .rollback(&app.superadmin_ctx, rollback_entry.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, authz_core::ErrorCode::RollbackNotPossible);

    // As is rolling back the same entry twice
    let twice = app
        .history
        .rollback(&app.superadmin_ctx, grant_entry.id)
        .await
        .unwrap_err();
    assert_eq!(twice.code, authz_core::ErrorCode::RollbackNotPossible);
}

// Rolling back a revoke recreates the grant from previous_state.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn rollback_of_revoke_restores_grant() {
    let app = TestApp::spawn().await;
    let resource = unique_resource("y");

    let permission = app.create_permission(&resource, "READ", None).await;
    let user = app.create_user().await;

    let granted = app
        .grants
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

    app.grants
        .revoke_user_permission(
            &app.superadmin_ctx,
            user,
            authz_engine::dto::RevokeUserPermissionRequest {
                permission_id: permission.id,
                revoke_reason: "mistake".to_string(),
                force_revoke: false,
            },
        )
        .await
        .unwrap();

    let entries = app
        .history
        .list_for_entity("user_permission", granted.id, 10)
        .await
        .unwrap();
    let revoke_entry = entries
        .iter()
        .find(|e| e.operation == "revoke")
        .expect("revoke history entry");

    app.history
        .rollback(&app.superadmin_ctx, revoke_entry.id)
        .await
        .unwrap();

    // The grant is effective again
    let result = app
        .engine
        .check(CheckRequest {
            user_id: user,
            resource: resource.clone(),
            action: "READ".to_string(),
            scope: None,
            resource_id: None,
            context: None,
        })
        .await
        .unwrap();
    assert!(result.is_allowed);
}
