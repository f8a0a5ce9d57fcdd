use crate::common::TestApp;
use authz_core::RequestContext;
use authz_engine::dto::{
    CreateDelegationRequest, ExtendDelegationRequest, GrantUserPermissionRequest,
    RevokeDelegationRequest,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

fn unique_resource(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

// A delegator may only delegate permissions they presently hold; the
// failure names the missing code and nothing is written.
#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn delegation_only_of_held_permissions() {
    let app = TestApp::spawn().await;

    let held = app
        .create_permission(&unique_resource("a"), "READ", None)
        .await;
    let not_held = app
        .create_permission(&unique_resource("b"), "UPDATE", None)
        .await;

    let delegator = app.create_user().await;
    let delegate = app.create_user().await;

    app.grants
        .grant_user_permission(
            &app.superadmin_ctx,
            delegator,
            GrantUserPermissionRequest {
                permission_id: held.id,
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

    let delegator_ctx = RequestContext::new(delegator, delegator, false);

    let err = app
        .delegations
        .create_delegation(
            &delegator_ctx,
            CreateDelegationRequest {
                delegate_id: delegate,
                permissions: vec![held.code.clone(), not_held.code.clone()],
                reason: None,
                valid_from: None,
                valid_until: Utc::now() + Duration::hours(24),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, authz_core::ErrorCode::DelegationNotHeld);
    assert!(err.message.contains(&not_held.code));

    // Nothing was written
    let delegations = app
        .delegations
        .list_for_delegator(delegator, 100, 0)
        .await
        .unwrap();
    assert!(delegations.is_empty());
}

#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn delegation_lifecycle() {
    let app = TestApp::spawn().await;

    let permission = app
        .create_permission(&unique_resource("doc"), "READ", None)
        .await;
    let delegator = app.create_user().await;
    let delegate = app.create_user().await;
    let delegator_ctx = RequestContext::new(delegator, delegator, false);

    app.grants
        .grant_user_permission(
            &app.superadmin_ctx,
            delegator,
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

    let delegation = app
        .delegations
        .create_delegation(
            &delegator_ctx,
            CreateDelegationRequest {
                delegate_id: delegate,
                permissions: vec![permission.code.clone()],
                reason: Some("vacation cover".to_string()),
                valid_from: None,
                valid_until: Utc::now() + Duration::hours(24),
            },
        )
        .await
        .unwrap();

    // The delegate now resolves the delegated permission
    let result = app
        .engine
        .check(authz_engine::dto::CheckRequest {
            user_id: delegate,
            resource: permission.resource.clone(),
            action: "READ".to_string(),
            scope: None,
            resource_id: None,
            context: None,
        })
        .await
        .unwrap();
    assert!(result.is_allowed);
    assert!(result.granted_by.contains(&"delegation".to_string()));

    // Only the delegator may extend, strictly forward
    let err = app
        .delegations
        .extend_delegation(
            &RequestContext::new(delegate, delegate, false),
            delegation.id,
            ExtendDelegationRequest {
                valid_until: Utc::now() + Duration::hours(48),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, authz_core::ErrorCode::DelegationNotDelegator);

    let backwards = app
        .delegations
        .extend_delegation(
            &delegator_ctx,
            delegation.id,
            ExtendDelegationRequest {
                valid_until: delegation.valid_until - Duration::hours(1),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(backwards.code, authz_core::ErrorCode::DelegationInvalidWindow);

    app.delegations
        .extend_delegation(
            &delegator_ctx,
            delegation.id,
            ExtendDelegationRequest {
                valid_until: delegation.valid_until + Duration::hours(24),
            },
        )
        .await
        .unwrap();

    // Revoke, then a second revoke conflicts
    app.delegations
        .revoke_delegation(
            &delegator_ctx,
            delegation.id,
            RevokeDelegationRequest {
                reason: "back early".to_string(),
            },
        )
        .await
        .unwrap();

    let again = app
        .delegations
        .revoke_delegation(
            &delegator_ctx,
            delegation.id,
            RevokeDelegationRequest {
                reason: "again".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(again.code, authz_core::ErrorCode::DelegationAlreadyRevoked);

    // The delegated permission no longer resolves
    let after = app
        .engine
        .check(authz_engine::dto::CheckRequest {
            user_id: delegate,
            resource: permission.resource.clone(),
            action: "READ".to_string(),
            scope: None,
            resource_id: None,
            context: None,
        })
        .await
        .unwrap();
    assert!(!after.is_allowed);
}

#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis"]
async fn delegation_rejects_inverted_window() {
    let app = TestApp::spawn().await;
    let delegator = app.create_user().await;
    let delegate = app.create_user().await;
    let delegator_ctx = RequestContext::new(delegator, delegator, false);

    let err = app
        .delegations
        .create_delegation(
            &delegator_ctx,
            CreateDelegationRequest {
                delegate_id: delegate,
                permissions: vec!["whatever.read".to_string()],
                reason: None,
                valid_from: Some(Utc::now() + Duration::hours(48)),
                valid_until: Utc::now() + Duration::hours(24),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, authz_core::ErrorCode::DelegationInvalidWindow);
}
