//! Role -> policy -> permission expansion and cache invalidation.

mod common;

use common::TestApp;
use identity_service::models::{Permission, Policy, Role};
use identity_service::services::{CreateRoleRequest, ServiceError, TENANT_CREATE_PERMISSION};
use identity_service::store::{PermissionStore, TenantContext};
use uuid::Uuid;

struct Fixture {
    app: TestApp,
    ctx: TenantContext,
    role: Role,
    policy: Policy,
    permission_id: Uuid,
}

/// Role "Editor" -> policy "Documents" -> permission "documents:write".
async fn fixture() -> Fixture {
    let app = TestApp::new();
    let tenant = app.seed_standard_tenant("Acme").await;
    let ctx = TenantContext::new(tenant.tenant_id);

    let role = app
        .state
        .tenants
        .create_role(
            &ctx,
            CreateRoleRequest {
                role_name: "Editor".to_string(),
                description: Some("Edits documents".to_string()),
            },
        )
        .await
        .unwrap();
    let policy = app
        .state
        .tenants
        .create_policy(&ctx, "Documents")
        .await
        .unwrap();
    let permission = app
        .state
        .permissions
        .define_permission("documents:write", None)
        .await
        .unwrap();

    app.state
        .permissions
        .attach_policy(&ctx, role.role_id, policy.policy_id)
        .await
        .unwrap();
    app.state
        .permissions
        .grant_permission(&ctx, policy.policy_id, permission.permission_id)
        .await
        .unwrap();

    Fixture {
        app,
        ctx,
        role,
        policy,
        permission_id: permission.permission_id,
    }
}

fn roles(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn role_expands_through_policy_to_permission() {
    // Arrange
    let f = fixture().await;
    let user_id = Uuid::new_v4();

    // Act
    let effective = f
        .app
        .state
        .permissions
        .effective_permissions(&f.ctx, user_id, &roles(&["Editor"]))
        .await
        .unwrap();

    // Assert
    assert!(effective.contains("documents:write"));
    assert_eq!(effective.len(), 1);
    assert!(f
        .app
        .state
        .permissions
        .has_permission(&f.ctx, user_id, &roles(&["Editor"]), "documents:write")
        .await
        .unwrap());
    assert!(!f
        .app
        .state
        .permissions
        .has_permission(&f.ctx, user_id, &roles(&["Viewer"]), "documents:write")
        .await
        .unwrap());
}

#[tokio::test]
async fn direct_role_claim_satisfies_check() {
    // Arrange
    let app = TestApp::new();
    let ctx = TenantContext::new(Uuid::new_v4());

    // Act
    let allowed = app
        .state
        .permissions
        .has_permission(&ctx, Uuid::new_v4(), &roles(&["reports:read"]), "reports:read")
        .await
        .unwrap();

    // Assert
    assert!(allowed);
}

#[tokio::test]
async fn any_of_several_permissions_is_enough() {
    // Arrange
    let f = fixture().await;

    // Act
    let any = f
        .app
        .state
        .permissions
        .has_any_permission(
            &f.ctx,
            Uuid::new_v4(),
            &roles(&["Editor"]),
            &["billing:read", "documents:write"],
        )
        .await
        .unwrap();
    let none = f
        .app
        .state
        .permissions
        .has_any_permission(&f.ctx, Uuid::new_v4(), &roles(&["Editor"]), &["billing:read"])
        .await
        .unwrap();

    // Assert
    assert!(any);
    assert!(!none);
}

#[tokio::test]
async fn roles_of_another_tenant_grant_nothing() {
    // Arrange
    let f = fixture().await;
    let other = f.app.seed_standard_tenant("Globex").await;

    // Act
    let effective = f
        .app
        .state
        .permissions
        .effective_permissions(
            &TenantContext::new(other.tenant_id),
            Uuid::new_v4(),
            &roles(&["Editor"]),
        )
        .await
        .unwrap();

    // Assert
    assert!(effective.is_empty());
}

#[tokio::test]
async fn revoking_a_permission_invalidates_cached_sets() {
    // Arrange
    let f = fixture().await;
    let user_id = Uuid::new_v4();
    let resolver = &f.app.state.permissions;
    resolver
        .effective_permissions(&f.ctx, user_id, &roles(&["Editor"]))
        .await
        .unwrap();
    assert!(!f.app.cache.is_empty());

    // Act
    let changed = resolver
        .revoke_permission(&f.ctx, f.policy.policy_id, f.permission_id)
        .await
        .unwrap();
    let effective = resolver
        .effective_permissions(&f.ctx, user_id, &roles(&["Editor"]))
        .await
        .unwrap();

    // Assert
    assert!(changed);
    assert!(effective.is_empty());
}

#[tokio::test]
async fn detaching_a_policy_invalidates_cached_sets() {
    // Arrange
    let f = fixture().await;
    let user_id = Uuid::new_v4();
    let resolver = &f.app.state.permissions;
    resolver
        .effective_permissions(&f.ctx, user_id, &roles(&["Editor"]))
        .await
        .unwrap();

    // Act
    resolver
        .detach_policy(&f.ctx, f.role.role_id, f.policy.policy_id)
        .await
        .unwrap();
    let effective = resolver
        .effective_permissions(&f.ctx, user_id, &roles(&["Editor"]))
        .await
        .unwrap();

    // Assert
    assert!(effective.is_empty());
}

#[tokio::test]
async fn repeated_mapping_reports_no_change() {
    // Arrange
    let f = fixture().await;

    // Act
    let changed = f
        .app
        .state
        .permissions
        .attach_policy(&f.ctx, f.role.role_id, f.policy.policy_id)
        .await
        .unwrap();

    // Assert
    assert!(!changed);
}

#[tokio::test]
async fn mapping_across_tenants_is_not_found() {
    // Arrange
    let f = fixture().await;
    let other = f.app.seed_standard_tenant("Globex").await;
    let other_ctx = TenantContext::new(other.tenant_id);
    let foreign_policy = f
        .app
        .state
        .tenants
        .create_policy(&other_ctx, "Foreign")
        .await
        .unwrap();

    // Act
    let attach = f
        .app
        .state
        .permissions
        .attach_policy(&f.ctx, f.role.role_id, foreign_policy.policy_id)
        .await;
    let grant = f
        .app
        .state
        .permissions
        .grant_permission(&other_ctx, f.policy.policy_id, f.permission_id)
        .await;

    // Assert
    assert!(matches!(attach, Err(ServiceError::NotFound(_))));
    assert!(matches!(grant, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn unknown_permission_cannot_be_granted() {
    // Arrange
    let f = fixture().await;

    // Act
    let result = f
        .app
        .state
        .permissions
        .grant_permission(&f.ctx, f.policy.policy_id, Uuid::new_v4())
        .await;

    // Assert
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn unavailable_cache_falls_back_to_store() {
    // Arrange
    let f = fixture().await;
    f.app.cache.set_unavailable(true);

    // Act
    let effective = f
        .app
        .state
        .permissions
        .effective_permissions(&f.ctx, Uuid::new_v4(), &roles(&["Editor"]))
        .await
        .unwrap();

    // Assert
    assert!(effective.contains("documents:write"));
}

#[tokio::test]
async fn duplicate_permission_name_is_rejected() {
    // Arrange
    let f = fixture().await;

    // Act
    let duplicate = f
        .app
        .state
        .permissions
        .define_permission("documents:write", None)
        .await;
    let blank = f.app.state.permissions.define_permission("  ", None).await;

    // Assert
    assert!(matches!(duplicate, Err(ServiceError::Validation(_))));
    assert!(matches!(blank, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn platform_permission_cannot_be_defined_by_name() {
    // Arrange
    let app = TestApp::new();

    // Act
    let result = app
        .state
        .permissions
        .define_permission(TENANT_CREATE_PERMISSION, None)
        .await;

    // Assert
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn platform_permission_cannot_be_granted_to_a_tenant_policy() {
    // Arrange
    let f = fixture().await;
    let platform = Permission::new(TENANT_CREATE_PERMISSION.to_string(), None);
    f.app.store.insert_permission(&platform).await.unwrap();

    // Act
    let result = f
        .app
        .state
        .permissions
        .grant_permission(&f.ctx, f.policy.policy_id, platform.permission_id)
        .await;

    // Assert
    assert!(matches!(result, Err(ServiceError::Validation(_))));
    let effective = f
        .app
        .state
        .permissions
        .effective_permissions(&f.ctx, Uuid::new_v4(), &roles(&["Editor"]))
        .await
        .unwrap();
    assert!(!effective.contains(TENANT_CREATE_PERMISSION));
}

#[tokio::test]
async fn stored_platform_mapping_never_elevates_a_role() {
    // Arrange
    let f = fixture().await;
    let platform = Permission::new(TENANT_CREATE_PERMISSION.to_string(), None);
    f.app.store.insert_permission(&platform).await.unwrap();
    f.app
        .store
        .grant_permission(f.ctx.tenant_id(), f.policy.policy_id, platform.permission_id)
        .await
        .unwrap();
    let resolver = &f.app.state.permissions;

    // Act
    let effective = resolver
        .effective_permissions(&f.ctx, Uuid::new_v4(), &roles(&["Editor"]))
        .await
        .unwrap();
    let via_mapping = resolver.has_platform_permission(&roles(&["Editor"]), TENANT_CREATE_PERMISSION);
    let via_claim =
        resolver.has_platform_permission(&roles(&[TENANT_CREATE_PERMISSION]), TENANT_CREATE_PERMISSION);

    // Assert
    assert!(effective.contains("documents:write"));
    assert!(!effective.contains(TENANT_CREATE_PERMISSION));
    assert!(!via_mapping);
    assert!(via_claim);
}
