//! Enterprise tenant provisioning against the identity provider.

mod common;

use common::TestApp;
use identity_service::models::InvitationMode;
use identity_service::services::{BrokerCall, BrokerOp, CreateEnterpriseTenantRequest, ServiceError};

fn request(name: &str, realm: &str) -> CreateEnterpriseTenantRequest {
    CreateEnterpriseTenantRequest {
        tenant_name: name.to_string(),
        realm: realm.to_string(),
        invitation_mode: InvitationMode::Sso,
        custom_domain: Some("Login.Acme.com".to_string()),
    }
}

#[tokio::test]
async fn creates_realm_then_tenant() {
    // Arrange
    let app = TestApp::new();

    // Act
    let tenant = app
        .state
        .tenants
        .create_enterprise_tenant(request("Acme Corp", " Acme "))
        .await
        .unwrap();

    // Assert
    assert!(tenant.is_enterprise());
    assert_eq!(tenant.realm.as_deref(), Some("acme"));
    assert_eq!(tenant.custom_domain.as_deref(), Some("login.acme.com"));
    assert!(app.broker.has_realm("acme"));
    assert!(app.broker.calls().contains(&BrokerCall::CreateRealm {
        realm: "acme".to_string(),
    }));
    assert_eq!(app.store.tenants().await.len(), 1);
}

#[tokio::test]
async fn realm_already_bound_is_rejected() {
    // Arrange
    let app = TestApp::new();
    app.seed_enterprise_tenant("acme", &[]).await;

    // Act
    let result = app
        .state
        .tenants
        .create_enterprise_tenant(request("Acme Again", "acme"))
        .await;

    // Assert
    assert!(matches!(result, Err(ServiceError::Validation(_))));
    assert_eq!(app.store.tenants().await.len(), 1);
}

#[tokio::test]
async fn invalid_realm_name_is_rejected() {
    // Arrange
    let app = TestApp::new();

    // Act
    let result = app
        .state
        .tenants
        .create_enterprise_tenant(request("Acme", "acme corp!"))
        .await;

    // Assert
    assert!(matches!(result, Err(ServiceError::Validation(_))));
    assert!(app.broker.calls().is_empty());
}

#[tokio::test]
async fn provider_failure_leaves_no_tenant() {
    // Arrange
    let app = TestApp::new();
    app.broker.fail_on(BrokerOp::CreateRealm);

    // Act
    let result = app
        .state
        .tenants
        .create_enterprise_tenant(request("Acme", "acme"))
        .await;

    // Assert
    assert!(matches!(result, Err(ServiceError::Broker(_))));
    assert!(app.store.tenants().await.is_empty());
}

#[tokio::test]
async fn created_realm_accepts_first_administrator() {
    // Arrange
    let app = TestApp::new();
    let tenant = app
        .state
        .tenants
        .create_enterprise_tenant(request("Acme", "acme"))
        .await
        .unwrap();
    let alice = common::claims("kc-alice", "alice@acme.com", Some("Alice"));

    // Act
    let result = app
        .login(
            &alice,
            &common::state(identity_service::models::AuthFlow::EnterpriseFirstAdmin, "acme"),
        )
        .await;

    // Assert
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.tenant_id, Some(tenant.tenant_id));
}
