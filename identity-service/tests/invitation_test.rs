//! Invitation lifecycle: creation, single-use acceptance, email matching.

mod common;

use chrono::{Duration, Utc};
use common::{claims, state, TestApp, TEST_REALM};
use identity_service::models::{AuthFlow, CallbackState, InvitationMode, Tenant, TenantInvitation};
use identity_service::services::{BrokerCall, BrokerOp, CreateInvitationRequest, ServiceError};
use identity_service::store::{TenantContext, TenantScopedStore};
use identity_service::utils::hash_token;

fn invitation_state(token: &str) -> CallbackState {
    CallbackState {
        invitation_token: Some(token.to_string()),
        ..state(AuthFlow::Invitation, TEST_REALM)
    }
}

#[tokio::test]
async fn invitation_is_accepted_once() {
    // Arrange
    let app = TestApp::new();
    let tenant = app.seed_standard_tenant("Acme").await;
    let creator = app.seed_user("kc-owner", "owner@x.com").await;
    let invitation = app
        .seed_invitation(tenant.tenant_id, "carol@x.com", "abc123", true, creator)
        .await;
    let carol = claims("kc-carol", "Carol@X.com", Some("Carol"));

    // Act
    let first = app.login(&carol, &invitation_state("abc123")).await;
    let second = app.login(&carol, &invitation_state("abc123")).await;

    // Assert
    assert!(first.success, "{:?}", first.error_message);
    assert_eq!(first.flow, "invitation");
    assert_eq!(first.tenant_id, Some(tenant.tenant_id));
    assert_eq!(first.is_new_organization, Some(false));

    let memberships = app.store.memberships().await;
    let carol_membership = memberships
        .iter()
        .find(|m| m.tenant_id == tenant.tenant_id)
        .unwrap();
    assert!(carol_membership.is_admin);
    assert_eq!(carol_membership.external_user_id.as_deref(), Some("kc-carol"));

    let stored = app.store.invitation(invitation.invitation_id).await.unwrap();
    assert!(stored.is_accepted());
    assert_eq!(stored.accepted_by_user_id, Some(carol_membership.user_id));
    assert!(stored.accepted_utc.is_some());

    assert!(!second.success);
    assert_eq!(second.error_code.as_deref(), Some("expired_or_revoked"));
    assert_eq!(app.memberships_of(tenant.tenant_id).await, 1);
}

#[tokio::test]
async fn mismatched_email_rolls_back_everything() {
    // Arrange
    let app = TestApp::new();
    let tenant = app.seed_standard_tenant("Acme").await;
    let creator = app.seed_user("kc-owner", "owner@x.com").await;
    let invitation = app
        .seed_invitation(tenant.tenant_id, "carol@x.com", "abc123", false, creator)
        .await;
    let eve = claims("kc-eve", "eve@x.com", Some("Eve"));

    // Act
    let result = app.login(&eve, &invitation_state("abc123")).await;

    // Assert
    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("email_mismatch"));
    assert_eq!(app.memberships_of(tenant.tenant_id).await, 0);
    assert_eq!(app.store.users().await.len(), 1);
    let stored = app.store.invitation(invitation.invitation_id).await.unwrap();
    assert!(stored.is_pending());
}

#[tokio::test]
async fn unverified_email_cannot_accept() {
    // Arrange
    let app = TestApp::new();
    let tenant = app.seed_standard_tenant("Acme").await;
    let creator = app.seed_user("kc-owner", "owner@x.com").await;
    app.seed_invitation(tenant.tenant_id, "carol@x.com", "abc123", false, creator)
        .await;
    let mut carol = claims("kc-carol", "carol@x.com", Some("Carol"));
    carol.email_verified = false;

    // Act
    let result = app.login(&carol, &invitation_state("abc123")).await;

    // Assert
    assert_eq!(result.error_code.as_deref(), Some("email_mismatch"));
    assert_eq!(app.memberships_of(tenant.tenant_id).await, 0);
}

#[tokio::test]
async fn unknown_and_expired_tokens_are_distinct() {
    // Arrange
    let app = TestApp::new();
    let tenant = app.seed_standard_tenant("Acme").await;
    let creator = app.seed_user("kc-owner", "owner@x.com").await;
    let invitations: TenantScopedStore<TenantInvitation> =
        TenantScopedStore::new(app.store.clone());
    invitations
        .create(
            &TenantContext::new(tenant.tenant_id),
            TenantInvitation::new(
                tenant.tenant_id,
                "carol@x.com".to_string(),
                hash_token("stale"),
                false,
                Utc::now() - Duration::hours(1),
                creator,
            ),
        )
        .await
        .unwrap();
    let carol = claims("kc-carol", "carol@x.com", Some("Carol"));

    // Act
    let unknown = app.login(&carol, &invitation_state("nope")).await;
    let expired = app.login(&carol, &invitation_state("stale")).await;

    // Assert
    assert_eq!(unknown.error_code.as_deref(), Some("not_found"));
    assert_eq!(expired.error_code.as_deref(), Some("expired_or_revoked"));
    assert_eq!(app.memberships_of(tenant.tenant_id).await, 0);
}

#[tokio::test]
async fn created_invitation_stores_only_the_token_hash() {
    // Arrange
    let app = TestApp::new();
    let tenant = app.seed_standard_tenant("Acme").await;
    let creator = app.seed_user("kc-owner", "owner@x.com").await;
    let ctx = TenantContext::new(tenant.tenant_id);

    // Act
    let created = app
        .state
        .invitations
        .create(
            &ctx,
            CreateInvitationRequest {
                email: " New.Hire@Acme.com ".to_string(),
                is_admin: false,
            },
            creator,
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(created.invitation.email, "new.hire@acme.com");
    assert_ne!(created.invitation.token_hash, created.token);
    assert_eq!(created.invitation.token_hash, hash_token(&created.token));
    assert_eq!(
        app.state.invitations.lookup(&created.token).await.unwrap().invitation_id,
        created.invitation.invitation_id
    );
    assert!(app.broker.calls().is_empty());
}

#[tokio::test]
async fn creator_must_exist() {
    // Arrange
    let app = TestApp::new();
    let tenant = app.seed_standard_tenant("Acme").await;

    // Act
    let result = app
        .state
        .invitations
        .create(
            &TenantContext::new(tenant.tenant_id),
            CreateInvitationRequest {
                email: "someone@acme.com".to_string(),
                is_admin: false,
            },
            uuid::Uuid::new_v4(),
        )
        .await;

    // Assert
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn local_account_enterprise_invitation_provisions_provider_account() {
    // Arrange
    let app = TestApp::new();
    let tenant = Tenant::new_enterprise(
        "Acme".to_string(),
        "acme".to_string(),
        InvitationMode::LocalAccount,
    );
    app.store.insert_tenant(tenant.clone()).await;
    let creator = app.seed_user("kc-owner", "owner@acme.com").await;

    // Act
    app.state
        .invitations
        .create(
            &TenantContext::new(tenant.tenant_id),
            CreateInvitationRequest {
                email: "dave@acme.com".to_string(),
                is_admin: false,
            },
            creator,
        )
        .await
        .unwrap();

    // Assert
    let calls = app.broker.calls();
    assert!(calls.contains(&BrokerCall::CreateUser {
        realm: "acme".to_string(),
        email: "dave@acme.com".to_string(),
    }));
    assert!(calls
        .iter()
        .any(|c| matches!(c, BrokerCall::SendNotification { realm, .. } if realm == "acme")));
}

#[tokio::test]
async fn notification_failure_does_not_block_invitation() {
    // Arrange
    let app = TestApp::new();
    let tenant = Tenant::new_enterprise(
        "Acme".to_string(),
        "acme".to_string(),
        InvitationMode::LocalAccount,
    );
    app.store.insert_tenant(tenant.clone()).await;
    let creator = app.seed_user("kc-owner", "owner@acme.com").await;
    app.broker.fail_on(BrokerOp::SendNotification);

    // Act
    let result = app
        .state
        .invitations
        .create(
            &TenantContext::new(tenant.tenant_id),
            CreateInvitationRequest {
                email: "dave@acme.com".to_string(),
                is_admin: false,
            },
            creator,
        )
        .await;

    // Assert
    assert!(result.is_ok());
}

#[tokio::test]
async fn sso_enterprise_invitation_skips_provider_account() {
    // Arrange
    let app = TestApp::new();
    let tenant = app.seed_enterprise_tenant("acme", &[]).await;
    let creator = app.seed_user("kc-owner", "owner@acme.com").await;

    // Act
    app.state
        .invitations
        .create(
            &TenantContext::new(tenant.tenant_id),
            CreateInvitationRequest {
                email: "dave@acme.com".to_string(),
                is_admin: false,
            },
            creator,
        )
        .await
        .unwrap();

    // Assert
    assert!(app.broker.calls().is_empty());
}

#[tokio::test]
async fn pending_invitations_are_found_by_email_across_tenants() {
    // Arrange
    let app = TestApp::new();
    let acme = app.seed_standard_tenant("Acme").await;
    let globex = app.seed_standard_tenant("Globex").await;
    let creator = app.seed_user("kc-owner", "owner@x.com").await;
    app.seed_invitation(acme.tenant_id, "carol@x.com", "t1", false, creator)
        .await;
    app.seed_invitation(globex.tenant_id, "carol@x.com", "t2", false, creator)
        .await;
    app.seed_invitation(globex.tenant_id, "dave@x.com", "t3", false, creator)
        .await;

    // Act
    let pending = app
        .state
        .invitations
        .find_pending_for_email("CAROL@x.com")
        .await
        .unwrap();

    // Assert
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|i| i.email == "carol@x.com"));
}
