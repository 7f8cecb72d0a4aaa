//! Router-level tests: status codes, session authentication and admin checks.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{claims, state, TestApp, TEST_REALM};
use identity_service::models::{AuthFlow, CallbackState, Permission};
use identity_service::services::{
    CreateJoinLinkRequest, CreateRoleRequest, IdentityClaims, TENANT_CREATE_PERMISSION,
};
use identity_service::store::{PermissionStore, TenantContext};
use tower::util::ServiceExt;

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.router().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Signs Bob in; he administers his new organization.
async fn admin_session(app: &TestApp) -> String {
    let result = app
        .login(
            &claims("kc-bob", "bob@example.com", Some("Bob")),
            &state(AuthFlow::Default, TEST_REALM),
        )
        .await;
    result.token.expect("session token")
}

#[tokio::test]
async fn health_reports_healthy() {
    // Arrange
    let app = TestApp::new();

    // Act
    let (status, body) = send(&app, get("/health", None)).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "identity-service");
}

#[tokio::test]
async fn health_fails_when_cache_is_down() {
    // Arrange
    let app = TestApp::new();
    app.cache.set_unavailable(true);

    // Act
    let (status, _) = send(&app, get("/health", None)).await;

    // Assert
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_endpoint_responds() {
    // Arrange
    let app = TestApp::new();

    // Act
    let response = app.router().oneshot(get("/metrics", None)).await.unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn callback_returns_session_for_known_code() {
    // Arrange
    let app = TestApp::new();
    app.broker
        .register_login("good-code", &claims("kc-bob", "bob@example.com", Some("Bob")));
    let encoded = state(AuthFlow::Default, TEST_REALM).encode();

    // Act
    let (status, body) = send(
        &app,
        get(
            &format!("/auth/callback?code=good-code&state={}", encoded),
            None,
        ),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["flow"], "default");
    assert_eq!(body["tenantName"], "Bob's Organization");
    assert!(body["token"].is_string());
}

#[tokio::test]
async fn callback_with_unknown_code_is_unauthorized() {
    // Arrange
    let app = TestApp::new();

    // Act
    let (status, body) = send(&app, get("/auth/callback?code=bogus", None)).await;

    // Assert
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["errorCode"], "authentication_error");
}

#[tokio::test]
async fn callback_without_code_is_bad_request() {
    // Arrange
    let app = TestApp::new();

    // Act
    let (status, body) = send(&app, get("/auth/callback", None)).await;

    // Assert
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], "validation_error");
}

#[tokio::test]
async fn select_tenant_requires_selection_token() {
    // Arrange
    let app = TestApp::new();
    let session = admin_session(&app).await;
    let body = serde_json::json!({ "tenantId": uuid::Uuid::new_v4() });

    // Act
    let (missing, _) = send(&app, post_json("/auth/select-tenant", None, body.clone())).await;
    let (session_instead, _) =
        send(&app, post_json("/auth/select-tenant", Some(&session), body)).await;

    // Assert
    assert_eq!(missing, StatusCode::UNAUTHORIZED);
    assert_eq!(session_instead, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_routes_reject_missing_or_bad_tokens() {
    // Arrange
    let app = TestApp::new();

    // Act
    let (missing, _) = send(&app, get("/permissions/me", None)).await;
    let (garbage, _) = send(&app, get("/permissions/me", Some("not-a-jwt"))).await;

    // Assert
    assert_eq!(missing, StatusCode::UNAUTHORIZED);
    assert_eq!(garbage, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn my_permissions_reflect_the_session_tenant() {
    // Arrange
    let app = TestApp::new();
    let session = admin_session(&app).await;
    let claims = app.state.issuer.validate(&session).unwrap();

    // Act
    let (status, body) = send(&app, get("/permissions/me", Some(&session))).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenantId"], claims.tenant_id.to_string());
    assert!(body["permissions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_creates_invitation_and_token_resolves_publicly() {
    // Arrange
    let app = TestApp::new();
    let session = admin_session(&app).await;

    // Act
    let (status, created) = send(
        &app,
        post_json(
            "/tenants/current/invitations",
            Some(&session),
            serde_json::json!({ "email": "carol@example.com", "isAdmin": false }),
        ),
    )
    .await;
    let token = created["token"].as_str().unwrap().to_string();
    let (lookup_status, lookup) = send(&app, get(&format!("/invitations/{}", token), None)).await;

    // Assert
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["invitation"]["email"], "carol@example.com");
    assert!(created["invitation"].get("tokenHash").is_none());
    assert_eq!(lookup_status, StatusCode::OK);
    assert_eq!(lookup["invitationId"], created["invitation"]["invitationId"]);
}

#[tokio::test]
async fn invalid_invitation_email_is_rejected() {
    // Arrange
    let app = TestApp::new();
    let session = admin_session(&app).await;

    // Act
    let (status, _) = send(
        &app,
        post_json(
            "/tenants/current/invitations",
            Some(&session),
            serde_json::json!({ "email": "not-an-email" }),
        ),
    )
    .await;

    // Assert
    assert!(status.is_client_error());
}

#[tokio::test]
async fn members_cannot_administer_the_tenant() {
    // Arrange
    let app = TestApp::new();
    let admin = admin_session(&app).await;
    let admin_claims = app.state.issuer.validate(&admin).unwrap();
    let link = app
        .state
        .join_links
        .create(
            &TenantContext::new(admin_claims.tenant_id),
            admin_claims.user_id().unwrap(),
            CreateJoinLinkRequest::default(),
        )
        .await
        .unwrap();
    let joined = app
        .login(
            &claims("kc-ann", "ann@example.com", Some("Ann")),
            &CallbackState {
                join_token: Some(link.token.clone()),
                ..state(AuthFlow::JoinLink, TEST_REALM)
            },
        )
        .await;
    let member = joined.token.expect("member session");

    // Act
    let (status, _) = send(
        &app,
        post_json(
            "/tenants/current/invitations",
            Some(&member),
            serde_json::json!({ "email": "carol@example.com" }),
        ),
    )
    .await;
    let (links_status, _) = send(&app, get("/tenants/current/join-links", Some(&member))).await;

    // Assert
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(links_status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_public_tokens_are_not_found() {
    // Arrange
    let app = TestApp::new();

    // Act
    let (invitation, _) = send(&app, get("/invitations/nope", None)).await;
    let (join_link, _) = send(&app, get("/join-links/nope", None)).await;

    // Assert
    assert_eq!(invitation, StatusCode::NOT_FOUND);
    assert_eq!(join_link, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn enterprise_creation_requires_platform_permission() {
    // Arrange
    let app = TestApp::new();
    let session = admin_session(&app).await;

    // Act
    let (status, _) = send(
        &app,
        post_json(
            "/tenants/enterprise",
            Some(&session),
            serde_json::json!({
                "tenantName": "Acme",
                "realm": "acme",
                "invitationMode": "sso"
            }),
        ),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!app.broker.has_realm("acme"));
}

fn enterprise_request() -> serde_json::Value {
    serde_json::json!({
        "tenantName": "Acme",
        "realm": "acme",
        "invitationMode": "sso"
    })
}

async fn session_with_roles(app: &TestApp, sub: &str, roles: &[&str]) -> String {
    let identity = IdentityClaims {
        roles: roles.iter().map(|r| r.to_string()).collect(),
        ..claims(sub, &format!("{}@example.com", sub), None)
    };
    let result = app
        .login(&identity, &state(AuthFlow::Default, TEST_REALM))
        .await;
    result.token.expect("session token")
}

#[tokio::test]
async fn tenant_mapping_cannot_unlock_enterprise_creation() {
    // Arrange
    let app = TestApp::new();
    let session = session_with_roles(&app, "kc-eve", &["Editor"]).await;
    let claims = app.state.issuer.validate(&session).unwrap();
    let ctx = TenantContext::new(claims.tenant_id);
    let role = app
        .state
        .tenants
        .create_role(
            &ctx,
            CreateRoleRequest {
                role_name: "Editor".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    let policy = app.state.tenants.create_policy(&ctx, "Escalate").await.unwrap();
    let platform = Permission::new(TENANT_CREATE_PERMISSION.to_string(), None);
    app.store.insert_permission(&platform).await.unwrap();
    app.state
        .permissions
        .attach_policy(&ctx, role.role_id, policy.policy_id)
        .await
        .unwrap();

    // Act
    let grant = Request::builder()
        .method("PUT")
        .uri(format!(
            "/tenants/current/policies/{}/permissions/{}",
            policy.policy_id, platform.permission_id
        ))
        .header("Authorization", format!("Bearer {}", session))
        .body(Body::empty())
        .unwrap();
    let (grant_status, _) = send(&app, grant).await;
    let (create_status, _) = send(
        &app,
        post_json("/tenants/enterprise", Some(&session), enterprise_request()),
    )
    .await;

    // Assert
    assert_eq!(grant_status, StatusCode::BAD_REQUEST);
    assert_eq!(create_status, StatusCode::FORBIDDEN);
    assert!(!app.broker.has_realm("acme"));
}

#[tokio::test]
async fn direct_platform_claim_allows_enterprise_creation() {
    // Arrange
    let app = TestApp::new();
    let session = session_with_roles(&app, "kc-ops", &[TENANT_CREATE_PERMISSION]).await;

    // Act
    let (status, body) = send(
        &app,
        post_json("/tenants/enterprise", Some(&session), enterprise_request()),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["realm"], "acme");
    assert!(app.broker.has_realm("acme"));
}
