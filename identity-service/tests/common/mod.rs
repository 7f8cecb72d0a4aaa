//! Test helper module for identity-service integration tests.
//!
//! Wires the real services over the in-memory store, the mock identity
//! provider and the in-process cache.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, IdentityConfig, IdpConfig, JwtConfig, RedisConfig,
        TenancyConfig,
    },
    models::{AuthFlow, AuthFlowResult, CallbackState, InvitationMode, Tenant, TenantInvitation, User},
    services::{CallbackRequest, IdentityClaims, MockCache, MockIdentityBroker, TokenIssuer},
    store::{IdentityStore, MemoryStore, TenantContext, TenantScopedStore},
    utils::hash_token,
    AppState,
};
use secrecy::Secret;
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_REALM: &str = "groundup";
pub const TEST_ISSUER: &str = "identity-service-test";
const TEST_SECRET: &[u8] = b"identity-service-test-signing-secret";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://localhost/identity_test".to_string(),
            max_connections: 5,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        },
        jwt: JwtConfig {
            private_key_path: "unused".to_string(),
            public_key_path: "unused".to_string(),
            issuer: TEST_ISSUER.to_string(),
        },
        idp: IdpConfig {
            base_url: "http://idp.test".to_string(),
            admin_realm: "master".to_string(),
            client_id: "identity-service".to_string(),
            client_secret: Secret::new("secret".to_string()),
            default_realm: TEST_REALM.to_string(),
            redirect_uri: "http://localhost:8080/auth/callback".to_string(),
        },
        tenancy: TenancyConfig::default(),
    }
}

/// Test application over in-memory collaborators.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MockIdentityBroker>,
    pub cache: Arc<MockCache>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MockIdentityBroker::new());
        let cache = Arc::new(MockCache::new());
        let issuer = TokenIssuer::from_secret(TEST_SECRET, TEST_ISSUER);

        let state = AppState::new(
            test_config(),
            store.clone(),
            broker.clone(),
            cache.clone(),
            issuer,
        );

        Self {
            store,
            broker,
            cache,
            state,
        }
    }

    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Registers a provider login for `claims` and runs the callback with `state`.
    pub async fn login(&self, claims: &IdentityClaims, state: &CallbackState) -> AuthFlowResult {
        let code = format!("code-{}", Uuid::new_v4());
        self.broker.register_login(&code, claims);
        self.callback(&code, Some(state.encode())).await
    }

    pub async fn callback(&self, code: &str, state: Option<String>) -> AuthFlowResult {
        self.state
            .orchestrator
            .handle_callback(CallbackRequest {
                code: code.to_string(),
                state,
                redirect_uri: "http://localhost:3000/callback".to_string(),
            })
            .await
    }

    /// Creates a user linked to `sub` in the default realm.
    pub async fn seed_user(&self, sub: &str, email: &str) -> Uuid {
        let user = User::new(
            Uuid::new_v4(),
            Some(email.to_string()),
            true,
            None,
            None,
            None,
        );
        let mut uow = self.store.begin().await.expect("begin");
        let user_id = uow
            .upsert_user(&user, TEST_REALM, sub)
            .await
            .expect("upsert user");
        uow.commit().await.expect("commit");
        user_id
    }

    pub async fn seed_standard_tenant(&self, name: &str) -> Tenant {
        let tenant = Tenant::new_standard(name.to_string());
        self.store.insert_tenant(tenant.clone()).await;
        tenant
    }

    pub async fn seed_enterprise_tenant(&self, realm: &str, domains: &[&str]) -> Tenant {
        let mut tenant = Tenant::new_enterprise(
            format!("{} Inc", realm),
            realm.to_string(),
            InvitationMode::Sso,
        );
        tenant.sso_auto_join_domains = domains.iter().map(|d| d.to_string()).collect();
        self.broker.add_realm(realm);
        self.store.insert_tenant(tenant.clone()).await;
        tenant
    }

    /// Stores an invitation whose plaintext token is `token`.
    pub async fn seed_invitation(
        &self,
        tenant_id: Uuid,
        email: &str,
        token: &str,
        is_admin: bool,
        created_by: Uuid,
    ) -> TenantInvitation {
        let invitations: TenantScopedStore<TenantInvitation> =
            TenantScopedStore::new(self.store.clone());
        invitations
            .create(
                &TenantContext::new(tenant_id),
                TenantInvitation::new(
                    tenant_id,
                    email.to_string(),
                    hash_token(token),
                    is_admin,
                    Utc::now() + Duration::days(7),
                    created_by,
                ),
            )
            .await
            .expect("seed invitation")
    }

    pub async fn memberships_of(&self, tenant_id: Uuid) -> usize {
        self.store
            .memberships()
            .await
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .count()
    }
}

pub fn claims(sub: &str, email: &str, given_name: Option<&str>) -> IdentityClaims {
    IdentityClaims {
        sub: sub.to_string(),
        email: Some(email.to_string()),
        email_verified: true,
        given_name: given_name.map(str::to_string),
        ..Default::default()
    }
}

pub fn state(flow: AuthFlow, realm: &str) -> CallbackState {
    CallbackState {
        flow,
        realm: realm.to_string(),
        invitation_token: None,
        join_token: None,
    }
}
