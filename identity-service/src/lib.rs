pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use service_core::observability::REQUEST_ID_HEADER;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::IdentityConfig;
use crate::models::{Policy, Role, TenantInvitation, TenantJoinLink};
use crate::services::{
    AuthFlowOrchestrator, CacheStore, IdentityBroker, InvitationLedger, JoinLinkLedger,
    PermissionResolver, TenantService, TokenIssuer,
};
use crate::store::{EntityTable, IdentityStore, PermissionStore, TenantScopedStore};

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn IdentityStore>,
    pub cache: Arc<dyn CacheStore>,
    pub issuer: Arc<TokenIssuer>,
    pub orchestrator: Arc<AuthFlowOrchestrator>,
    pub invitations: Arc<InvitationLedger>,
    pub join_links: Arc<JoinLinkLedger>,
    pub tenants: Arc<TenantService>,
    pub permissions: Arc<PermissionResolver>,
}

impl AppState {
    /// Wires every service over one backing store.
    pub fn new<S>(
        config: IdentityConfig,
        store: Arc<S>,
        broker: Arc<dyn IdentityBroker>,
        cache: Arc<dyn CacheStore>,
        issuer: TokenIssuer,
    ) -> Self
    where
        S: IdentityStore
            + PermissionStore
            + EntityTable<TenantInvitation>
            + EntityTable<TenantJoinLink>
            + EntityTable<Role>
            + EntityTable<Policy>
            + 'static,
    {
        let identity_store: Arc<dyn IdentityStore> = store.clone();
        let issuer = Arc::new(issuer);
        let tenancy = &config.tenancy;

        let invitations = Arc::new(InvitationLedger::new(
            identity_store.clone(),
            TenantScopedStore::new(store.clone()),
            broker.clone(),
            tenancy.invitation_expiry_days,
        ));
        let join_links = Arc::new(JoinLinkLedger::new(
            identity_store.clone(),
            TenantScopedStore::new(store.clone()),
            TenantScopedStore::new(store.clone()),
            tenancy.join_link_expiry_days,
        ));
        let tenants = Arc::new(TenantService::new(
            identity_store.clone(),
            broker.clone(),
            TenantScopedStore::new(store.clone()),
            TenantScopedStore::new(store.clone()),
        ));
        let permissions = Arc::new(PermissionResolver::new(
            store,
            cache.clone(),
            tenancy.permission_cache_ttl_seconds.max(1) as u64,
        ));
        let orchestrator = Arc::new(AuthFlowOrchestrator::new(
            identity_store.clone(),
            broker,
            issuer.clone(),
            invitations.clone(),
            join_links.clone(),
            config.idp.default_realm.clone(),
        ));

        Self {
            config,
            store: identity_store,
            cache,
            issuer,
            orchestrator,
            invitations,
            join_links,
            tenants,
            permissions,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route(
            "/tenants/current/invitations",
            post(handlers::create_invitation).get(handlers::list_invitations),
        )
        .route(
            "/tenants/current/invitations/:invitation_id",
            get(handlers::get_invitation),
        )
        .route(
            "/tenants/current/join-links",
            post(handlers::create_join_link).get(handlers::list_join_links),
        )
        .route(
            "/tenants/current/join-links/:join_link_id",
            get(handlers::get_join_link).delete(handlers::revoke_join_link),
        )
        .route("/tenants/current/sso", put(handlers::configure_sso))
        .route(
            "/tenants/current/roles",
            post(handlers::create_role).get(handlers::list_roles),
        )
        .route("/tenants/current/policies", post(handlers::create_policy))
        .route(
            "/tenants/current/roles/:role_id/policies/:policy_id",
            put(handlers::attach_policy).delete(handlers::detach_policy),
        )
        .route(
            "/tenants/current/policies/:policy_id/permissions/:permission_id",
            put(handlers::grant_permission).delete(handlers::revoke_permission),
        )
        .route("/tenants/enterprise", post(handlers::create_enterprise_tenant))
        .route("/permissions", post(handlers::define_permission))
        .route("/permissions/me", get(handlers::my_permissions))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/auth/callback", get(handlers::auth_callback))
        .route("/auth/select-tenant", post(handlers::select_tenant))
        .route("/invitations/:token", get(handlers::lookup_invitation))
        .route("/join-links/:token", get(handlers::resolve_join_link))
        .merge(session_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
}

/// Service health check: database and cache.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        e
    })?;

    state.cache.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Cache health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up",
            "cache": "up"
        }
    })))
}
