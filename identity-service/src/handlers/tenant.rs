use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use super::context::{require_admin, require_platform_permission};
use crate::models::{Policy, Role, Tenant};
use crate::services::{
    CreateEnterpriseTenantRequest, CreateRoleRequest, SessionClaims, TENANT_CREATE_PERMISSION,
};
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureSsoRequest {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub default_role_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyRequest {
    pub policy_name: String,
}

pub async fn create_enterprise_tenant(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    ValidatedJson(request): ValidatedJson<CreateEnterpriseTenantRequest>,
) -> Result<(StatusCode, Json<Tenant>), AppError> {
    require_platform_permission(&state, &claims, TENANT_CREATE_PERMISSION)?;

    let tenant = state.tenants.create_enterprise_tenant(request).await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

pub async fn configure_sso(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(request): Json<ConfigureSsoRequest>,
) -> Result<Json<Tenant>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let tenant = state
        .tenants
        .configure_sso(&ctx, &request.domains, request.default_role_id)
        .await?;
    Ok(Json(tenant))
}

pub async fn create_role(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    ValidatedJson(request): ValidatedJson<CreateRoleRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let role = state.tenants.create_role(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn list_roles(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<Json<Vec<Role>>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    Ok(Json(state.tenants.list_roles(&ctx).await?))
}

pub async fn create_policy(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<(StatusCode, Json<Policy>), AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let policy = state.tenants.create_policy(&ctx, &request.policy_name).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}
