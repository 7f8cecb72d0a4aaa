use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::BTreeSet;
use uuid::Uuid;

use super::context::{caller, require_admin, require_platform_permission};
use crate::models::Permission;
use crate::services::{SessionClaims, PERMISSION_MANAGE_PERMISSION};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermissionsResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinePermissionRequest {
    pub permission_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MappingResponse {
    pub changed: bool,
}

pub async fn my_permissions(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<Json<EffectivePermissionsResponse>, AppError> {
    let (ctx, user_id) = caller(&claims)?;

    let permissions = state
        .permissions
        .effective_permissions(&ctx, user_id, &claims.roles)
        .await?;

    Ok(Json(EffectivePermissionsResponse {
        user_id,
        tenant_id: ctx.tenant_id(),
        roles: claims.roles.clone(),
        permissions,
    }))
}

pub async fn define_permission(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(request): Json<DefinePermissionRequest>,
) -> Result<(StatusCode, Json<Permission>), AppError> {
    require_platform_permission(&state, &claims, PERMISSION_MANAGE_PERMISSION)?;

    let permission = state
        .permissions
        .define_permission(&request.permission_name, request.description)
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

pub async fn attach_policy(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path((role_id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MappingResponse>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let changed = state.permissions.attach_policy(&ctx, role_id, policy_id).await?;
    Ok(Json(MappingResponse { changed }))
}

pub async fn detach_policy(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path((role_id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MappingResponse>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let changed = state.permissions.detach_policy(&ctx, role_id, policy_id).await?;
    Ok(Json(MappingResponse { changed }))
}

pub async fn grant_permission(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path((policy_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MappingResponse>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let changed = state
        .permissions
        .grant_permission(&ctx, policy_id, permission_id)
        .await?;
    Ok(Json(MappingResponse { changed }))
}

pub async fn revoke_permission(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path((policy_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MappingResponse>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let changed = state
        .permissions
        .revoke_permission(&ctx, policy_id, permission_id)
        .await?;
    Ok(Json(MappingResponse { changed }))
}
