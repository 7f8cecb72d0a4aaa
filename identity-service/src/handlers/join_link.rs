use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use super::context::{require_admin, PageQuery};
use crate::models::JoinLinkResponse;
use crate::services::{CreateJoinLinkRequest, SessionClaims};
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJoinLinkResponse {
    pub join_link: JoinLinkResponse,
    pub token: String,
}

pub async fn create_join_link(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    ValidatedJson(request): ValidatedJson<CreateJoinLinkRequest>,
) -> Result<(StatusCode, Json<CreateJoinLinkResponse>), AppError> {
    let (ctx, user_id) = require_admin(&state, &claims).await?;

    let created = state.join_links.create(&ctx, user_id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateJoinLinkResponse {
            join_link: created.link.into(),
            token: created.token,
        }),
    ))
}

pub async fn list_join_links(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<JoinLinkResponse>>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let links = state.join_links.list(&ctx, query.page()).await?;
    Ok(Json(links.into_iter().map(Into::into).collect()))
}

pub async fn get_join_link(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path(join_link_id): Path<Uuid>,
) -> Result<Json<JoinLinkResponse>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    Ok(Json(state.join_links.get(&ctx, join_link_id).await?.into()))
}

pub async fn revoke_join_link(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path(join_link_id): Path<Uuid>,
) -> Result<Json<JoinLinkResponse>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    Ok(Json(state.join_links.revoke(&ctx, join_link_id).await?.into()))
}

/// Public: validity of a join link before sign-in.
pub async fn resolve_join_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<JoinLinkResponse>, AppError> {
    Ok(Json(state.join_links.resolve(&token).await?.into()))
}
