//! Invitation administration and the public invitation landing lookup.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use super::context::{require_admin, PageQuery};
use crate::models::InvitationResponse;
use crate::services::{CreateInvitationRequest, SessionClaims};
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationResponse {
    pub invitation: InvitationResponse,
    /// Shown once. Only its hash is stored.
    pub token: String,
}

pub async fn create_invitation(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    ValidatedJson(request): ValidatedJson<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<CreateInvitationResponse>), AppError> {
    let (ctx, user_id) = require_admin(&state, &claims).await?;

    let created = state.invitations.create(&ctx, request, user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateInvitationResponse {
            invitation: created.invitation.into(),
            token: created.token,
        }),
    ))
}

pub async fn list_invitations(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<InvitationResponse>>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let invitations = state.invitations.list(&ctx, query.page()).await?;
    Ok(Json(invitations.into_iter().map(Into::into).collect()))
}

pub async fn get_invitation(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path(invitation_id): Path<Uuid>,
) -> Result<Json<InvitationResponse>, AppError> {
    let (ctx, _) = require_admin(&state, &claims).await?;

    let invitation = state.invitations.get(&ctx, invitation_id).await?;
    Ok(Json(invitation.into()))
}

/// Public: what an invitation link points at, before the invitee signs in.
pub async fn lookup_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<InvitationResponse>, AppError> {
    let invitation = state.invitations.lookup(&token).await?;
    Ok(Json(invitation.into()))
}
