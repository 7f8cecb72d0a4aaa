use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::bearer_token;
use crate::models::AuthFlowResult;
use crate::services::CallbackRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectTenantRequest {
    pub tenant_id: Uuid,
}

/// HTTP status for a callback result, keyed by its error code.
pub fn callback_status(result: &AuthFlowResult) -> StatusCode {
    match result.error_code.as_deref() {
        None => StatusCode::OK,
        Some("validation_error") => StatusCode::BAD_REQUEST,
        Some("authentication_error") => StatusCode::UNAUTHORIZED,
        Some("not_found") => StatusCode::NOT_FOUND,
        Some("expired_or_revoked") => StatusCode::GONE,
        Some("email_mismatch") | Some("authorization_denied") => StatusCode::FORBIDDEN,
        Some("already_member") | Some("already_has_administrator") => StatusCode::CONFLICT,
        Some("upstream_error") => StatusCode::BAD_GATEWAY,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Identity provider redirect target.
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Json<AuthFlowResult>) {
    let request = CallbackRequest {
        code: query.code.unwrap_or_default(),
        state: query.state,
        redirect_uri: query
            .redirect_uri
            .unwrap_or_else(|| state.config.idp.redirect_uri.clone()),
    };

    let result = state.orchestrator.handle_callback(request).await;
    (callback_status(&result), Json(result))
}

/// Completes a login that returned `requiresTenantSelection`.
pub async fn select_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SelectTenantRequest>,
) -> Result<Json<AuthFlowResult>, AppError> {
    let token = bearer_token(&headers).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing tenant selection token"))
    })?;
    let claims = state.issuer.validate_selection(token)?;
    let user_id = claims.user_id()?;

    let result = state
        .orchestrator
        .select_tenant(user_id, body.tenant_id, &claims.identity())
        .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthFlow;

    #[test]
    fn test_callback_status_mapping() {
        let ok = AuthFlowResult::issued(
            AuthFlow::Default,
            "t".to_string(),
            Uuid::new_v4(),
            "Acme".to_string(),
            false,
        );
        let denied = AuthFlowResult::failure("x", "authorization_denied", "no".to_string());
        let gone = AuthFlowResult::failure("x", "expired_or_revoked", "old".to_string());
        let internal = AuthFlowResult::failure("x", "internal_error", "oops".to_string());

        assert_eq!(callback_status(&ok), StatusCode::OK);
        assert_eq!(callback_status(&denied), StatusCode::FORBIDDEN);
        assert_eq!(callback_status(&gone), StatusCode::GONE);
        assert_eq!(callback_status(&internal), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
