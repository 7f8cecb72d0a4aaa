//! Caller context shared by the tenant-scoped handlers.

use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::services::SessionClaims;
use crate::store::{Page, TenantContext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        let default = Page::default();
        Page::new(
            self.offset.unwrap_or(default.offset),
            self.limit.unwrap_or(default.limit),
        )
    }
}

/// Tenant and user the session acts for.
pub fn caller(claims: &SessionClaims) -> Result<(TenantContext, Uuid), AppError> {
    Ok((TenantContext::from_claims(claims), claims.user_id()?))
}

/// Like [`caller`], but the user must administer the session's tenant.
pub async fn require_admin(
    state: &AppState,
    claims: &SessionClaims,
) -> Result<(TenantContext, Uuid), AppError> {
    let (ctx, user_id) = caller(claims)?;
    let membership = state.store.find_membership(user_id, ctx.tenant_id()).await?;

    match membership {
        Some(m) if m.is_admin => Ok((ctx, user_id)),
        _ => {
            tracing::warn!(%user_id, tenant_id = %ctx.tenant_id(), "Administrator access refused");
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Organization administrator access required"
            )))
        }
    }
}

/// The caller must carry the platform `permission` as a direct role claim.
pub fn require_platform_permission(
    state: &AppState,
    claims: &SessionClaims,
    permission: &str,
) -> Result<(), AppError> {
    if state.permissions.has_platform_permission(&claims.roles, permission) {
        Ok(())
    } else {
        tracing::warn!(sub = %claims.sub, permission, "Platform permission refused");
        Err(AppError::Forbidden(anyhow::anyhow!(
            "Missing permission {}",
            permission
        )))
    }
}
