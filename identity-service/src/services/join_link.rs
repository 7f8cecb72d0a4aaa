//! Multi-use, revocable join links.

use chrono::{Duration, Utc};
use serde::Deserialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::ServiceError;
use crate::models::{Membership, Principal, Role, TenantJoinLink};
use crate::store::{IdentityStore, Page, TenantContext, TenantScopedStore, UnitOfWork};
use crate::utils::{generate_token, hash_token};

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJoinLinkRequest {
    #[serde(default)]
    pub default_role_id: Option<Uuid>,
    #[validate(range(min = 1, max = 365, message = "Expiry must be between 1 and 365 days"))]
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreatedJoinLink {
    pub link: TenantJoinLink,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct JoinedViaLink {
    pub membership: Membership,
    /// The link's default role, when it still exists.
    pub role: Option<Role>,
}

pub struct JoinLinkLedger {
    store: Arc<dyn IdentityStore>,
    links: TenantScopedStore<TenantJoinLink>,
    roles: TenantScopedStore<Role>,
    default_expiry_days: i64,
}

fn link_not_found(e: AppError) -> ServiceError {
    match e {
        AppError::NotFound(_) => ServiceError::NotFound("Join link".to_string()),
        other => ServiceError::Store(other),
    }
}

impl JoinLinkLedger {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        links: TenantScopedStore<TenantJoinLink>,
        roles: TenantScopedStore<Role>,
        default_expiry_days: i64,
    ) -> Self {
        Self {
            store,
            links,
            roles,
            default_expiry_days,
        }
    }

    #[instrument(skip(self, request), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn create(
        &self,
        ctx: &TenantContext,
        created_by: Uuid,
        request: CreateJoinLinkRequest,
    ) -> Result<CreatedJoinLink, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        if self.store.find_user(created_by).await?.is_none() {
            return Err(ServiceError::NotFound("User".to_string()));
        }

        if let Some(role_id) = request.default_role_id {
            self.roles.get(ctx, role_id).await.map_err(|e| match e {
                AppError::NotFound(_) => ServiceError::NotFound("Role".to_string()),
                other => ServiceError::Store(other),
            })?;
        }

        let days = request.expires_in_days.unwrap_or(self.default_expiry_days);
        let token = generate_token();
        let link = TenantJoinLink::new(
            ctx.tenant_id(),
            hash_token(&token),
            Utc::now() + Duration::days(days),
            request.default_role_id,
            created_by,
        );
        let link = self.links.create(ctx, link).await?;

        tracing::info!(join_link_id = %link.join_link_id, "Join link created");
        Ok(CreatedJoinLink { link, token })
    }

    pub async fn revoke(
        &self,
        ctx: &TenantContext,
        join_link_id: Uuid,
    ) -> Result<TenantJoinLink, ServiceError> {
        let mut link = self
            .links
            .get(ctx, join_link_id)
            .await
            .map_err(link_not_found)?;
        if link.revoked_flag {
            return Ok(link);
        }

        link.revoked_flag = true;
        let link = self.links.update(ctx, link).await.map_err(link_not_found)?;
        tracing::info!(join_link_id = %link.join_link_id, "Join link revoked");
        Ok(link)
    }

    pub async fn list(
        &self,
        ctx: &TenantContext,
        page: Page,
    ) -> Result<Vec<TenantJoinLink>, ServiceError> {
        Ok(self.links.list(ctx, page).await?)
    }

    pub async fn get(
        &self,
        ctx: &TenantContext,
        join_link_id: Uuid,
    ) -> Result<TenantJoinLink, ServiceError> {
        self.links
            .get(ctx, join_link_id)
            .await
            .map_err(link_not_found)
    }

    /// Cross-tenant lookup by plaintext token, valid or not.
    pub async fn resolve(&self, token: &str) -> Result<TenantJoinLink, ServiceError> {
        self.store
            .find_join_link_by_token_hash(&hash_token(token.trim()))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Join link".to_string()))
    }

    /// Joins the link's tenant inside the caller's unit of work. The link
    /// stays usable for others.
    pub async fn use_link(
        &self,
        uow: &mut dyn UnitOfWork,
        token: &str,
        principal: &Principal,
    ) -> Result<JoinedViaLink, ServiceError> {
        let link = uow
            .find_join_link_by_token_hash(&hash_token(token.trim()))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Join link".to_string()))?;

        if !link.is_valid() {
            return Err(ServiceError::InvalidOrExpired("Join link".to_string()));
        }

        if uow
            .find_membership(principal.user_id, link.tenant_id)
            .await?
            .is_some()
        {
            return Err(ServiceError::AlreadyMember);
        }

        let membership = Membership::new(
            principal.user_id,
            link.tenant_id,
            false,
            Some(principal.external_subject_id.clone()),
        );
        uow.insert_membership(&membership)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => ServiceError::AlreadyMember,
                other => ServiceError::Store(other),
            })?;

        let role = match link.default_role_id {
            Some(role_id) => uow.find_role(link.tenant_id, role_id).await?,
            None => None,
        };

        tracing::info!(
            join_link_id = %link.join_link_id,
            tenant_id = %link.tenant_id,
            user_id = %principal.user_id,
            "Joined via link"
        );

        Ok(JoinedViaLink { membership, role })
    }
}
