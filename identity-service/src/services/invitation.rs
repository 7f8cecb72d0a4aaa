//! Single-use, email-targeted invitations.

use chrono::{Duration, Utc};
use serde::Deserialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::broker::{IdentityBroker, NewBrokerUser, RequiredAction};
use super::ServiceError;
use crate::models::{InvitationMode, Membership, Principal, Tenant, TenantInvitation};
use crate::store::{IdentityStore, Page, TenantContext, TenantScopedStore, UnitOfWork};
use crate::utils::{generate_token, hash_token};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// A new invitation and its plaintext token. The token is not recoverable later.
#[derive(Debug, Clone)]
pub struct CreatedInvitation {
    pub invitation: TenantInvitation,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct AcceptedInvitation {
    pub membership: Membership,
    pub invitation: TenantInvitation,
}

pub struct InvitationLedger {
    store: Arc<dyn IdentityStore>,
    invitations: TenantScopedStore<TenantInvitation>,
    broker: Arc<dyn IdentityBroker>,
    expiry_days: i64,
}

impl InvitationLedger {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        invitations: TenantScopedStore<TenantInvitation>,
        broker: Arc<dyn IdentityBroker>,
        expiry_days: i64,
    ) -> Self {
        Self {
            store,
            invitations,
            broker,
            expiry_days,
        }
    }

    #[instrument(skip(self, request), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn create(
        &self,
        ctx: &TenantContext,
        request: CreateInvitationRequest,
        created_by: Uuid,
    ) -> Result<CreatedInvitation, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        if self.store.find_user(created_by).await?.is_none() {
            return Err(ServiceError::NotFound("User".to_string()));
        }
        let tenant = self
            .store
            .find_tenant(ctx.tenant_id())
            .await?
            .ok_or_else(|| ServiceError::NotFound("Organization".to_string()))?;

        let email = request.email.trim().to_lowercase();

        if tenant.is_enterprise() && tenant.invitation_mode() == InvitationMode::LocalAccount {
            self.provision_local_account(&tenant, &email).await?;
        }

        let token = generate_token();
        let invitation = TenantInvitation::new(
            ctx.tenant_id(),
            email,
            hash_token(&token),
            request.is_admin,
            Utc::now() + Duration::days(self.expiry_days),
            created_by,
        );
        let invitation = self.invitations.create(ctx, invitation).await?;

        tracing::info!(
            invitation_id = %invitation.invitation_id,
            is_admin = invitation.is_admin,
            "Invitation created"
        );

        Ok(CreatedInvitation { invitation, token })
    }

    // The provider account has to exist before the invitee can set a password.
    async fn provision_local_account(&self, tenant: &Tenant, email: &str) -> Result<(), ServiceError> {
        let realm = tenant.realm.as_deref().ok_or_else(|| {
            ServiceError::Configuration(format!(
                "Enterprise organization {} has no realm",
                tenant.tenant_id
            ))
        })?;

        let provider_id = match self.broker.get_user_id_by_email(realm, email).await? {
            Some(id) => id,
            None => {
                self.broker
                    .create_user(realm, &NewBrokerUser::invitee(email))
                    .await?
            }
        };

        if let Err(e) = self
            .broker
            .send_notification_email(
                realm,
                &provider_id,
                &[RequiredAction::UpdatePassword, RequiredAction::VerifyEmail],
            )
            .await
        {
            tracing::warn!(error = %e, realm, "Failed to send invitation setup email");
        }
        Ok(())
    }

    pub async fn list(
        &self,
        ctx: &TenantContext,
        page: Page,
    ) -> Result<Vec<TenantInvitation>, ServiceError> {
        Ok(self.invitations.list(ctx, page).await?)
    }

    pub async fn get(
        &self,
        ctx: &TenantContext,
        invitation_id: Uuid,
    ) -> Result<TenantInvitation, ServiceError> {
        self.invitations
            .get(ctx, invitation_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => ServiceError::NotFound("Invitation".to_string()),
                other => ServiceError::Store(other),
            })
    }

    /// Cross-tenant lookup by plaintext token, whatever its status.
    pub async fn lookup(&self, token: &str) -> Result<TenantInvitation, ServiceError> {
        self.store
            .find_invitation_by_token_hash(&hash_token(token.trim()))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Invitation".to_string()))
    }

    /// Cross-tenant: valid invitations addressed to `email`.
    pub async fn find_pending_for_email(
        &self,
        email: &str,
    ) -> Result<Vec<TenantInvitation>, ServiceError> {
        Ok(self
            .store
            .find_pending_invitations_for_email(email.trim())
            .await?
            .into_iter()
            .filter(TenantInvitation::is_valid)
            .collect())
    }

    /// Accept by plaintext token inside the caller's unit of work.
    pub async fn accept(
        &self,
        uow: &mut dyn UnitOfWork,
        token: &str,
        principal: &Principal,
    ) -> Result<AcceptedInvitation, ServiceError> {
        let invitation = uow
            .find_invitation_by_token_hash(&hash_token(token.trim()))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Invitation".to_string()))?;

        self.accept_pending(uow, invitation, principal).await
    }

    /// Membership plus the Pending -> Accepted transition, both in `uow`.
    pub async fn accept_pending(
        &self,
        uow: &mut dyn UnitOfWork,
        mut invitation: TenantInvitation,
        principal: &Principal,
    ) -> Result<AcceptedInvitation, ServiceError> {
        if !invitation.is_valid() {
            return Err(ServiceError::InvalidOrExpired("Invitation".to_string()));
        }

        match principal.verified_email() {
            Some(email) if invitation.email_matches(email) => {}
            _ => return Err(ServiceError::EmailMismatch),
        }

        let membership = Membership::new(
            principal.user_id,
            invitation.tenant_id,
            invitation.is_admin,
            Some(principal.external_subject_id.clone()),
        );
        uow.insert_membership(&membership)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => ServiceError::AlreadyMember,
                other => ServiceError::Store(other),
            })?;

        let accepted_at = Utc::now();
        if !uow
            .mark_invitation_accepted(invitation.invitation_id, principal.user_id, accepted_at)
            .await?
        {
            return Err(ServiceError::InvalidOrExpired("Invitation".to_string()));
        }
        invitation.accept(principal.user_id, accepted_at);

        tracing::info!(
            invitation_id = %invitation.invitation_id,
            tenant_id = %invitation.tenant_id,
            user_id = %principal.user_id,
            "Invitation accepted"
        );

        Ok(AcceptedInvitation {
            membership,
            invitation,
        })
    }
}
