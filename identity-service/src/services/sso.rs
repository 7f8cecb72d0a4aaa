//! Self-provisioning of unknown principals into enterprise tenants.
//!
//! A principal joins only through an allow-listed email domain or a pending
//! invitation addressed to them. Everyone else is denied.

use service_core::error::AppError;
use std::sync::Arc;

use super::invitation::InvitationLedger;
use super::ServiceError;
use crate::models::{Membership, Principal, Role, Tenant, TenantInvitation};
use crate::store::UnitOfWork;

/// Name of the role used when the tenant has no default SSO role configured.
pub const FALLBACK_ROLE_NAME: &str = "Member";

#[derive(Debug, Clone)]
pub enum SsoDecision {
    DomainMatch {
        membership: Membership,
        role: Option<Role>,
    },
    Invitation {
        membership: Membership,
        invitation: TenantInvitation,
    },
}

impl SsoDecision {
    pub fn membership(&self) -> &Membership {
        match self {
            SsoDecision::DomainMatch { membership, .. } => membership,
            SsoDecision::Invitation { membership, .. } => membership,
        }
    }
}

/// True when the domain part of `email` is one of `domains`, ignoring case
/// and a leading `@` on configured entries.
pub fn domain_allowed(email: &str, domains: &[String]) -> bool {
    let Some((local, domain)) = email.trim().rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    domains
        .iter()
        .map(|d| d.trim().trim_start_matches('@'))
        .any(|d| !d.is_empty() && d.eq_ignore_ascii_case(domain))
}

pub struct SsoAutoJoinMatcher {
    invitations: Arc<InvitationLedger>,
}

impl SsoAutoJoinMatcher {
    pub fn new(invitations: Arc<InvitationLedger>) -> Self {
        Self { invitations }
    }

    pub async fn try_join(
        &self,
        uow: &mut dyn UnitOfWork,
        tenant: &Tenant,
        principal: &Principal,
    ) -> Result<SsoDecision, ServiceError> {
        let Some(email) = principal.verified_email() else {
            tracing::warn!(
                tenant_id = %tenant.tenant_id,
                user_id = %principal.user_id,
                "Enterprise access denied: no verified email"
            );
            return Err(ServiceError::Denied(
                "A verified email address is required to access this organization".to_string(),
            ));
        };

        if domain_allowed(email, &tenant.sso_auto_join_domains) {
            let membership = Membership::new(
                principal.user_id,
                tenant.tenant_id,
                false,
                Some(principal.external_subject_id.clone()),
            );
            uow.insert_membership(&membership)
                .await
                .map_err(|e| match e {
                    AppError::Conflict(_) => ServiceError::AlreadyMember,
                    other => ServiceError::Store(other),
                })?;

            let role = self.default_role(uow, tenant).await?;
            tracing::info!(
                tenant_id = %tenant.tenant_id,
                user_id = %principal.user_id,
                role = role.as_ref().map(|r| r.role_name.as_str()).unwrap_or("none"),
                "Auto-joined by email domain"
            );
            return Ok(SsoDecision::DomainMatch { membership, role });
        }

        if let Some(invitation) = uow
            .find_pending_invitation_for_email(tenant.tenant_id, email)
            .await?
        {
            let accepted = self
                .invitations
                .accept_pending(uow, invitation, principal)
                .await?;
            return Ok(SsoDecision::Invitation {
                membership: accepted.membership,
                invitation: accepted.invitation,
            });
        }

        tracing::warn!(
            tenant_id = %tenant.tenant_id,
            user_id = %principal.user_id,
            "Enterprise access denied: domain not allowed and no pending invitation"
        );
        Err(ServiceError::Denied(
            "Your account is not authorized to access this organization. Ask an administrator for an invitation."
                .to_string(),
        ))
    }

    async fn default_role(
        &self,
        uow: &mut dyn UnitOfWork,
        tenant: &Tenant,
    ) -> Result<Option<Role>, ServiceError> {
        if let Some(role_id) = tenant.sso_default_role_id {
            if let Some(role) = uow.find_role(tenant.tenant_id, role_id).await? {
                return Ok(Some(role));
            }
            tracing::warn!(%role_id, "Configured SSO default role no longer exists");
        }

        let role = uow
            .find_role_by_name(tenant.tenant_id, FALLBACK_ROLE_NAME)
            .await?;
        if role.is_none() {
            tracing::info!(
                tenant_id = %tenant.tenant_id,
                "No default role for auto-joined member"
            );
        }
        Ok(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_domain_match_is_case_insensitive() {
        assert!(domain_allowed("alice@ACME.com", &domains(&["acme.com"])));
        assert!(domain_allowed("alice@acme.com", &domains(&["@Acme.Com"])));
    }

    #[test]
    fn test_subdomains_and_lookalikes_do_not_match() {
        let allowed = domains(&["acme.com"]);
        assert!(!domain_allowed("bob@other.com", &allowed));
        assert!(!domain_allowed("bob@eu.acme.com", &allowed));
        assert!(!domain_allowed("bob@notacme.com", &allowed));
        assert!(!domain_allowed("acme.com", &allowed));
        assert!(!domain_allowed("@acme.com", &allowed));
    }

    #[test]
    fn test_empty_allow_list_matches_nothing() {
        assert!(!domain_allowed("alice@acme.com", &[]));
        assert!(!domain_allowed("alice@acme.com", &domains(&[""])));
    }
}
