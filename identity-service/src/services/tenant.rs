//! Tenant administration: enterprise provisioning, SSO settings, roles.

use serde::Deserialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::broker::IdentityBroker;
use super::ServiceError;
use crate::models::{InvitationMode, Policy, Role, Tenant};
use crate::store::{IdentityStore, TenantContext, TenantScopedStore};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnterpriseTenantRequest {
    #[validate(length(min = 1, max = 200, message = "Tenant name must be 1-200 characters"))]
    pub tenant_name: String,
    #[validate(length(min = 2, max = 63, message = "Realm must be 2-63 characters"))]
    pub realm: String,
    pub invitation_mode: InvitationMode,
    #[serde(default)]
    pub custom_domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 100, message = "Role name must be 1-100 characters"))]
    pub role_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn normalize_realm(realm: &str) -> Result<String, ServiceError> {
    let realm = realm.trim().to_ascii_lowercase();
    if realm.is_empty()
        || !realm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(ServiceError::Validation(
            "Realm may only contain lowercase letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(realm)
}

/// Trimmed, lowercased, without a leading `@`, empty entries dropped, deduplicated.
pub fn normalize_domains(domains: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = domains
        .iter()
        .map(|d| d.trim().trim_start_matches('@').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

pub struct TenantService {
    store: Arc<dyn IdentityStore>,
    broker: Arc<dyn IdentityBroker>,
    roles: TenantScopedStore<Role>,
    policies: TenantScopedStore<Policy>,
}

impl TenantService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        broker: Arc<dyn IdentityBroker>,
        roles: TenantScopedStore<Role>,
        policies: TenantScopedStore<Policy>,
    ) -> Self {
        Self {
            store,
            broker,
            roles,
            policies,
        }
    }

    /// Creates the provider realm, then the local tenant. A failed local
    /// write tries to delete the realm again.
    #[instrument(skip(self, request), fields(realm = %request.realm))]
    pub async fn create_enterprise_tenant(
        &self,
        request: CreateEnterpriseTenantRequest,
    ) -> Result<Tenant, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        let realm = normalize_realm(&request.realm)?;

        if self.store.find_tenant_by_realm(&realm).await?.is_some() {
            return Err(ServiceError::Validation(format!(
                "Realm '{}' is already bound to an organization",
                realm
            )));
        }

        self.broker
            .create_realm(&realm, request.tenant_name.trim())
            .await?;

        let mut tenant = Tenant::new_enterprise(
            request.tenant_name.trim().to_string(),
            realm.clone(),
            request.invitation_mode,
        );
        tenant.custom_domain = request
            .custom_domain
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty());

        if let Err(e) = self.persist_tenant(&tenant).await {
            tracing::error!(error = %e, "Tenant write failed after realm creation, removing realm");
            if let Err(cleanup) = self.broker.delete_realm(&realm).await {
                tracing::error!(error = %cleanup, "Compensating realm deletion failed");
            }
            return Err(e);
        }

        tracing::info!(tenant_id = %tenant.tenant_id, "Enterprise tenant created");
        Ok(tenant)
    }

    async fn persist_tenant(&self, tenant: &Tenant) -> Result<(), ServiceError> {
        let mut uow = self.store.begin().await?;
        if let Err(e) = uow.insert_tenant(tenant).await {
            if let Err(rollback) = uow.rollback().await {
                tracing::error!(error = %rollback, "Rollback failed");
            }
            return Err(e.into());
        }
        uow.commit().await?;
        Ok(())
    }

    /// Replaces the auto-join domain set and the default role of an
    /// enterprise tenant.
    #[instrument(skip(self, domains), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn configure_sso(
        &self,
        ctx: &TenantContext,
        domains: &[String],
        default_role_id: Option<Uuid>,
    ) -> Result<Tenant, ServiceError> {
        if let Some(role_id) = default_role_id {
            self.roles.get(ctx, role_id).await.map_err(|e| match e {
                AppError::NotFound(_) => ServiceError::NotFound("Role".to_string()),
                other => ServiceError::Store(other),
            })?;
        }
        let domains = normalize_domains(domains);

        let mut uow = self.store.begin().await?;
        let mut tenant = match uow.lock_tenant(ctx.tenant_id()).await? {
            Some(tenant) => tenant,
            None => {
                uow.rollback().await?;
                return Err(ServiceError::NotFound("Organization".to_string()));
            }
        };
        if !tenant.is_enterprise() {
            uow.rollback().await?;
            return Err(ServiceError::Validation(
                "SSO auto-join is only available to enterprise organizations".to_string(),
            ));
        }

        tenant.sso_auto_join_domains = domains;
        tenant.sso_default_role_id = default_role_id;
        uow.update_tenant(&tenant).await?;
        uow.commit().await?;

        tracing::info!(
            domains = tenant.sso_auto_join_domains.len(),
            "SSO auto-join settings updated"
        );
        Ok(tenant)
    }

    pub async fn create_role(
        &self,
        ctx: &TenantContext,
        request: CreateRoleRequest,
    ) -> Result<Role, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let role = Role::new(
            ctx.tenant_id(),
            request.role_name.trim().to_string(),
            request.description,
        );
        self.roles.create(ctx, role).await.map_err(|e| match e {
            AppError::Conflict(_) => {
                ServiceError::Validation("A role with this name already exists".to_string())
            }
            other => ServiceError::Store(other),
        })
    }

    pub async fn list_roles(&self, ctx: &TenantContext) -> Result<Vec<Role>, ServiceError> {
        Ok(self.roles.export(ctx).await?)
    }

    pub async fn create_policy(
        &self,
        ctx: &TenantContext,
        policy_name: &str,
    ) -> Result<Policy, ServiceError> {
        let name = policy_name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation(
                "Policy name must not be empty".to_string(),
            ));
        }
        Ok(self
            .policies
            .create(ctx, Policy::new(ctx.tenant_id(), name.to_string()))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domains() {
        let input = vec![
            " @Acme.com ".to_string(),
            "acme.com".to_string(),
            "".to_string(),
            "EU.acme.com".to_string(),
        ];

        assert_eq!(normalize_domains(&input), vec!["acme.com", "eu.acme.com"]);
    }

    #[test]
    fn test_realm_charset() {
        assert_eq!(normalize_realm(" Acme-Corp ").unwrap(), "acme-corp");
        assert!(normalize_realm("acme corp").is_err());
        assert!(normalize_realm("acme/../master").is_err());
    }
}
