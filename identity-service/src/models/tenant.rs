//! Tenant model - organizational scope owning memberships, roles and data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantType {
    Standard,
    Enterprise,
}

impl TenantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantType::Standard => "standard",
            TenantType::Enterprise => "enterprise",
        }
    }
}

/// How an enterprise tenant brings invited people into its realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationMode {
    /// The provider federates to the customer's IdP and creates accounts at first login.
    Sso,
    /// Accounts are provisioned up front and the invitee sets a password.
    LocalAccount,
}

impl InvitationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationMode::Sso => "sso",
            InvitationMode::LocalAccount => "local_account",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub tenant_type_code: String,
    pub parent_tenant_id: Option<Uuid>,
    pub active_flag: bool,
    /// Provider realm owned by an enterprise tenant. Standard tenants share the default realm.
    pub realm: Option<String>,
    pub custom_domain: Option<String>,
    pub sso_auto_join_domains: Vec<String>,
    pub sso_default_role_id: Option<Uuid>,
    pub invitation_mode_code: String,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    pub fn new_standard(tenant_name: String) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            tenant_name,
            tenant_type_code: TenantType::Standard.as_str().to_string(),
            parent_tenant_id: None,
            active_flag: true,
            realm: None,
            custom_domain: None,
            sso_auto_join_domains: Vec::new(),
            sso_default_role_id: None,
            invitation_mode_code: InvitationMode::Sso.as_str().to_string(),
            created_utc: Utc::now(),
        }
    }

    pub fn new_enterprise(tenant_name: String, realm: String, mode: InvitationMode) -> Self {
        Self {
            tenant_type_code: TenantType::Enterprise.as_str().to_string(),
            realm: Some(realm),
            invitation_mode_code: mode.as_str().to_string(),
            ..Self::new_standard(tenant_name)
        }
    }

    pub fn tenant_type(&self) -> TenantType {
        if self.tenant_type_code == TenantType::Enterprise.as_str() {
            TenantType::Enterprise
        } else {
            TenantType::Standard
        }
    }

    pub fn is_enterprise(&self) -> bool {
        self.tenant_type() == TenantType::Enterprise
    }

    pub fn invitation_mode(&self) -> InvitationMode {
        if self.invitation_mode_code == InvitationMode::LocalAccount.as_str() {
            InvitationMode::LocalAccount
        } else {
            InvitationMode::Sso
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_flag
    }
}
