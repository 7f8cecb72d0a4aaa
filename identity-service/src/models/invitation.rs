//! Invitation model - single-use, email-targeted offers to join a tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::TenantEntity;

/// Invitation status codes. Expiry is derived from `expiry_utc`, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TenantInvitation {
    pub invitation_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub token_hash: String,
    pub status_code: String,
    pub is_admin: bool,
    pub expiry_utc: DateTime<Utc>,
    pub created_by_user_id: Uuid,
    pub accepted_by_user_id: Option<Uuid>,
    pub accepted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl TenantInvitation {
    pub fn new(
        tenant_id: Uuid,
        email: String,
        token_hash: String,
        is_admin: bool,
        expiry_utc: DateTime<Utc>,
        created_by_user_id: Uuid,
    ) -> Self {
        Self {
            invitation_id: Uuid::new_v4(),
            tenant_id,
            email,
            token_hash,
            status_code: InvitationStatus::Pending.as_str().to_string(),
            is_admin,
            expiry_utc,
            created_by_user_id,
            accepted_by_user_id: None,
            accepted_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status_code == InvitationStatus::Pending.as_str()
    }

    pub fn is_accepted(&self) -> bool {
        self.status_code == InvitationStatus::Accepted.as_str()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_utc
    }

    /// Pending and not yet expired.
    pub fn is_valid(&self) -> bool {
        self.is_pending() && !self.is_expired_at(Utc::now())
    }

    pub fn email_matches(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }

    /// One-way Pending -> Accepted transition.
    pub fn accept(&mut self, user_id: Uuid, at: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status_code = InvitationStatus::Accepted.as_str().to_string();
        self.accepted_by_user_id = Some(user_id);
        self.accepted_utc = Some(at);
        true
    }
}

impl TenantEntity for TenantInvitation {
    const KIND: &'static str = "Invitation";

    fn id(&self) -> Uuid {
        self.invitation_id
    }

    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    fn set_tenant_id(&mut self, tenant_id: Uuid) {
        self.tenant_id = tenant_id;
    }

    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }
}

/// Invitation as returned to API callers. Never carries the token hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationResponse {
    pub invitation_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub status: String,
    pub is_admin: bool,
    pub is_expired: bool,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<TenantInvitation> for InvitationResponse {
    fn from(i: TenantInvitation) -> Self {
        Self {
            is_expired: i.is_expired_at(Utc::now()),
            invitation_id: i.invitation_id,
            tenant_id: i.tenant_id,
            email: i.email,
            status: i.status_code,
            is_admin: i.is_admin,
            expires_at: i.expiry_utc,
            accepted_at: i.accepted_utc,
            created_at: i.created_utc,
        }
    }
}
