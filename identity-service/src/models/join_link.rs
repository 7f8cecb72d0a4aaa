//! Join link model - multi-use, revocable offers to join a tenant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::TenantEntity;

#[derive(Debug, Clone, FromRow)]
pub struct TenantJoinLink {
    pub join_link_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_flag: bool,
    pub default_role_id: Option<Uuid>,
    pub created_by_user_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl TenantJoinLink {
    pub fn new(
        tenant_id: Uuid,
        token_hash: String,
        expiry_utc: DateTime<Utc>,
        default_role_id: Option<Uuid>,
        created_by_user_id: Uuid,
    ) -> Self {
        Self {
            join_link_id: Uuid::new_v4(),
            tenant_id,
            token_hash,
            expiry_utc,
            revoked_flag: false,
            default_role_id,
            created_by_user_id,
            created_utc: Utc::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.revoked_flag && Utc::now() < self.expiry_utc
    }
}

impl TenantEntity for TenantJoinLink {
    const KIND: &'static str = "Join link";

    fn id(&self) -> Uuid {
        self.join_link_id
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

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLinkResponse {
    pub join_link_id: Uuid,
    pub tenant_id: Uuid,
    pub is_revoked: bool,
    pub is_valid: bool,
    pub default_role_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<TenantJoinLink> for JoinLinkResponse {
    fn from(l: TenantJoinLink) -> Self {
        Self {
            is_valid: l.is_valid(),
            join_link_id: l.join_link_id,
            tenant_id: l.tenant_id,
            is_revoked: l.revoked_flag,
            default_role_id: l.default_role_id,
            expires_at: l.expiry_utc,
            created_at: l.created_utc,
        }
    }
}
