use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// (user, tenant) access grant. Unique per pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub membership_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub is_admin: bool,
    pub external_user_id: Option<String>,
    pub joined_utc: DateTime<Utc>,
}

impl Membership {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        is_admin: bool,
        external_user_id: Option<String>,
    ) -> Self {
        Self {
            membership_id: Uuid::new_v4(),
            user_id,
            tenant_id,
            is_admin,
            external_user_id,
            joined_utc: Utc::now(),
        }
    }
}

/// A membership joined with its tenant's display name, for tenant pickers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MembershipSummary {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub is_admin: bool,
}
