//! Roles, policies and permissions.
//!
//! A role references policies, a policy references permissions. Roles and
//! policies belong to a tenant; permission names are global.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::TenantEntity;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub role_name: String,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(tenant_id: Uuid, role_name: String, description: Option<String>) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id,
            role_name,
            description,
            created_utc: Utc::now(),
        }
    }
}

impl TenantEntity for Role {
    const KIND: &'static str = "Role";

    fn id(&self) -> Uuid {
        self.role_id
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

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Policy {
    pub policy_id: Uuid,
    pub tenant_id: Uuid,
    pub policy_name: String,
    pub created_utc: DateTime<Utc>,
}

impl Policy {
    pub fn new(tenant_id: Uuid, policy_name: String) -> Self {
        Self {
            policy_id: Uuid::new_v4(),
            tenant_id,
            policy_name,
            created_utc: Utc::now(),
        }
    }
}

impl TenantEntity for Policy {
    const KIND: &'static str = "Policy";

    fn id(&self) -> Uuid {
        self.policy_id
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

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub permission_id: Uuid,
    pub permission_name: String,
    pub description: Option<String>,
}

impl Permission {
    pub fn new(permission_name: String, description: Option<String>) -> Self {
        Self {
            permission_id: Uuid::new_v4(),
            permission_name,
            description,
        }
    }
}
