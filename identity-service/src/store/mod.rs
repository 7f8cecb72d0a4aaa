//! Persistence contracts.
//!
//! Everything the flows mutate goes through a [`UnitOfWork`] obtained from
//! [`IdentityStore::begin`]; the only reads outside a transaction are the
//! cross-tenant lookups listed on [`IdentityStore`]. Tenant-owned entities
//! are otherwise reached through [`TenantScopedStore`].

mod memory;
mod postgres;
mod scoped;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use scoped::{EntityTable, Page, StampTenant, TenantContext, TenantEntity, TenantFilter, TenantScopedStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::{
    Membership, MembershipSummary, Permission, Role, Tenant, TenantInvitation, TenantJoinLink, User,
};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    async fn find_user_id_by_subject(
        &self,
        realm: &str,
        external_subject_id: &str,
    ) -> Result<Option<Uuid>, AppError>;

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>;

    async fn find_tenant_by_realm(&self, realm: &str) -> Result<Option<Tenant>, AppError>;

    async fn find_membership(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Membership>, AppError>;

    // Sanctioned cross-tenant lookups.

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantInvitation>, AppError>;

    async fn find_pending_invitations_for_email(
        &self,
        email: &str,
    ) -> Result<Vec<TenantInvitation>, AppError>;

    async fn find_join_link_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantJoinLink>, AppError>;
}

/// One database transaction. Dropping it without `commit` discards every write.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Insert or refresh the user row and link it to `(realm, external_subject_id)`.
    /// Returns the user id that owns the link, which is the existing owner when
    /// the link was already present.
    async fn upsert_user(
        &mut self,
        user: &User,
        realm: &str,
        external_subject_id: &str,
    ) -> Result<Uuid, AppError>;

    async fn find_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>;

    async fn find_tenant_by_realm(&mut self, realm: &str) -> Result<Option<Tenant>, AppError>;

    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError>;

    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError>;

    /// Row-lock the tenant until commit. Serialises concurrent first-admin attempts.
    async fn lock_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>;

    /// Memberships in active tenants, oldest first.
    async fn list_memberships_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<MembershipSummary>, AppError>;

    async fn count_memberships(&mut self, tenant_id: Uuid) -> Result<i64, AppError>;

    async fn find_membership(
        &mut self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Membership>, AppError>;

    /// Fails with `AppError::Conflict` when the (user, tenant) pair already exists.
    async fn insert_membership(&mut self, membership: &Membership) -> Result<(), AppError>;

    async fn find_invitation_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<TenantInvitation>, AppError>;

    async fn find_pending_invitation_for_email(
        &mut self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<TenantInvitation>, AppError>;

    /// Pending -> Accepted. False when the invitation was no longer pending.
    async fn mark_invitation_accepted(
        &mut self,
        invitation_id: Uuid,
        user_id: Uuid,
        accepted_utc: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn find_join_link_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<TenantJoinLink>, AppError>;

    async fn find_role(&mut self, tenant_id: Uuid, role_id: Uuid) -> Result<Option<Role>, AppError>;

    async fn find_role_by_name(
        &mut self,
        tenant_id: Uuid,
        role_name: &str,
    ) -> Result<Option<Role>, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// Role -> policy -> permission mappings.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Union of permission names reachable from the named roles of one tenant.
    async fn permissions_for_roles(
        &self,
        tenant_id: Uuid,
        role_names: &[String],
    ) -> Result<BTreeSet<String>, AppError>;

    async fn insert_permission(&self, permission: &Permission) -> Result<(), AppError>;

    async fn find_permission(&self, permission_id: Uuid) -> Result<Option<Permission>, AppError>;

    /// The mapping mutations return false when nothing changed. Role and
    /// policy must belong to `tenant_id`, otherwise `AppError::NotFound`.
    async fn attach_policy(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> Result<bool, AppError>;

    async fn detach_policy(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> Result<bool, AppError>;

    async fn grant_permission(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, AppError>;

    async fn revoke_permission(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, AppError>;
}
