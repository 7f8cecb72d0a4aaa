//! In-process store for tests and local development.
//!
//! A unit of work holds the table lock for its whole life and writes to a
//! private copy, so transactions are serialised and a dropped or rolled-back
//! unit leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::scoped::{EntityTable, Page, TenantEntity, TenantFilter};
use super::{IdentityStore, PermissionStore, UnitOfWork};
use crate::models::{
    Membership, MembershipSummary, Permission, Policy, Role, Tenant, TenantInvitation,
    TenantJoinLink, User, UserIdentity,
};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    users: HashMap<Uuid, User>,
    identities: HashMap<(String, String), UserIdentity>,
    tenants: HashMap<Uuid, Tenant>,
    memberships: HashMap<Uuid, Membership>,
    invitations: HashMap<Uuid, TenantInvitation>,
    join_links: HashMap<Uuid, TenantJoinLink>,
    roles: HashMap<Uuid, Role>,
    policies: HashMap<Uuid, Policy>,
    permissions: HashMap<Uuid, Permission>,
    role_policies: BTreeSet<(Uuid, Uuid)>,
    policy_permissions: BTreeSet<(Uuid, Uuid)>,
}

fn conflict(what: &str) -> AppError {
    AppError::Conflict(anyhow::anyhow!("{} already exists", what))
}

impl Tables {
    fn upsert_user(&mut self, user: &User, realm: &str, subject: &str) -> Uuid {
        let key = (realm.to_string(), subject.to_string());
        let owner = match self.identities.get(&key) {
            Some(link) => link.user_id,
            None => {
                self.identities.insert(
                    key,
                    UserIdentity::new(realm.to_string(), subject.to_string(), user.user_id),
                );
                user.user_id
            }
        };

        match self.users.get_mut(&owner) {
            Some(existing) => {
                existing.email = user.email.clone().or(existing.email.take());
                existing.email_verified = user.email_verified;
                existing.given_name = user.given_name.clone().or(existing.given_name.take());
                existing.family_name = user.family_name.clone().or(existing.family_name.take());
                existing.display_name = user.display_name.clone().or(existing.display_name.take());
                existing.updated_utc = Utc::now();
            }
            None => {
                let mut row = user.clone();
                row.user_id = owner;
                self.users.insert(owner, row);
            }
        }
        owner
    }

    fn find_tenant_by_realm(&self, realm: &str) -> Option<Tenant> {
        self.tenants
            .values()
            .find(|t| t.realm.as_deref() == Some(realm))
            .cloned()
    }

    fn find_membership(&self, user_id: Uuid, tenant_id: Uuid) -> Option<Membership> {
        self.memberships
            .values()
            .find(|m| m.user_id == user_id && m.tenant_id == tenant_id)
            .cloned()
    }

    fn find_invitation_by_token_hash(&self, token_hash: &str) -> Option<TenantInvitation> {
        self.invitations
            .values()
            .find(|i| i.token_hash == token_hash)
            .cloned()
    }

    fn pending_invitations_for_email<'a>(
        &'a self,
        email: &'a str,
    ) -> impl Iterator<Item = &'a TenantInvitation> + 'a {
        self.invitations
            .values()
            .filter(move |i| i.is_valid() && i.email_matches(email))
    }

    fn find_join_link_by_token_hash(&self, token_hash: &str) -> Option<TenantJoinLink> {
        self.join_links
            .values()
            .find(|l| l.token_hash == token_hash)
            .cloned()
    }

    fn role_in_tenant(&self, tenant_id: Uuid, role_id: Uuid) -> Result<(), AppError> {
        match self.roles.get(&role_id) {
            Some(r) if r.tenant_id == tenant_id => Ok(()),
            _ => Err(AppError::NotFound(anyhow::anyhow!("Role not found"))),
        }
    }

    fn policy_in_tenant(&self, tenant_id: Uuid, policy_id: Uuid) -> Result<(), AppError> {
        match self.policies.get(&policy_id) {
            Some(p) if p.tenant_id == tenant_id => Ok(()),
            _ => Err(AppError::NotFound(anyhow::anyhow!("Policy not found"))),
        }
    }
}

/// Row storage for one tenant entity type inside [`Tables`].
pub trait MemoryEntity: TenantEntity {
    fn rows(tables: &Tables) -> &HashMap<Uuid, Self>;
    fn rows_mut(tables: &mut Tables) -> &mut HashMap<Uuid, Self>;

    /// Unique constraints beyond the primary key.
    fn check_unique(&self, _tables: &Tables) -> Result<(), AppError> {
        Ok(())
    }
}

impl MemoryEntity for TenantInvitation {
    fn rows(tables: &Tables) -> &HashMap<Uuid, Self> {
        &tables.invitations
    }

    fn rows_mut(tables: &mut Tables) -> &mut HashMap<Uuid, Self> {
        &mut tables.invitations
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), AppError> {
        match tables.find_invitation_by_token_hash(&self.token_hash) {
            Some(_) => Err(conflict("Invitation token")),
            None => Ok(()),
        }
    }
}

impl MemoryEntity for TenantJoinLink {
    fn rows(tables: &Tables) -> &HashMap<Uuid, Self> {
        &tables.join_links
    }

    fn rows_mut(tables: &mut Tables) -> &mut HashMap<Uuid, Self> {
        &mut tables.join_links
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), AppError> {
        match tables.find_join_link_by_token_hash(&self.token_hash) {
            Some(_) => Err(conflict("Join link token")),
            None => Ok(()),
        }
    }
}

impl MemoryEntity for Role {
    fn rows(tables: &Tables) -> &HashMap<Uuid, Self> {
        &tables.roles
    }

    fn rows_mut(tables: &mut Tables) -> &mut HashMap<Uuid, Self> {
        &mut tables.roles
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), AppError> {
        let taken = tables.roles.values().any(|r| {
            r.role_id != self.role_id
                && r.tenant_id == self.tenant_id
                && r.role_name == self.role_name
        });
        if taken {
            Err(conflict("Role name"))
        } else {
            Ok(())
        }
    }
}

impl MemoryEntity for Policy {
    fn rows(tables: &Tables) -> &HashMap<Uuid, Self> {
        &tables.policies
    }

    fn rows_mut(tables: &mut Tables) -> &mut HashMap<Uuid, Self> {
        &mut tables.policies
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), AppError> {
        let taken = tables.policies.values().any(|p| {
            p.policy_id != self.policy_id
                && p.tenant_id == self.tenant_id
                && p.policy_name == self.policy_name
        });
        if taken {
            Err(conflict("Policy name"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tenant directly, bypassing the flows.
    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.tables
            .lock()
            .await
            .tenants
            .insert(tenant.tenant_id, tenant);
    }

    pub async fn users(&self) -> Vec<User> {
        self.tables.lock().await.users.values().cloned().collect()
    }

    pub async fn tenants(&self) -> Vec<Tenant> {
        self.tables.lock().await.tenants.values().cloned().collect()
    }

    pub async fn memberships(&self) -> Vec<Membership> {
        self.tables
            .lock()
            .await
            .memberships
            .values()
            .cloned()
            .collect()
    }

    pub async fn invitation(&self, invitation_id: Uuid) -> Option<TenantInvitation> {
        self.tables
            .lock()
            .await
            .invitations
            .get(&invitation_id)
            .cloned()
    }
}

#[async_trait]
impl<E: MemoryEntity> EntityTable<E> for MemoryStore {
    async fn select(
        &self,
        filter: &TenantFilter,
        id: Option<Uuid>,
        page: Option<Page>,
    ) -> Result<Vec<E>, AppError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<E> = E::rows(&tables)
            .values()
            .filter(|e| filter.admits(*e))
            .filter(|e| id.map_or(true, |id| e.id() == id))
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.created_utc(), e.id()));

        Ok(match page {
            Some(page) => rows
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect(),
            None => rows,
        })
    }

    async fn insert(&self, entity: &E) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        if E::rows(&tables).contains_key(&entity.id()) {
            return Err(conflict(E::KIND));
        }
        entity.check_unique(&tables)?;
        E::rows_mut(&mut tables).insert(entity.id(), entity.clone());
        Ok(())
    }

    async fn update(&self, filter: &TenantFilter, entity: &E) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match E::rows(&tables).get(&entity.id()) {
            Some(existing) if filter.admits(existing) => {}
            _ => return Ok(false),
        }
        E::rows_mut(&mut tables).insert(entity.id(), entity.clone());
        Ok(true)
    }

    async fn delete(&self, filter: &TenantFilter, id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match E::rows(&tables).get(&id) {
            Some(existing) if filter.admits(existing) => {}
            _ => return Ok(false),
        }
        E::rows_mut(&mut tables).remove(&id);
        Ok(true)
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn find_user_id_by_subject(
        &self,
        realm: &str,
        external_subject_id: &str,
    ) -> Result<Option<Uuid>, AppError> {
        let key = (realm.to_string(), external_subject_id.to_string());
        Ok(self
            .tables
            .lock()
            .await
            .identities
            .get(&key)
            .map(|i| i.user_id))
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        Ok(self.tables.lock().await.tenants.get(&tenant_id).cloned())
    }

    async fn find_tenant_by_realm(&self, realm: &str) -> Result<Option<Tenant>, AppError> {
        Ok(self.tables.lock().await.find_tenant_by_realm(realm))
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        Ok(self.tables.lock().await.find_membership(user_id, tenant_id))
    }

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantInvitation>, AppError> {
        Ok(self.tables.lock().await.find_invitation_by_token_hash(token_hash))
    }

    async fn find_pending_invitations_for_email(
        &self,
        email: &str,
    ) -> Result<Vec<TenantInvitation>, AppError> {
        let tables = self.tables.lock().await;
        let mut found: Vec<TenantInvitation> =
            tables.pending_invitations_for_email(email).cloned().collect();
        found.sort_by_key(|i| i.created_utc);
        Ok(found)
    }

    async fn find_join_link_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantJoinLink>, AppError> {
        Ok(self.tables.lock().await.find_join_link_by_token_hash(token_hash))
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn upsert_user(
        &mut self,
        user: &User,
        realm: &str,
        external_subject_id: &str,
    ) -> Result<Uuid, AppError> {
        Ok(self.working.upsert_user(user, realm, external_subject_id))
    }

    async fn find_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        Ok(self.working.tenants.get(&tenant_id).cloned())
    }

    async fn find_tenant_by_realm(&mut self, realm: &str) -> Result<Option<Tenant>, AppError> {
        Ok(self.working.find_tenant_by_realm(realm))
    }

    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError> {
        if self.working.tenants.contains_key(&tenant.tenant_id) {
            return Err(conflict("Tenant"));
        }
        let realm_taken = tenant
            .realm
            .as_deref()
            .is_some_and(|realm| self.working.find_tenant_by_realm(realm).is_some());
        if realm_taken {
            return Err(conflict("Tenant realm"));
        }
        self.working.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok(())
    }

    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError> {
        match self.working.tenants.get_mut(&tenant.tenant_id) {
            Some(row) => {
                *row = tenant.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!("Tenant not found"))),
        }
    }

    async fn lock_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        // The unit already holds the whole store.
        Ok(self.working.tenants.get(&tenant_id).cloned())
    }

    async fn list_memberships_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<MembershipSummary>, AppError> {
        let mut rows: Vec<(&Membership, &Tenant)> = self
            .working
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                self.working
                    .tenants
                    .get(&m.tenant_id)
                    .filter(|t| t.is_active())
                    .map(|t| (m, t))
            })
            .collect();
        rows.sort_by_key(|(m, _)| m.joined_utc);

        Ok(rows
            .into_iter()
            .map(|(m, t)| MembershipSummary {
                tenant_id: t.tenant_id,
                tenant_name: t.tenant_name.clone(),
                is_admin: m.is_admin,
            })
            .collect())
    }

    async fn count_memberships(&mut self, tenant_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .working
            .memberships
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .count() as i64)
    }

    async fn find_membership(
        &mut self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        Ok(self.working.find_membership(user_id, tenant_id))
    }

    async fn insert_membership(&mut self, membership: &Membership) -> Result<(), AppError> {
        if self
            .working
            .find_membership(membership.user_id, membership.tenant_id)
            .is_some()
        {
            return Err(conflict("Membership"));
        }
        self.working
            .memberships
            .insert(membership.membership_id, membership.clone());
        Ok(())
    }

    async fn find_invitation_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<TenantInvitation>, AppError> {
        Ok(self.working.find_invitation_by_token_hash(token_hash))
    }

    async fn find_pending_invitation_for_email(
        &mut self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<TenantInvitation>, AppError> {
        Ok(self
            .working
            .pending_invitations_for_email(email)
            .filter(|i| i.tenant_id == tenant_id)
            .max_by_key(|i| i.created_utc)
            .cloned())
    }

    async fn mark_invitation_accepted(
        &mut self,
        invitation_id: Uuid,
        user_id: Uuid,
        accepted_utc: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        Ok(self
            .working
            .invitations
            .get_mut(&invitation_id)
            .is_some_and(|i| i.accept(user_id, accepted_utc)))
    }

    async fn find_join_link_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<TenantJoinLink>, AppError> {
        Ok(self.working.find_join_link_by_token_hash(token_hash))
    }

    async fn find_role(&mut self, tenant_id: Uuid, role_id: Uuid) -> Result<Option<Role>, AppError> {
        Ok(self
            .working
            .roles
            .get(&role_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_role_by_name(
        &mut self,
        tenant_id: Uuid,
        role_name: &str,
    ) -> Result<Option<Role>, AppError> {
        Ok(self
            .working
            .roles
            .values()
            .find(|r| r.tenant_id == tenant_id && r.role_name == role_name)
            .cloned())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn permissions_for_roles(
        &self,
        tenant_id: Uuid,
        role_names: &[String],
    ) -> Result<BTreeSet<String>, AppError> {
        let tables = self.tables.lock().await;
        let role_ids: BTreeSet<Uuid> = tables
            .roles
            .values()
            .filter(|r| r.tenant_id == tenant_id && role_names.contains(&r.role_name))
            .map(|r| r.role_id)
            .collect();
        let policy_ids: BTreeSet<Uuid> = tables
            .role_policies
            .iter()
            .filter(|(role_id, _)| role_ids.contains(role_id))
            .map(|(_, policy_id)| *policy_id)
            .collect();

        Ok(tables
            .policy_permissions
            .iter()
            .filter(|(policy_id, _)| policy_ids.contains(policy_id))
            .filter_map(|(_, permission_id)| tables.permissions.get(permission_id))
            .map(|p| p.permission_name.clone())
            .collect())
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        if tables
            .permissions
            .values()
            .any(|p| p.permission_name == permission.permission_name)
        {
            return Err(conflict("Permission"));
        }
        tables
            .permissions
            .insert(permission.permission_id, permission.clone());
        Ok(())
    }

    async fn find_permission(&self, permission_id: Uuid) -> Result<Option<Permission>, AppError> {
        Ok(self.tables.lock().await.permissions.get(&permission_id).cloned())
    }

    async fn attach_policy(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        tables.role_in_tenant(tenant_id, role_id)?;
        tables.policy_in_tenant(tenant_id, policy_id)?;
        Ok(tables.role_policies.insert((role_id, policy_id)))
    }

    async fn detach_policy(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        tables.role_in_tenant(tenant_id, role_id)?;
        tables.policy_in_tenant(tenant_id, policy_id)?;
        Ok(tables.role_policies.remove(&(role_id, policy_id)))
    }

    async fn grant_permission(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        tables.policy_in_tenant(tenant_id, policy_id)?;
        if !tables.permissions.contains_key(&permission_id) {
            return Err(AppError::NotFound(anyhow::anyhow!("Permission not found")));
        }
        Ok(tables.policy_permissions.insert((policy_id, permission_id)))
    }

    async fn revoke_permission(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        tables.policy_in_tenant(tenant_id, policy_id)?;
        Ok(tables.policy_permissions.remove(&(policy_id, permission_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: Uuid, email: &str) -> User {
        User::new(
            id,
            Some(email.to_string()),
            true,
            Some("Bob".to_string()),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_upsert_user_is_idempotent() {
        // Arrange
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        // Act
        for _ in 0..3 {
            let mut uow = store.begin().await.unwrap();
            let owner = uow
                .upsert_user(&user(user_id, "bob@x.com"), "groundup", "sub-1")
                .await
                .unwrap();
            assert_eq!(owner, user_id);
            uow.commit().await.unwrap();
        }

        // Assert
        assert_eq!(store.users().await.len(), 1);
        assert_eq!(
            store.find_user_id_by_subject("groundup", "sub-1").await.unwrap(),
            Some(user_id)
        );
    }

    #[tokio::test]
    async fn test_upsert_with_new_candidate_returns_existing_owner() {
        let store = MemoryStore::new();
        let first = Uuid::new_v4();
        let mut uow = store.begin().await.unwrap();
        uow.upsert_user(&user(first, "bob@x.com"), "groundup", "sub-1")
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let owner = uow
            .upsert_user(&user(Uuid::new_v4(), "bob@x.com"), "groundup", "sub-1")
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(owner, first);
        assert_eq!(store.users().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_discards_writes() {
        // Arrange
        let store = MemoryStore::new();
        let tenant = Tenant::new_standard("Acme".to_string());

        // Act
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_tenant(&tenant).await.unwrap();
        }
        let mut uow = store.begin().await.unwrap();
        uow.insert_tenant(&Tenant::new_standard("Other".to_string()))
            .await
            .unwrap();
        uow.rollback().await.unwrap();

        // Assert
        assert!(store.tenants().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_membership_is_conflict() {
        let store = MemoryStore::new();
        let membership = Membership::new(Uuid::new_v4(), Uuid::new_v4(), false, None);
        let mut uow = store.begin().await.unwrap();
        uow.insert_membership(&membership).await.unwrap();

        let duplicate = Membership::new(membership.user_id, membership.tenant_id, true, None);
        let result = uow.insert_membership(&duplicate).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_mapping_requires_same_tenant() {
        let store = MemoryStore::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let role = Role::new(tenant_a, "Member".to_string(), None);
        let policy = Policy::new(tenant_b, "Billing".to_string());
        EntityTable::<Role>::insert(&store, &role).await.unwrap();
        EntityTable::<Policy>::insert(&store, &policy).await.unwrap();

        let result = store.attach_policy(tenant_a, role.role_id, policy.policy_id).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
