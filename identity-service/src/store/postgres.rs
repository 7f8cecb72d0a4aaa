//! PostgreSQL store.
//!
//! Unique-constraint violations surface as `AppError::Conflict`; every other
//! driver failure is an `AppError::DatabaseError`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::scoped::{EntityTable, Page, TenantEntity, TenantFilter};
use super::{IdentityStore, PermissionStore, UnitOfWork};
use crate::models::{
    InvitationStatus, Membership, MembershipSummary, Permission, Policy, Role, Tenant,
    TenantInvitation, TenantJoinLink, User,
};

fn db_err(e: sqlx::Error) -> AppError {
    let unique = matches!(&e, sqlx::Error::Database(d) if d.is_unique_violation());
    if unique {
        AppError::Conflict(anyhow::anyhow!(e))
    } else {
        AppError::DatabaseError(anyhow::anyhow!(e))
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_owned(
        &self,
        table: &str,
        id_column: &str,
        id: Uuid,
        tenant_id: Uuid,
        kind: &str,
    ) -> Result<(), AppError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1 AND tenant_id = $2)",
            table, id_column
        );
        let owned: bool = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        if owned {
            Ok(())
        } else {
            Err(AppError::NotFound(anyhow::anyhow!("{} not found", kind)))
        }
    }
}

/// Column mapping for a tenant entity stored in its own table.
pub trait PgEntity: TenantEntity + for<'r> FromRow<'r, PgRow> + Unpin {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str;
    const CREATED_COLUMN: &'static str;

    /// Push `(columns) VALUES (binds)`.
    fn push_insert(&self, qb: &mut QueryBuilder<'static, Postgres>);

    /// Push `column = bind, ...` for the mutable columns.
    fn push_assignments(&self, qb: &mut QueryBuilder<'static, Postgres>);
}

impl PgEntity for TenantInvitation {
    const TABLE: &'static str = "tenant_invitations";
    const ID_COLUMN: &'static str = "invitation_id";
    const CREATED_COLUMN: &'static str = "created_utc";

    fn push_insert(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(
            " (invitation_id, tenant_id, email, token_hash, status_code, is_admin, expiry_utc, \
             created_by_user_id, accepted_by_user_id, accepted_utc, created_utc) VALUES (",
        );
        let mut values = qb.separated(", ");
        values.push_bind(self.invitation_id);
        values.push_bind(self.tenant_id);
        values.push_bind(self.email.clone());
        values.push_bind(self.token_hash.clone());
        values.push_bind(self.status_code.clone());
        values.push_bind(self.is_admin);
        values.push_bind(self.expiry_utc);
        values.push_bind(self.created_by_user_id);
        values.push_bind(self.accepted_by_user_id);
        values.push_bind(self.accepted_utc);
        values.push_bind(self.created_utc);
        values.push_unseparated(")");
    }

    fn push_assignments(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        let mut set = qb.separated(", ");
        set.push("email = ").push_bind_unseparated(self.email.clone());
        set.push("is_admin = ").push_bind_unseparated(self.is_admin);
        set.push("expiry_utc = ").push_bind_unseparated(self.expiry_utc);
    }
}

impl PgEntity for TenantJoinLink {
    const TABLE: &'static str = "tenant_join_links";
    const ID_COLUMN: &'static str = "join_link_id";
    const CREATED_COLUMN: &'static str = "created_utc";

    fn push_insert(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(
            " (join_link_id, tenant_id, token_hash, expiry_utc, revoked_flag, default_role_id, \
             created_by_user_id, created_utc) VALUES (",
        );
        let mut values = qb.separated(", ");
        values.push_bind(self.join_link_id);
        values.push_bind(self.tenant_id);
        values.push_bind(self.token_hash.clone());
        values.push_bind(self.expiry_utc);
        values.push_bind(self.revoked_flag);
        values.push_bind(self.default_role_id);
        values.push_bind(self.created_by_user_id);
        values.push_bind(self.created_utc);
        values.push_unseparated(")");
    }

    fn push_assignments(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        let mut set = qb.separated(", ");
        set.push("expiry_utc = ").push_bind_unseparated(self.expiry_utc);
        set.push("revoked_flag = ").push_bind_unseparated(self.revoked_flag);
        set.push("default_role_id = ")
            .push_bind_unseparated(self.default_role_id);
    }
}

impl PgEntity for Role {
    const TABLE: &'static str = "roles";
    const ID_COLUMN: &'static str = "role_id";
    const CREATED_COLUMN: &'static str = "created_utc";

    fn push_insert(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" (role_id, tenant_id, role_name, description, created_utc) VALUES (");
        let mut values = qb.separated(", ");
        values.push_bind(self.role_id);
        values.push_bind(self.tenant_id);
        values.push_bind(self.role_name.clone());
        values.push_bind(self.description.clone());
        values.push_bind(self.created_utc);
        values.push_unseparated(")");
    }

    fn push_assignments(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        let mut set = qb.separated(", ");
        set.push("role_name = ").push_bind_unseparated(self.role_name.clone());
        set.push("description = ")
            .push_bind_unseparated(self.description.clone());
    }
}

impl PgEntity for Policy {
    const TABLE: &'static str = "policies";
    const ID_COLUMN: &'static str = "policy_id";
    const CREATED_COLUMN: &'static str = "created_utc";

    fn push_insert(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" (policy_id, tenant_id, policy_name, created_utc) VALUES (");
        let mut values = qb.separated(", ");
        values.push_bind(self.policy_id);
        values.push_bind(self.tenant_id);
        values.push_bind(self.policy_name.clone());
        values.push_bind(self.created_utc);
        values.push_unseparated(")");
    }

    fn push_assignments(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push("policy_name = ")
            .push_bind(self.policy_name.clone());
    }
}

#[async_trait]
impl<E: PgEntity> EntityTable<E> for PgStore {
    async fn select(
        &self,
        filter: &TenantFilter,
        id: Option<Uuid>,
        page: Option<Page>,
    ) -> Result<Vec<E>, AppError> {
        let mut qb = QueryBuilder::<'static, Postgres>::new("SELECT * FROM ");
        qb.push(E::TABLE)
            .push(" WHERE tenant_id = ")
            .push_bind(filter.tenant_id());
        if let Some(id) = id {
            qb.push(" AND ").push(E::ID_COLUMN).push(" = ").push_bind(id);
        }
        qb.push(" ORDER BY ")
            .push(E::CREATED_COLUMN)
            .push(", ")
            .push(E::ID_COLUMN);
        if let Some(page) = page {
            qb.push(" LIMIT ")
                .push_bind(page.limit)
                .push(" OFFSET ")
                .push_bind(page.offset);
        }

        qb.build_query_as::<E>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert(&self, entity: &E) -> Result<(), AppError> {
        let mut qb = QueryBuilder::<'static, Postgres>::new("INSERT INTO ");
        qb.push(E::TABLE);
        entity.push_insert(&mut qb);

        qb.build().execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn update(&self, filter: &TenantFilter, entity: &E) -> Result<bool, AppError> {
        let mut qb = QueryBuilder::<'static, Postgres>::new("UPDATE ");
        qb.push(E::TABLE).push(" SET ");
        entity.push_assignments(&mut qb);
        qb.push(" WHERE ")
            .push(E::ID_COLUMN)
            .push(" = ")
            .push_bind(entity.id())
            .push(" AND tenant_id = ")
            .push_bind(filter.tenant_id());

        let result = qb.build().execute(&self.pool).await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, filter: &TenantFilter, id: Uuid) -> Result<bool, AppError> {
        let mut qb = QueryBuilder::<'static, Postgres>::new("DELETE FROM ");
        qb.push(E::TABLE)
            .push(" WHERE ")
            .push(E::ID_COLUMN)
            .push(" = ")
            .push_bind(id)
            .push(" AND tenant_id = ")
            .push_bind(filter.tenant_id());

        let result = qb.build().execute(&self.pool).await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    #[tracing::instrument(skip(self))]
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_user_id_by_subject(
        &self,
        realm: &str,
        external_subject_id: &str,
    ) -> Result<Option<Uuid>, AppError> {
        sqlx::query_scalar(
            "SELECT user_id FROM user_identities WHERE realm = $1 AND external_subject_id = $2",
        )
        .bind(realm)
        .bind(external_subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_tenant_by_realm(&self, realm: &str) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE realm = $1")
            .bind(realm)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE user_id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantInvitation>, AppError> {
        sqlx::query_as::<_, TenantInvitation>(
            "SELECT * FROM tenant_invitations WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_pending_invitations_for_email(
        &self,
        email: &str,
    ) -> Result<Vec<TenantInvitation>, AppError> {
        sqlx::query_as::<_, TenantInvitation>(
            r#"
            SELECT * FROM tenant_invitations
            WHERE LOWER(email) = LOWER($1) AND status_code = $2 AND expiry_utc > now()
            ORDER BY created_utc
            "#,
        )
        .bind(email.trim())
        .bind(InvitationStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_join_link_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantJoinLink>, AppError> {
        sqlx::query_as::<_, TenantJoinLink>("SELECT * FROM tenant_join_links WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn upsert_user(
        &mut self,
        user: &User,
        realm: &str,
        external_subject_id: &str,
    ) -> Result<Uuid, AppError> {
        let owner: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM user_identities
            WHERE realm = $1 AND external_subject_id = $2
            FOR UPDATE
            "#,
        )
        .bind(realm)
        .bind(external_subject_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if let Some(owner) = owner {
            sqlx::query(
                r#"
                UPDATE users SET
                    email = COALESCE($2, email),
                    email_verified = $3,
                    given_name = COALESCE($4, given_name),
                    family_name = COALESCE($5, family_name),
                    display_name = COALESCE($6, display_name),
                    updated_utc = now()
                WHERE user_id = $1
                "#,
            )
            .bind(owner)
            .bind(&user.email)
            .bind(user.email_verified)
            .bind(&user.given_name)
            .bind(&user.family_name)
            .bind(&user.display_name)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
            return Ok(owner);
        }

        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, email_verified, given_name, family_name, display_name, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, users.email),
                email_verified = EXCLUDED.email_verified,
                updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.given_name)
        .bind(&user.family_name)
        .bind(&user.display_name)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO user_identities (realm, external_subject_id, user_id, created_utc)
            VALUES ($1, $2, $3, now())
            "#,
        )
        .bind(realm)
        .bind(external_subject_id)
        .bind(user.user_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(user.user_id)
    }

    async fn find_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn find_tenant_by_realm(&mut self, realm: &str) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE realm = $1")
            .bind(realm)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, tenant_name, tenant_type_code, parent_tenant_id, active_flag,
                                 realm, custom_domain, sso_auto_join_domains, sso_default_role_id,
                                 invitation_mode_code, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_name)
        .bind(&tenant.tenant_type_code)
        .bind(tenant.parent_tenant_id)
        .bind(tenant.active_flag)
        .bind(&tenant.realm)
        .bind(&tenant.custom_domain)
        .bind(&tenant.sso_auto_join_domains)
        .bind(tenant.sso_default_role_id)
        .bind(&tenant.invitation_mode_code)
        .bind(tenant.created_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE tenants SET
                tenant_name = $2,
                active_flag = $3,
                custom_domain = $4,
                sso_auto_join_domains = $5,
                sso_default_role_id = $6,
                invitation_mode_code = $7
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_name)
        .bind(tenant.active_flag)
        .bind(&tenant.custom_domain)
        .bind(&tenant.sso_auto_join_domains)
        .bind(tenant.sso_default_role_id)
        .bind(&tenant.invitation_mode_code)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Tenant not found")));
        }
        Ok(())
    }

    async fn lock_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1 FOR UPDATE")
            .bind(tenant_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn list_memberships_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<MembershipSummary>, AppError> {
        sqlx::query_as::<_, MembershipSummary>(
            r#"
            SELECT m.tenant_id, t.tenant_name, m.is_admin
            FROM memberships m
            JOIN tenants t ON t.tenant_id = m.tenant_id
            WHERE m.user_id = $1 AND t.active_flag
            ORDER BY m.joined_utc
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn count_memberships(&mut self, tenant_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM memberships WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn find_membership(
        &mut self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE user_id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn insert_membership(&mut self, membership: &Membership) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO memberships (membership_id, user_id, tenant_id, is_admin, external_user_id, joined_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(membership.membership_id)
        .bind(membership.user_id)
        .bind(membership.tenant_id)
        .bind(membership.is_admin)
        .bind(&membership.external_user_id)
        .bind(membership.joined_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_invitation_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<TenantInvitation>, AppError> {
        sqlx::query_as::<_, TenantInvitation>(
            "SELECT * FROM tenant_invitations WHERE token_hash = $1 FOR UPDATE",
        )
        .bind(token_hash)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn find_pending_invitation_for_email(
        &mut self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<TenantInvitation>, AppError> {
        sqlx::query_as::<_, TenantInvitation>(
            r#"
            SELECT * FROM tenant_invitations
            WHERE tenant_id = $1 AND LOWER(email) = LOWER($2)
              AND status_code = $3 AND expiry_utc > now()
            ORDER BY created_utc DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(email.trim())
        .bind(InvitationStatus::Pending.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn mark_invitation_accepted(
        &mut self,
        invitation_id: Uuid,
        user_id: Uuid,
        accepted_utc: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_invitations
            SET status_code = $2, accepted_by_user_id = $3, accepted_utc = $4
            WHERE invitation_id = $1 AND status_code = $5
            "#,
        )
        .bind(invitation_id)
        .bind(InvitationStatus::Accepted.as_str())
        .bind(user_id)
        .bind(accepted_utc)
        .bind(InvitationStatus::Pending.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_join_link_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<TenantJoinLink>, AppError> {
        sqlx::query_as::<_, TenantJoinLink>("SELECT * FROM tenant_join_links WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn find_role(&mut self, tenant_id: Uuid, role_id: Uuid) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1 AND tenant_id = $2")
            .bind(role_id)
            .bind(tenant_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn find_role_by_name(
        &mut self,
        tenant_id: Uuid,
        role_name: &str,
    ) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE tenant_id = $1 AND role_name = $2")
            .bind(tenant_id)
            .bind(role_name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await.map_err(db_err)
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn permissions_for_roles(
        &self,
        tenant_id: Uuid,
        role_names: &[String],
    ) -> Result<BTreeSet<String>, AppError> {
        if role_names.is_empty() {
            return Ok(BTreeSet::new());
        }

        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT p.permission_name
            FROM roles r
            JOIN role_policies rp ON rp.role_id = r.role_id
            JOIN policy_permissions pp ON pp.policy_id = rp.policy_id
            JOIN permissions p ON p.permission_id = pp.permission_id
            WHERE r.tenant_id = $1 AND r.role_name = ANY($2)
            "#,
        )
        .bind(tenant_id)
        .bind(role_names.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(names.into_iter().collect())
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO permissions (permission_id, permission_name, description) VALUES ($1, $2, $3)",
        )
        .bind(permission.permission_id)
        .bind(&permission.permission_name)
        .bind(&permission.description)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_permission(&self, permission_id: Uuid) -> Result<Option<Permission>, AppError> {
        sqlx::query_as::<_, Permission>("SELECT * FROM permissions WHERE permission_id = $1")
            .bind(permission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn attach_policy(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> Result<bool, AppError> {
        self.ensure_owned("roles", "role_id", role_id, tenant_id, "Role")
            .await?;
        self.ensure_owned("policies", "policy_id", policy_id, tenant_id, "Policy")
            .await?;

        let result = sqlx::query(
            "INSERT INTO role_policies (role_id, policy_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(policy_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn detach_policy(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> Result<bool, AppError> {
        self.ensure_owned("roles", "role_id", role_id, tenant_id, "Role")
            .await?;
        self.ensure_owned("policies", "policy_id", policy_id, tenant_id, "Policy")
            .await?;

        let result = sqlx::query("DELETE FROM role_policies WHERE role_id = $1 AND policy_id = $2")
            .bind(role_id)
            .bind(policy_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn grant_permission(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, AppError> {
        self.ensure_owned("policies", "policy_id", policy_id, tenant_id, "Policy")
            .await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM permissions WHERE permission_id = $1)")
                .bind(permission_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        if !exists {
            return Err(AppError::NotFound(anyhow::anyhow!("Permission not found")));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO policy_permissions (policy_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(policy_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_permission(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, AppError> {
        self.ensure_owned("policies", "policy_id", policy_id, tenant_id, "Policy")
            .await?;

        let result = sqlx::query(
            "DELETE FROM policy_permissions WHERE policy_id = $1 AND permission_id = $2",
        )
        .bind(policy_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}
