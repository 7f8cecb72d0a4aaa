//! Tenant-scoped data access.
//!
//! A [`TenantScopedStore`] is built from two small strategies: a
//! [`TenantFilter`] intersected with every read, update and delete, and a
//! [`StampTenant`] applied to every write. Both can only be obtained from a
//! [`TenantContext`], which callers thread through explicitly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

/// Capability marker for rows owned by exactly one tenant.
pub trait TenantEntity: Clone + Send + Sync + 'static {
    /// Human-readable kind used in not-found messages.
    const KIND: &'static str;

    fn id(&self) -> Uuid;
    fn tenant_id(&self) -> Uuid;
    fn set_tenant_id(&mut self, tenant_id: Uuid);
    fn created_utc(&self) -> DateTime<Utc>;
}

/// The tenant a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn filter(&self) -> TenantFilter {
        TenantFilter {
            tenant_id: self.tenant_id,
        }
    }

    pub fn stamp(&self) -> StampTenant {
        StampTenant {
            tenant_id: self.tenant_id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TenantFilter {
    tenant_id: Uuid,
}

impl TenantFilter {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn admits<E: TenantEntity>(&self, entity: &E) -> bool {
        entity.tenant_id() == self.tenant_id
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StampTenant {
    tenant_id: Uuid,
}

impl StampTenant {
    /// Overwrites whatever tenant id the entity arrived with.
    pub fn apply<E: TenantEntity>(&self, entity: &mut E) {
        entity.set_tenant_id(self.tenant_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 200;

    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset: offset.max(0),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 50)
    }
}

/// Storage primitives behind [`TenantScopedStore`]. Implementations must
/// apply `filter` in the query itself.
#[async_trait]
pub trait EntityTable<E: TenantEntity>: Send + Sync {
    /// Rows of the filter's tenant, oldest first. `id` narrows to one row.
    async fn select(
        &self,
        filter: &TenantFilter,
        id: Option<Uuid>,
        page: Option<Page>,
    ) -> Result<Vec<E>, AppError>;

    async fn insert(&self, entity: &E) -> Result<(), AppError>;

    /// False when no row with that id exists for the filter's tenant.
    async fn update(&self, filter: &TenantFilter, entity: &E) -> Result<bool, AppError>;

    async fn delete(&self, filter: &TenantFilter, id: Uuid) -> Result<bool, AppError>;
}

pub struct TenantScopedStore<E: TenantEntity> {
    table: Arc<dyn EntityTable<E>>,
}

impl<E: TenantEntity> Clone for TenantScopedStore<E> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<E: TenantEntity> TenantScopedStore<E> {
    pub fn new(table: Arc<dyn EntityTable<E>>) -> Self {
        Self { table }
    }

    pub async fn list(&self, ctx: &TenantContext, page: Page) -> Result<Vec<E>, AppError> {
        let filter = ctx.filter();
        let rows = self.table.select(&filter, None, Some(page)).await?;
        Ok(Self::confine(&filter, rows))
    }

    /// Every row of the tenant, for bulk export.
    pub async fn export(&self, ctx: &TenantContext) -> Result<Vec<E>, AppError> {
        let filter = ctx.filter();
        let rows = self.table.select(&filter, None, None).await?;
        Ok(Self::confine(&filter, rows))
    }

    pub async fn find(&self, ctx: &TenantContext, id: Uuid) -> Result<Option<E>, AppError> {
        let filter = ctx.filter();
        let rows = self.table.select(&filter, Some(id), None).await?;
        Ok(Self::confine(&filter, rows)
            .into_iter()
            .find(|e| e.id() == id))
    }

    /// An id owned by another tenant is reported as missing, never as forbidden.
    pub async fn get(&self, ctx: &TenantContext, id: Uuid) -> Result<E, AppError> {
        self.find(ctx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("{} not found", E::KIND)))
    }

    pub async fn create(&self, ctx: &TenantContext, mut entity: E) -> Result<E, AppError> {
        ctx.stamp().apply(&mut entity);
        self.table.insert(&entity).await?;
        Ok(entity)
    }

    pub async fn update(&self, ctx: &TenantContext, mut entity: E) -> Result<E, AppError> {
        ctx.stamp().apply(&mut entity);
        if !self.table.update(&ctx.filter(), &entity).await? {
            return Err(AppError::NotFound(anyhow::anyhow!("{} not found", E::KIND)));
        }
        Ok(entity)
    }

    pub async fn delete(&self, ctx: &TenantContext, id: Uuid) -> Result<(), AppError> {
        if !self.table.delete(&ctx.filter(), id).await? {
            return Err(AppError::NotFound(anyhow::anyhow!("{} not found", E::KIND)));
        }
        Ok(())
    }

    // Rows of other tenants never leave this type, whatever the table returned.
    fn confine(filter: &TenantFilter, rows: Vec<E>) -> Vec<E> {
        let before = rows.len();
        let rows: Vec<E> = rows.into_iter().filter(|e| filter.admits(e)).collect();
        if rows.len() != before {
            tracing::error!(
                kind = E::KIND,
                tenant_id = %filter.tenant_id(),
                dropped = before - rows.len(),
                "Table returned rows outside the tenant filter"
            );
        }
        rows
    }
}
