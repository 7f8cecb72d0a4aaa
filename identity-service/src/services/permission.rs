//! Role -> policy -> permission expansion with a shared, time-bounded cache.
//!
//! Cache keys embed a generation number read from a single registry key.
//! Bumping the generation invalidates every cached set at once without
//! enumerating the cache's keyspace; old entries simply age out.

use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::metrics::record_permission_cache;
use super::redis::CacheStore;
use super::ServiceError;
use crate::models::Permission;
use crate::store::{PermissionStore, TenantContext};

const GENERATION_KEY: &str = "perms:generation";

/// Permission needed to provision enterprise organizations.
pub const TENANT_CREATE_PERMISSION: &str = "tenants:create";

/// Permission needed to define new permission names.
pub const PERMISSION_MANAGE_PERMISSION: &str = "permissions:manage";

/// Permissions that act across tenants. They are only ever held as direct
/// identity provider role claims, never through a tenant's own mappings.
pub const PLATFORM_PERMISSIONS: &[&str] =
    &[TENANT_CREATE_PERMISSION, PERMISSION_MANAGE_PERMISSION];

pub fn is_platform_permission(permission: &str) -> bool {
    PLATFORM_PERMISSIONS.contains(&permission)
}

pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
    cache: Arc<dyn CacheStore>,
    ttl_seconds: u64,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<dyn CacheStore>, ttl_seconds: u64) -> Self {
        Self {
            store,
            cache,
            ttl_seconds,
        }
    }

    /// Union of the permissions reachable from `roles` within the tenant.
    #[instrument(skip(self, roles), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn effective_permissions(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        roles: &[String],
    ) -> Result<BTreeSet<String>, ServiceError> {
        let key = match self.generation().await {
            Some(generation) => Some(cache_key(generation, ctx, user_id, roles)),
            None => None,
        };

        if let Some(key) = key.as_deref() {
            match self.cache.get_cache(key).await {
                Ok(Some(cached)) => match serde_json::from_str::<BTreeSet<String>>(&cached) {
                    Ok(set) => {
                        record_permission_cache("hit");
                        return Ok(set);
                    }
                    Err(e) => tracing::warn!(error = %e, "Discarding unreadable permission cache entry"),
                },
                Ok(None) => record_permission_cache("miss"),
                Err(e) => {
                    record_permission_cache("error");
                    tracing::warn!(error = %e, "Permission cache read failed, using store");
                }
            }
        }

        let mut permissions = self
            .store
            .permissions_for_roles(ctx.tenant_id(), roles)
            .await?;
        permissions.retain(|p| !is_platform_permission(p));

        if let Some(key) = key.as_deref() {
            let encoded = serde_json::to_string(&permissions)
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
            if let Err(e) = self.cache.set_cache(key, &encoded, self.ttl_seconds).await {
                tracing::warn!(error = %e, "Permission cache write failed");
            }
        }

        Ok(permissions)
    }

    /// True when `permission` is a direct role claim or in the expanded set.
    pub async fn has_permission(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        roles: &[String],
        permission: &str,
    ) -> Result<bool, ServiceError> {
        if roles.iter().any(|r| r == permission) {
            return Ok(true);
        }
        Ok(self
            .effective_permissions(ctx, user_id, roles)
            .await?
            .contains(permission))
    }

    /// True only when `permission` is a direct role claim. Tenant mappings
    /// are never consulted, so a tenant administrator cannot grant it.
    pub fn has_platform_permission(&self, roles: &[String], permission: &str) -> bool {
        is_platform_permission(permission) && roles.iter().any(|r| r == permission)
    }

    pub async fn has_any_permission(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        roles: &[String],
        permissions: &[&str],
    ) -> Result<bool, ServiceError> {
        if permissions.iter().any(|p| roles.iter().any(|r| r == p)) {
            return Ok(true);
        }
        let effective = self.effective_permissions(ctx, user_id, roles).await?;
        Ok(permissions.iter().any(|p| effective.contains(*p)))
    }

    pub async fn define_permission(
        &self,
        permission_name: &str,
        description: Option<String>,
    ) -> Result<Permission, ServiceError> {
        let name = permission_name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation(
                "Permission name must not be empty".to_string(),
            ));
        }

        if is_platform_permission(name) {
            return Err(ServiceError::Validation(format!(
                "{} is a platform permission and comes from the identity provider",
                name
            )));
        }

        let permission = Permission::new(name.to_string(), description);
        self.store
            .insert_permission(&permission)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => {
                    ServiceError::Validation(format!("Permission {} already exists", name))
                }
                other => ServiceError::Store(other),
            })?;
        Ok(permission)
    }

    pub async fn attach_policy(
        &self,
        ctx: &TenantContext,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let changed = self
            .store
            .attach_policy(ctx.tenant_id(), role_id, policy_id)
            .await
            .map_err(not_found)?;
        self.invalidate_all().await;
        Ok(changed)
    }

    pub async fn detach_policy(
        &self,
        ctx: &TenantContext,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let changed = self
            .store
            .detach_policy(ctx.tenant_id(), role_id, policy_id)
            .await
            .map_err(not_found)?;
        self.invalidate_all().await;
        Ok(changed)
    }

    pub async fn grant_permission(
        &self,
        ctx: &TenantContext,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let permission = self
            .store
            .find_permission(permission_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Permission".to_string()))?;
        if is_platform_permission(&permission.permission_name) {
            tracing::warn!(
                tenant_id = %ctx.tenant_id(),
                permission = %permission.permission_name,
                "Refused to grant platform permission through a tenant policy"
            );
            return Err(ServiceError::Validation(format!(
                "{} cannot be granted through a tenant policy",
                permission.permission_name
            )));
        }

        let changed = self
            .store
            .grant_permission(ctx.tenant_id(), policy_id, permission_id)
            .await
            .map_err(not_found)?;
        self.invalidate_all().await;
        Ok(changed)
    }

    pub async fn revoke_permission(
        &self,
        ctx: &TenantContext,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let changed = self
            .store
            .revoke_permission(ctx.tenant_id(), policy_id, permission_id)
            .await
            .map_err(not_found)?;
        self.invalidate_all().await;
        Ok(changed)
    }

    /// Drops every cached permission set.
    pub async fn invalidate_all(&self) {
        match self.cache.incr(GENERATION_KEY).await {
            Ok(generation) => tracing::info!(generation, "Permission cache invalidated"),
            Err(e) => tracing::warn!(
                error = %e,
                "Permission cache invalidation failed, entries expire with their TTL"
            ),
        }
    }

    async fn generation(&self) -> Option<i64> {
        match self.cache.get_cache(GENERATION_KEY).await {
            Ok(value) => Some(value.and_then(|v| v.parse().ok()).unwrap_or(0)),
            Err(e) => {
                record_permission_cache("error");
                tracing::warn!(error = %e, "Permission cache unavailable");
                None
            }
        }
    }
}

fn not_found(e: AppError) -> ServiceError {
    match e {
        AppError::NotFound(e) => ServiceError::NotFound(e.to_string().replace(" not found", "")),
        other => ServiceError::Store(other),
    }
}

fn cache_key(generation: i64, ctx: &TenantContext, user_id: Uuid, roles: &[String]) -> String {
    let mut sorted: Vec<&str> = roles.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(sorted.join("\n").as_bytes());
    let fingerprint = hex::encode(hasher.finalize());

    format!(
        "perms:{}:{}:{}:{}",
        generation,
        ctx.tenant_id(),
        user_id,
        &fingerprint[..16]
    )
}
