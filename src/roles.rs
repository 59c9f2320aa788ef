//! Role and permission lookup for a principal.
//!
//! Every call is a fresh read. Callers pick the failure policy explicitly:
//! [`roles_for_authorization`] treats a failed lookup as "no roles", while
//! [`roles_for_display`] degrades to an empty list so a page still renders.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::row_parsers::split_role_names;
use crate::errors::AppResult;

#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// Lower-cased role names held by the principal.
    async fn fetch_roles(&self, principal_id: Uuid) -> AppResult<BTreeSet<String>>;

    /// Permission names granted through any held role.
    async fn fetch_permissions(&self, principal_id: Uuid) -> AppResult<BTreeSet<String>>;
}

/// Reads `user_roles ⋈ roles`, falling back to the profile's comma separated
/// `role` column for accounts that predate role assignments.
#[derive(Debug, Clone)]
pub struct SqlRoleResolver {
    pool: SqlitePool,
}

impl SqlRoleResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleResolver for SqlRoleResolver {
    async fn fetch_roles(&self, principal_id: Uuid) -> AppResult<BTreeSet<String>> {
        let assigned: Vec<String> = sqlx::query_scalar(
            "SELECT r.name FROM user_roles ur JOIN roles r ON r.id = ur.role_id WHERE ur.user_id = ?",
        )
        .bind(principal_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        if !assigned.is_empty() {
            return Ok(assigned
                .iter()
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect());
        }

        let legacy: Option<Option<String>> = sqlx::query_scalar("SELECT role FROM profiles WHERE id = ?")
            .bind(principal_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        // A legacy name counts only while its role still exists.
        let mut existing = BTreeSet::new();
        for name in split_role_names(legacy.flatten().as_deref()) {
            let known: Option<String> = sqlx::query_scalar("SELECT name FROM roles WHERE name = ? COLLATE NOCASE")
                .bind(&name)
                .fetch_optional(&self.pool)
                .await?;
            if known.is_some() {
                existing.insert(name);
            }
        }

        Ok(existing)
    }

    async fn fetch_permissions(&self, principal_id: Uuid) -> AppResult<BTreeSet<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT p.name FROM user_roles ur \
             JOIN role_permissions rp ON rp.role_id = ur.role_id \
             JOIN permissions p ON p.id = rp.permission_id \
             WHERE ur.user_id = ?",
        )
        .bind(principal_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        if !names.is_empty() {
            return Ok(names.into_iter().collect());
        }

        // Accounts known only through the legacy column get the grants of
        // the roles named there.
        let legacy: Option<Option<String>> = sqlx::query_scalar("SELECT role FROM profiles WHERE id = ?")
            .bind(principal_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let role_names = split_role_names(legacy.flatten().as_deref());

        let mut granted = BTreeSet::new();
        for role_name in role_names {
            let names: Vec<String> = sqlx::query_scalar(
                "SELECT p.name FROM roles r \
                 JOIN role_permissions rp ON rp.role_id = r.id \
                 JOIN permissions p ON p.id = rp.permission_id \
                 WHERE r.name = ? COLLATE NOCASE",
            )
            .bind(&role_name)
            .fetch_all(&self.pool)
            .await?;
            granted.extend(names);
        }

        Ok(granted)
    }
}

/// Roles used for an access decision. A failed lookup yields an empty set.
pub async fn roles_for_authorization(resolver: &dyn RoleResolver, principal_id: Uuid) -> BTreeSet<String> {
    match resolver.fetch_roles(principal_id).await {
        Ok(roles) => roles,
        Err(err) => {
            tracing::warn!(user_id = %principal_id, error = %err, "role lookup failed, denying");
            BTreeSet::new()
        }
    }
}

pub async fn permissions_for_authorization(resolver: &dyn RoleResolver, principal_id: Uuid) -> BTreeSet<String> {
    match resolver.fetch_permissions(principal_id).await {
        Ok(permissions) => permissions,
        Err(err) => {
            tracing::warn!(user_id = %principal_id, error = %err, "permission lookup failed, denying");
            BTreeSet::new()
        }
    }
}

/// Roles shown on a page, sorted. A failed lookup yields an empty list.
pub async fn roles_for_display(resolver: &dyn RoleResolver, principal_id: Uuid) -> Vec<String> {
    match resolver.fetch_roles(principal_id).await {
        Ok(roles) => roles.into_iter().collect(),
        Err(err) => {
            tracing::debug!(user_id = %principal_id, error = %err, "role lookup failed for display");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    struct Failing;

    #[async_trait]
    impl RoleResolver for Failing {
        async fn fetch_roles(&self, _: Uuid) -> AppResult<BTreeSet<String>> {
            Err(AppError::Database(sqlx::Error::PoolClosed))
        }

        async fn fetch_permissions(&self, _: Uuid) -> AppResult<BTreeSet<String>> {
            Err(AppError::Database(sqlx::Error::PoolClosed))
        }
    }

    #[tokio::test]
    async fn lookup_failure_is_empty_for_both_policies() {
        let id = Uuid::new_v4();
        assert!(roles_for_authorization(&Failing, id).await.is_empty());
        assert!(permissions_for_authorization(&Failing, id).await.is_empty());
        assert!(roles_for_display(&Failing, id).await.is_empty());
    }
}
