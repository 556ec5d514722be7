//! Permission repository (权限目录与授权关联)

use async_trait::async_trait;

use super::{
    postgres::{foreign_key_violation, PgTx},
    PermissionStore,
};
use crate::{
    error::AppError,
    models::{
        hierarchy::EntityRef,
        permission::{Permission, PermissionRecord},
    },
};

#[async_trait]
impl PermissionStore for PgTx {
    /// 已存在的名称跳过
    async fn insert_permissions(&mut self, permissions: &[Permission]) -> Result<u64, AppError> {
        let mut inserted = 0;

        for permission in permissions {
            let scope = permission.scope();
            let result = sqlx::query(
                r#"
                INSERT INTO permissions (name, scope_type, scope_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(permission.name())
            .bind(scope.map(|s| s.kind.as_str()))
            .bind(scope.map(|s| s.id))
            .execute(&mut *self.tx)
            .await?;

            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn find_permission(&mut self, name: &str) -> Result<Option<PermissionRecord>, AppError> {
        let record =
            sqlx::query_as::<_, PermissionRecord>("SELECT * FROM permissions WHERE name = $1")
                .bind(name)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(record)
    }

    async fn list_permissions(&mut self) -> Result<Vec<PermissionRecord>, AppError> {
        let records = sqlx::query_as::<_, PermissionRecord>("SELECT * FROM permissions ORDER BY name")
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(records)
    }

    async fn permissions_for_scope(
        &mut self,
        scope: EntityRef,
    ) -> Result<Vec<PermissionRecord>, AppError> {
        let records = sqlx::query_as::<_, PermissionRecord>(
            "SELECT * FROM permissions WHERE scope_type = $1 AND scope_id = $2 ORDER BY name",
        )
        .bind(scope.kind.as_str())
        .bind(scope.id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(records)
    }

    async fn delete_permissions(&mut self, ids: &[i64]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        sqlx::query("DELETE FROM role_permissions WHERE permission_id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;

        sqlx::query("DELETE FROM user_permissions WHERE permission_id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;

        let result = sqlx::query("DELETE FROM permissions WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    // ==================== Grants ====================

    async fn user_permission_names(&mut self, user_id: i64) -> Result<Vec<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.name
            FROM permissions p
            JOIN user_permissions up ON up.permission_id = p.id
            WHERE up.user_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(names)
    }

    async fn role_permission_names(&mut self, role_id: i64) -> Result<Vec<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.name
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(names)
    }

    async fn grant_to_user(&mut self, user_id: i64, permission_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_permissions (user_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, permission_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(permission_id)
        .execute(&mut *self.tx)
        .await
        .map_err(foreign_key_violation)?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_from_user(
        &mut self,
        user_id: i64,
        permission_id: i64,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM user_permissions WHERE user_id = $1 AND permission_id = $2")
                .bind(user_id)
                .bind(permission_id)
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn grant_to_role(&mut self, role_id: i64, permission_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut *self.tx)
        .await
        .map_err(foreign_key_violation)?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_from_role(
        &mut self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
                .bind(role_id)
                .bind(permission_id)
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
