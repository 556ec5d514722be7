//! Role repository (角色数据访问)

use async_trait::async_trait;

use super::{
    postgres::{foreign_key_violation, unique_violation, PgTx},
    RoleStore,
};
use crate::{
    error::AppError,
    models::{role::Role, user::User},
};

#[async_trait]
impl RoleStore for PgTx {
    /// 创建角色
    async fn insert_role(
        &mut self,
        name: &str,
        description: Option<&str>,
        is_administrator: bool,
        is_system: bool,
    ) -> Result<Role, AppError> {
        let role = sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (name, description, is_administrator, is_system)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(is_administrator)
        .bind(is_system)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| unique_violation(e, || format!("role {} already exists", name)))?;

        Ok(role)
    }

    /// 根据 ID 查找角色
    async fn find_role(&mut self, id: i64) -> Result<Option<Role>, AppError> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(role)
    }

    /// 根据名称查找角色
    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<Role>, AppError> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(role)
    }

    /// 列出所有角色
    async fn list_roles(&mut self) -> Result<Vec<Role>, AppError> {
        let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(roles)
    }

    /// 删除角色（user_roles / role_permissions 级联删除）
    async fn delete_role(&mut self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== User Roles ====================

    /// 获取用户的所有角色
    async fn user_roles(&mut self, user_id: i64) -> Result<Vec<Role>, AppError> {
        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT r.*
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(roles)
    }

    async fn role_holders(&mut self, role_id: i64) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT u.*
            FROM users u
            JOIN user_roles ur ON ur.user_id = u.id
            WHERE ur.role_id = $1
            ORDER BY u.id
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(users)
    }

    /// 为用户分配角色
    async fn assign_role(&mut self, user_id: i64, role_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&mut *self.tx)
        .await
        .map_err(foreign_key_violation)?;

        Ok(result.rows_affected() > 0)
    }

    /// 移除用户角色
    async fn remove_role(&mut self, user_id: i64, role_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
