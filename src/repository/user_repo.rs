//! User repository (用户数据访问)

use async_trait::async_trait;

use super::{postgres::unique_violation, postgres::PgTx, UserStore};
use crate::{error::AppError, models::user::User};

const USER_COLUMNS: &str = "u.id, u.name, u.email, u.deleted_at, u.created_at, u.updated_at";

#[async_trait]
impl UserStore for PgTx {
    /// 创建用户
    async fn insert_user(&mut self, name: &str, email: &str) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(email)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| unique_violation(e, || format!("email {} is already registered", email)))?;

        Ok(user)
    }

    /// 根据 ID 查找用户（包含已软删除的）
    async fn find_user(&mut self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(user)
    }

    async fn list_users(&mut self, include_deleted: bool) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE $1 OR deleted_at IS NULL ORDER BY id",
        )
        .bind(include_deleted)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(users)
    }

    async fn count_users(&mut self, include_deleted: bool) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE $1 OR deleted_at IS NULL")
                .bind(include_deleted)
                .fetch_one(&mut *self.tx)
                .await?;

        Ok(count)
    }

    async fn soft_delete_user(&mut self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn restore_user(&mut self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = NULL, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NOT NULL
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn force_delete_user(&mut self, id: i64) -> Result<bool, AppError> {
        sqlx::query("DELETE FROM user_permissions WHERE user_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn administrators(&mut self, include_deleted: bool) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT DISTINCT {}
            FROM users u
            JOIN user_roles ur ON ur.user_id = u.id
            JOIN roles r ON r.id = ur.role_id
            WHERE r.is_administrator
              AND ($1 OR u.deleted_at IS NULL)
            ORDER BY u.id
            "#,
            USER_COLUMNS
        ))
        .bind(include_deleted)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(users)
    }

    async fn lock_administrators(&mut self) -> Result<(), AppError> {
        // 行锁覆盖所有管理员（含已软删除），并发的删除/撤销在此串行化
        sqlx::query(
            r#"
            SELECT u.id
            FROM users u
            JOIN user_roles ur ON ur.user_id = u.id
            JOIN roles r ON r.id = ur.role_id
            WHERE r.is_administrator
            ORDER BY u.id
            FOR UPDATE OF u
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(())
    }
}
