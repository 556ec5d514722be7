//! Audit repository (审计数据访问)
//!
//! 审计写入不参与业务事务：业务回滚不影响已写入的审计，反之亦然。

use async_trait::async_trait;
use sqlx::PgPool;

use super::AuditSink;
use crate::{error::AppError, models::audit::AuditEntry};

pub struct AuditRepository {
    db: PgPool,
}

impl AuditRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for AuditRepository {
    /// 插入审计日志
    async fn record(&self, entry: AuditEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, actor_id, actor_type, action, target_type, target_id, metadata, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.actor_type)
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(entry.target_id)
        .bind(&entry.metadata)
        .bind(entry.occurred_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 最近的审计日志，新的在前
    async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>, AppError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT * FROM audit_logs ORDER BY occurred_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }
}
