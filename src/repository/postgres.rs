//! PostgreSQL store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{Store, StoreTx};
use crate::error::AppError;

/// PostgreSQL-backed `Store`
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// 一个打开的数据库事务；未提交即丢弃时由 sqlx 回滚
pub struct PgTx {
    pub(super) tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// 唯一约束冲突映射为 Conflict，其余保持数据库错误
pub(super) fn unique_violation(e: sqlx::Error, message: impl FnOnce() -> String) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message()),
        _ => AppError::Database(e),
    }
}

/// 外键约束冲突映射为 NotFound（关联的行不存在）
pub(super) fn foreign_key_violation(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => AppError::NotFound,
        _ => AppError::Database(e),
    }
}
