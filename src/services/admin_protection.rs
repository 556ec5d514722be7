//! 管理员保护服务
//!
//! 保证系统中始终至少有一位有效（未软删除）的管理员。
//! 检查与随后的变更在同一事务内、锁定管理员行之后执行；数据库触发器是最后一道防线。

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use super::audit_service::{AuditAction, AuditService};
use crate::{
    error::AppError,
    models::{
        audit::{Actor, AuditTarget},
        user::User,
    },
    repository::{RoleStore, Store, StoreTx, UserStore},
};

/// 受保护的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedOperation {
    Delete,
    ForceDelete,
    RemoveRole { role_id: i64 },
}

impl ProtectedOperation {
    /// 路径参数形式：delete / force-delete / remove-role
    pub fn parse(operation: &str, role_id: Option<i64>) -> Option<Self> {
        match (operation, role_id) {
            ("delete", _) => Some(ProtectedOperation::Delete),
            ("force-delete", _) => Some(ProtectedOperation::ForceDelete),
            ("remove-role", Some(role_id)) => Some(ProtectedOperation::RemoveRole { role_id }),
            _ => None,
        }
    }
}

/// 操作检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationCheck {
    pub allowed: bool,
    pub message: Option<String>,
}

impl OperationCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    fn denied(message: String) -> Self {
        Self {
            allowed: false,
            message: Some(message),
        }
    }
}

/// 有效管理员集合的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminState {
    /// 两位及以上
    Normal,
    /// 恰好一位
    LastAdminGuarded,
    /// 零位，需要恢复
    Critical,
}

impl AdminState {
    pub fn from_count(active: i64) -> Self {
        match active {
            n if n >= 2 => AdminState::Normal,
            1 => AdminState::LastAdminGuarded,
            _ => AdminState::Critical,
        }
    }
}

pub struct AdminProtectionService {
    store: Arc<dyn Store>,
    audit: Arc<AuditService>,
}

impl AdminProtectionService {
    pub fn new(store: Arc<dyn Store>, audit: Arc<AuditService>) -> Self {
        Self { store, audit }
    }

    /// 用户是否为仅剩的管理员；默认不计入已软删除的管理员
    pub async fn is_last_administrator(
        &self,
        user_id: i64,
        include_soft_deleted: bool,
    ) -> Result<bool, AppError> {
        let mut tx = self.store.begin().await?;
        let administrators = tx.administrators(include_soft_deleted).await?;

        Ok(administrators.len() == 1 && administrators[0].id == user_id)
    }

    pub async fn can_perform_operation(
        &self,
        user_id: i64,
        operation: ProtectedOperation,
    ) -> Result<OperationCheck, AppError> {
        let mut tx = self.store.begin().await?;
        Self::check(tx.as_mut(), user_id, operation).await
    }

    pub async fn active_administrator_count(&self, excluding: Option<i64>) -> Result<i64, AppError> {
        let mut tx = self.store.begin().await?;
        Self::count_active(tx.as_mut(), excluding).await
    }

    /// 所有管理员，包含已软删除的
    pub async fn all_administrators(&self) -> Result<Vec<User>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.administrators(true).await
    }

    pub async fn state(&self) -> Result<AdminState, AppError> {
        Ok(AdminState::from_count(self.active_administrator_count(None).await?))
    }

    pub async fn is_in_critical_state(&self) -> Result<bool, AppError> {
        Ok(self.state().await? == AdminState::Critical)
    }

    /// 零管理员时恢复最近被软删除的管理员
    #[instrument(skip(self))]
    pub async fn attempt_recovery(&self) -> Result<Option<User>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.lock_administrators().await?;

        if Self::count_active(tx.as_mut(), None).await? > 0 {
            tracing::debug!("Active administrators present, nothing to recover");
            return Ok(None);
        }

        let candidate = tx
            .administrators(true)
            .await?
            .into_iter()
            .filter(|u| !u.is_active())
            .max_by_key(|u| u.deleted_at);

        let Some(candidate) = candidate else {
            tracing::error!(
                error = %AppError::CriticalState,
                "No soft-deleted administrator to restore; manual intervention required"
            );
            metrics::counter!("admin.recovery", "outcome" => "failed").increment(1);
            return Ok(None);
        };

        tx.restore_user(candidate.id).await?;
        let restored = tx.find_user(candidate.id).await?.ok_or(AppError::NotFound)?;
        tx.commit().await?;

        tracing::warn!(
            user_id = restored.id,
            name = %restored.name,
            "Critical state: restored most recently deleted administrator"
        );
        metrics::counter!("admin.recovery", "outcome" => "restored").increment(1);

        self.audit
            .record(
                Actor::System,
                AuditAction::AdminRecovery,
                Some(AuditTarget::user(restored.id)),
                json!({ "deleted_at": candidate.deleted_at }),
            )
            .await;

        Ok(Some(restored))
    }

    /// 在调用方事务内检查；调用方需先 `lock_administrators`
    pub async fn guard(
        tx: &mut dyn StoreTx,
        user_id: i64,
        operation: ProtectedOperation,
    ) -> Result<(), AppError> {
        let check = Self::check(tx, user_id, operation).await?;
        if check.allowed {
            return Ok(());
        }

        let message = check.message.unwrap_or_default();
        tracing::warn!(user_id, ?operation, %message, "Protected operation refused");
        metrics::counter!("admin.protection.refused").increment(1);

        Err(AppError::LastAdministrator(message))
    }

    async fn check(
        tx: &mut dyn StoreTx,
        user_id: i64,
        operation: ProtectedOperation,
    ) -> Result<OperationCheck, AppError> {
        let user = tx.find_user(user_id).await?.ok_or(AppError::NotFound)?;
        let roles = tx.user_roles(user_id).await?;

        // 未生效的管理员不计入有效数量，删除或撤销不会改变它
        if !user.is_active() || !roles.iter().any(|r| r.is_administrator) {
            return Ok(OperationCheck::allowed());
        }

        if let ProtectedOperation::RemoveRole { role_id } = operation {
            let role = tx.find_role(role_id).await?.ok_or(AppError::NotFound)?;
            let keeps_admin = roles.iter().any(|r| r.is_administrator && r.id != role_id);
            if !role.is_administrator || keeps_admin {
                return Ok(OperationCheck::allowed());
            }
            if Self::count_active(tx, Some(user_id)).await? == 0 {
                return Ok(OperationCheck::denied(format!(
                    "Cannot remove the \"{}\" role from {} (#{}): they are the last active administrator. \
                     Assign the role to another user before removing it from this one.",
                    role.name, user.name, user.id
                )));
            }
            return Ok(OperationCheck::allowed());
        }

        if Self::count_active(tx, Some(user_id)).await? > 0 {
            return Ok(OperationCheck::allowed());
        }

        let verb = match operation {
            ProtectedOperation::ForceDelete => "permanently delete",
            _ => "delete",
        };
        Ok(OperationCheck::denied(format!(
            "Cannot {} {} (#{}): they are the last active administrator. \
             Assign the Administrator role to another user first.",
            verb, user.name, user.id
        )))
    }

    async fn count_active(tx: &mut dyn StoreTx, excluding: Option<i64>) -> Result<i64, AppError> {
        let administrators = tx.administrators(false).await?;
        Ok(administrators
            .iter()
            .filter(|u| Some(u.id) != excluding)
            .count() as i64)
    }
}
