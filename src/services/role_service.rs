//! 角色服务

use std::sync::Arc;

use serde_json::json;
use tracing::instrument;
use validator::Validate;

use super::{
    audit_service::{AuditAction, AuditService},
    user_service::parse_permission,
};
use crate::{
    error::AppError,
    models::{
        audit::{Actor, AuditTarget},
        role::{CreateRoleRequest, Role, RoleSummary},
    },
    repository::{PermissionStore, RoleStore, Store, StoreTx, UserStore},
};

pub struct RoleService {
    store: Arc<dyn Store>,
    audit: Arc<AuditService>,
}

impl RoleService {
    pub fn new(store: Arc<dyn Store>, audit: Arc<AuditService>) -> Self {
        Self { store, audit }
    }

    /// 列出所有角色及其权限
    pub async fn list(&self) -> Result<Vec<RoleSummary>, AppError> {
        let mut tx = self.store.begin().await?;

        let mut summaries = Vec::new();
        for role in tx.list_roles().await? {
            let permissions = tx.role_permission_names(role.id).await?;
            summaries.push(RoleSummary { role, permissions });
        }

        Ok(summaries)
    }

    pub async fn get(&self, role_id: i64) -> Result<RoleSummary, AppError> {
        let mut tx = self.store.begin().await?;
        let role = tx.find_role(role_id).await?.ok_or(AppError::NotFound)?;
        let permissions = tx.role_permission_names(role.id).await?;
        Ok(RoleSummary { role, permissions })
    }

    /// 创建角色（非系统角色）
    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create(&self, actor: Actor, req: CreateRoleRequest) -> Result<Role, AppError> {
        req.validate()?;

        let mut tx = self.store.begin().await?;
        let role = tx
            .insert_role(&req.name, req.description.as_deref(), req.is_administrator, false)
            .await?;
        tx.commit().await?;

        self.audit
            .record(
                actor,
                AuditAction::RoleCreate,
                Some(AuditTarget::role(role.id)),
                json!({ "name": role.name, "is_administrator": role.is_administrator }),
            )
            .await;

        Ok(role)
    }

    /// 删除角色；系统角色不可删除，删除不能让有效管理员归零
    #[instrument(skip(self))]
    pub async fn delete(&self, actor: Actor, role_id: i64) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;

        let role = tx.find_role(role_id).await?.ok_or(AppError::NotFound)?;
        if role.is_system {
            return Err(AppError::BadRequest(format!(
                "system role \"{}\" cannot be deleted",
                role.name
            )));
        }

        if role.is_administrator {
            tx.lock_administrators().await?;

            let active = tx.administrators(false).await?.len();

            // 仅因该角色而具备管理员身份的有效持有者
            let mut losing = 0;
            for holder in tx.role_holders(role_id).await? {
                if !holder.is_active() {
                    continue;
                }
                let keeps_admin = tx
                    .user_roles(holder.id)
                    .await?
                    .iter()
                    .any(|r| r.is_administrator && r.id != role_id);
                if !keeps_admin {
                    losing += 1;
                }
            }

            let remaining = active.saturating_sub(losing);
            if remaining == 0 {
                return Err(AppError::LastAdministrator(format!(
                    "Cannot delete the \"{}\" role: it is held by the last active administrator. \
                     Assign the Administrator role to another user first.",
                    role.name
                )));
            }
        }

        tx.delete_role(role_id).await?;
        tx.commit().await?;

        self.audit
            .record(
                actor,
                AuditAction::RoleDelete,
                Some(AuditTarget::role(role_id)),
                json!({ "name": role.name }),
            )
            .await;

        Ok(())
    }

    /// 为角色授予目录中已存在的权限
    #[instrument(skip(self))]
    pub async fn grant_permission(&self, actor: Actor, role_id: i64, name: &str) -> Result<(), AppError> {
        let permission = parse_permission(name)?;

        let mut tx = self.store.begin().await?;
        tx.find_role(role_id).await?.ok_or(AppError::NotFound)?;
        let record = tx
            .find_permission(&permission.name())
            .await?
            .ok_or(AppError::NotFound)?;

        let granted = tx.grant_to_role(role_id, record.id).await?;
        tx.commit().await?;

        if granted {
            self.audit
                .record(
                    actor,
                    AuditAction::RolePermissionGrant,
                    Some(AuditTarget::role(role_id)),
                    json!({ "permission": record.name }),
                )
                .await;
        }

        Ok(())
    }

    /// 从角色撤销权限；角色未持有该权限时返回 NotFound
    #[instrument(skip(self))]
    pub async fn revoke_permission(&self, actor: Actor, role_id: i64, name: &str) -> Result<(), AppError> {
        let permission = parse_permission(name)?;

        let mut tx = self.store.begin().await?;
        tx.find_role(role_id).await?.ok_or(AppError::NotFound)?;
        let record = tx
            .find_permission(&permission.name())
            .await?
            .ok_or(AppError::NotFound)?;

        if !tx.revoke_from_role(role_id, record.id).await? {
            return Err(AppError::NotFound);
        }
        tx.commit().await?;

        self.audit
            .record(
                actor,
                AuditAction::RolePermissionRevoke,
                Some(AuditTarget::role(role_id)),
                json!({ "permission": record.name }),
            )
            .await;

        Ok(())
    }
}
