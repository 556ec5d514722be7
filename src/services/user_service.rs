//! 用户服务
//!
//! 注册（首个用户引导为管理员）、软删除、永久删除、恢复、角色与直接权限的授予和撤销。
//! 删除和撤销角色先锁定管理员集合，再经管理员保护检查，最后变更，全部在同一事务内。

use std::sync::Arc;

use serde_json::json;
use tracing::instrument;
use validator::Validate;

use super::{
    admin_protection::{AdminProtectionService, ProtectedOperation},
    audit_service::{AuditAction, AuditService},
};
use crate::{
    error::AppError,
    models::{
        audit::{Actor, AuditTarget},
        permission::Permission,
        role::ADMINISTRATOR_ROLE,
        user::{CreateUserRequest, User},
    },
    repository::{PermissionStore, RoleStore, Store, StoreTx, UserStore},
};

pub struct UserService {
    store: Arc<dyn Store>,
    audit: Arc<AuditService>,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, audit: Arc<AuditService>) -> Self {
        Self { store, audit }
    }

    /// 注册用户；系统中没有任何用户行（含软删除）时，新用户获得管理员角色
    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn register(&self, actor: Actor, req: CreateUserRequest) -> Result<User, AppError> {
        req.validate()?;

        let mut tx = self.store.begin().await?;

        let bootstrap = tx.count_users(true).await? == 0;
        let user = tx.insert_user(&req.name, &req.email).await?;

        if bootstrap {
            let role = tx
                .find_role_by_name(ADMINISTRATOR_ROLE)
                .await?
                .ok_or_else(|| AppError::Internal("Administrator role is not seeded".to_string()))?;
            tx.assign_role(user.id, role.id).await?;
            tracing::info!(user_id = user.id, "First user bootstrapped as administrator");
        }

        tx.commit().await?;

        self.audit
            .record(
                actor,
                AuditAction::UserCreate,
                Some(AuditTarget::user(user.id)),
                json!({ "email": user.email, "bootstrap": bootstrap }),
            )
            .await;

        Ok(user)
    }

    pub async fn get(&self, user_id: i64) -> Result<User, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_user(user_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn list(&self, include_deleted: bool) -> Result<Vec<User>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.list_users(include_deleted).await
    }

    /// 软删除
    #[instrument(skip(self))]
    pub async fn delete(&self, actor_id: i64, user_id: i64) -> Result<(), AppError> {
        if actor_id == user_id {
            return Err(AppError::SelfDeletion);
        }

        let mut tx = self.store.begin().await?;
        tx.lock_administrators().await?;

        let user = tx.find_user(user_id).await?.ok_or(AppError::NotFound)?;
        if !user.is_active() {
            return Err(AppError::Conflict(format!("{} is already deleted", user.name)));
        }

        AdminProtectionService::guard(tx.as_mut(), user_id, ProtectedOperation::Delete).await?;
        tx.soft_delete_user(user_id).await?;
        tx.commit().await?;

        tracing::info!(user_id, actor_id, "User soft-deleted");

        self.audit
            .record(
                Actor::User(actor_id),
                AuditAction::UserDelete,
                Some(AuditTarget::user(user_id)),
                json!({ "name": user.name }),
            )
            .await;

        Ok(())
    }

    /// 永久删除
    #[instrument(skip(self))]
    pub async fn force_delete(&self, actor_id: i64, user_id: i64) -> Result<(), AppError> {
        if actor_id == user_id {
            return Err(AppError::SelfDeletion);
        }

        let mut tx = self.store.begin().await?;
        tx.lock_administrators().await?;

        let user = tx.find_user(user_id).await?.ok_or(AppError::NotFound)?;

        AdminProtectionService::guard(tx.as_mut(), user_id, ProtectedOperation::ForceDelete)
            .await?;
        tx.force_delete_user(user_id).await?;
        tx.commit().await?;

        tracing::info!(user_id, actor_id, "User permanently deleted");

        self.audit
            .record(
                Actor::User(actor_id),
                AuditAction::UserForceDelete,
                Some(AuditTarget::user(user_id)),
                json!({ "name": user.name, "email": user.email }),
            )
            .await;

        Ok(())
    }

    /// 恢复软删除的用户
    #[instrument(skip(self))]
    pub async fn restore(&self, actor: Actor, user_id: i64) -> Result<User, AppError> {
        let mut tx = self.store.begin().await?;

        let user = tx.find_user(user_id).await?.ok_or(AppError::NotFound)?;
        if user.is_active() {
            return Err(AppError::Conflict(format!("{} is not deleted", user.name)));
        }

        tx.restore_user(user_id).await?;
        let restored = tx.find_user(user_id).await?.ok_or(AppError::NotFound)?;
        tx.commit().await?;

        self.audit
            .record(
                actor,
                AuditAction::UserRestore,
                Some(AuditTarget::user(user_id)),
                json!({}),
            )
            .await;

        Ok(restored)
    }

    #[instrument(skip(self))]
    pub async fn assign_role(&self, actor: Actor, user_id: i64, role_id: i64) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;

        tx.find_user(user_id).await?.ok_or(AppError::NotFound)?;
        let role = tx.find_role(role_id).await?.ok_or(AppError::NotFound)?;

        let assigned = tx.assign_role(user_id, role_id).await?;
        tx.commit().await?;

        if assigned {
            self.audit
                .record(
                    actor,
                    AuditAction::UserRoleAssign,
                    Some(AuditTarget::user(user_id)),
                    json!({ "role_id": role_id, "role": role.name }),
                )
                .await;
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_role(&self, actor: Actor, user_id: i64, role_id: i64) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;
        tx.lock_administrators().await?;

        AdminProtectionService::guard(
            tx.as_mut(),
            user_id,
            ProtectedOperation::RemoveRole { role_id },
        )
        .await?;

        if !tx.remove_role(user_id, role_id).await? {
            return Err(AppError::NotFound);
        }
        tx.commit().await?;

        self.audit
            .record(
                actor,
                AuditAction::UserRoleRemove,
                Some(AuditTarget::user(user_id)),
                json!({ "role_id": role_id }),
            )
            .await;

        Ok(())
    }

    /// 授予目录中已存在的权限
    #[instrument(skip(self))]
    pub async fn grant_permission(&self, actor: Actor, user_id: i64, name: &str) -> Result<(), AppError> {
        let permission = parse_permission(name)?;

        let mut tx = self.store.begin().await?;
        tx.find_user(user_id).await?.ok_or(AppError::NotFound)?;
        let record = tx
            .find_permission(&permission.name())
            .await?
            .ok_or(AppError::NotFound)?;

        let granted = tx.grant_to_user(user_id, record.id).await?;
        tx.commit().await?;

        if granted {
            self.audit
                .record(
                    actor,
                    AuditAction::UserPermissionGrant,
                    Some(AuditTarget::user(user_id)),
                    json!({ "permission": record.name }),
                )
                .await;
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn revoke_permission(&self, actor: Actor, user_id: i64, name: &str) -> Result<(), AppError> {
        let permission = parse_permission(name)?;

        let mut tx = self.store.begin().await?;
        let record = tx
            .find_permission(&permission.name())
            .await?
            .ok_or(AppError::NotFound)?;

        if !tx.revoke_from_user(user_id, record.id).await? {
            return Err(AppError::NotFound);
        }
        tx.commit().await?;

        self.audit
            .record(
                actor,
                AuditAction::UserPermissionRevoke,
                Some(AuditTarget::user(user_id)),
                json!({ "permission": record.name }),
            )
            .await;

        Ok(())
    }

    /// 直接授予的权限名
    pub async fn direct_permissions(&self, user_id: i64) -> Result<Vec<String>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_user(user_id).await?.ok_or(AppError::NotFound)?;
        tx.user_permission_names(user_id).await
    }
}

pub(super) fn parse_permission(name: &str) -> Result<Permission, AppError> {
    name.parse::<Permission>()
        .map_err(|e| AppError::BadRequest(format!("invalid permission {}: {}", name, e)))
}
