//! 审计日志服务
//!
//! 写入是 fire-and-forget：失败只记录 warn，不向调用方传播。

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        audit::{Actor, AuditEntry, AuditTarget},
        hierarchy::EntityKind,
    },
    repository::AuditSink,
};

/// 审计操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    // 层级实体
    EntityCreate(EntityKind),
    EntityDelete(EntityKind),

    // 用户相关
    UserCreate,
    UserDelete,
    UserForceDelete,
    UserRestore,
    UserRoleAssign,
    UserRoleRemove,
    UserPermissionGrant,
    UserPermissionRevoke,

    // 角色相关
    RoleCreate,
    RoleDelete,
    RolePermissionGrant,
    RolePermissionRevoke,

    // 管理员保护与权限目录
    AdminRecovery,
    PermissionPurge,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::EntityCreate(EntityKind::Plant) => "plant.create",
            AuditAction::EntityCreate(EntityKind::Area) => "area.create",
            AuditAction::EntityCreate(EntityKind::Sector) => "sector.create",
            AuditAction::EntityCreate(EntityKind::Asset) => "asset.create",
            AuditAction::EntityDelete(EntityKind::Plant) => "plant.delete",
            AuditAction::EntityDelete(EntityKind::Area) => "area.delete",
            AuditAction::EntityDelete(EntityKind::Sector) => "sector.delete",
            AuditAction::EntityDelete(EntityKind::Asset) => "asset.delete",

            AuditAction::UserCreate => "user.create",
            AuditAction::UserDelete => "user.delete",
            AuditAction::UserForceDelete => "user.force_delete",
            AuditAction::UserRestore => "user.restore",
            AuditAction::UserRoleAssign => "user.role.assign",
            AuditAction::UserRoleRemove => "user.role.remove",
            AuditAction::UserPermissionGrant => "user.permission.grant",
            AuditAction::UserPermissionRevoke => "user.permission.revoke",

            AuditAction::RoleCreate => "role.create",
            AuditAction::RoleDelete => "role.delete",
            AuditAction::RolePermissionGrant => "role.permission.grant",
            AuditAction::RolePermissionRevoke => "role.permission.revoke",

            AuditAction::AdminRecovery => "admin.recovery",
            AuditAction::PermissionPurge => "permission.purge",
        }
    }
}

pub struct AuditService {
    sink: Arc<dyn AuditSink>,
    /// 无认证流程使用的操作者 ID
    system_actor_id: i64,
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>, system_actor_id: i64) -> Self {
        Self {
            sink,
            system_actor_id,
        }
    }

    /// 记录审计日志条目
    pub async fn record(
        &self,
        actor: Actor,
        action: AuditAction,
        target: Option<AuditTarget>,
        metadata: Value,
    ) {
        let actor_id = match actor {
            Actor::User(id) => id,
            Actor::System => self.system_actor_id,
        };

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            actor_id,
            actor_type: actor.actor_type().to_string(),
            action: action.as_str().to_string(),
            target_type: target.as_ref().map(|t| t.target_type.clone()),
            target_id: target.as_ref().map(|t| t.id),
            metadata,
            occurred_at: chrono::Utc::now(),
        };

        if let Err(e) = self.sink.record(entry).await {
            tracing::warn!(
                error = %e,
                action = action.as_str(),
                actor_id,
                "Failed to write audit log"
            );
        }
    }

    /// 查询最近的审计日志
    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>, AppError> {
        self.sink.recent(limit.clamp(1, 500)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_action_names() {
        assert_eq!(AuditAction::EntityCreate(EntityKind::Sector).as_str(), "sector.create");
        assert_eq!(AuditAction::EntityDelete(EntityKind::Plant).as_str(), "plant.delete");
        assert_eq!(AuditAction::UserForceDelete.as_str(), "user.force_delete");
        assert_eq!(AuditAction::UserRoleRemove.as_str(), "user.role.remove");
    }
}
