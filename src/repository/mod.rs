//! Database repository layer
//!
//! 所有读写都在一个事务（`StoreTx`）内完成：提交即生效，丢弃即回滚。
//! PostgreSQL 实现位于各 `*_repo` 模块，内存实现位于 `memory`。

pub mod audit_repo;
pub mod hierarchy_repo;
pub mod memory;
pub mod permission_repo;
pub mod postgres;
pub mod role_repo;
pub mod user_repo;

pub use audit_repo::AuditRepository;
pub use memory::{MemoryAuditSink, MemoryStore};
pub use postgres::{PgStore, PgTx};

use async_trait::async_trait;

use crate::{
    error::AppError,
    models::{
        audit::AuditEntry,
        hierarchy::{Entity, EntityKind, EntityRef, HIERARCHY_DEPTH},
        permission::{Permission, PermissionRecord},
        role::Role,
        user::User,
    },
};

/// 事务工厂
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;
}

/// 一个打开的事务，聚合了全部存储能力
#[async_trait]
pub trait StoreTx: HierarchyStore + UserStore + RoleStore + PermissionStore + Send {
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// Entity hierarchy provider
#[async_trait]
pub trait HierarchyStore: Send {
    async fn insert_entity(
        &mut self,
        kind: EntityKind,
        name: &str,
        parent: Option<EntityRef>,
    ) -> Result<Entity, AppError>;

    async fn find_entity(&mut self, entity: EntityRef) -> Result<Option<Entity>, AppError>;

    async fn list_entities(&mut self, kind: EntityKind) -> Result<Vec<Entity>, AppError>;

    async fn children_count(&mut self, entity: EntityRef) -> Result<i64, AppError>;

    async fn delete_entity(&mut self, entity: EntityRef) -> Result<bool, AppError>;

    /// 父级实体；未知实体返回 NotFound
    async fn parent_of(&mut self, entity: EntityRef) -> Result<Option<EntityRef>, AppError> {
        let found = self.find_entity(entity).await?.ok_or(AppError::NotFound)?;
        Ok(found.parent)
    }

    /// 祖先序列，由近及远
    async fn ancestors_of(&mut self, entity: EntityRef) -> Result<Vec<EntityRef>, AppError> {
        let mut ancestors = Vec::new();
        let mut current = self.parent_of(entity).await?;

        while let Some(parent) = current {
            if ancestors.len() >= HIERARCHY_DEPTH || parent == entity || ancestors.contains(&parent)
            {
                tracing::error!(entity = %entity, "Hierarchy loop detected while walking ancestors");
                return Err(AppError::Internal(format!("hierarchy loop at {}", entity)));
            }
            ancestors.push(parent);
            current = self.parent_of(parent).await?;
        }

        Ok(ancestors)
    }

    /// `entity` 是否位于 `ancestor` 之下（不含自身）
    async fn descends_from(
        &mut self,
        entity: EntityRef,
        ancestor: EntityRef,
    ) -> Result<bool, AppError> {
        if entity.kind <= ancestor.kind {
            return Ok(false);
        }
        Ok(self.ancestors_of(entity).await?.contains(&ancestor))
    }
}

/// User store
#[async_trait]
pub trait UserStore: Send {
    async fn insert_user(&mut self, name: &str, email: &str) -> Result<User, AppError>;

    async fn find_user(&mut self, id: i64) -> Result<Option<User>, AppError>;

    async fn list_users(&mut self, include_deleted: bool) -> Result<Vec<User>, AppError>;

    async fn count_users(&mut self, include_deleted: bool) -> Result<i64, AppError>;

    async fn soft_delete_user(&mut self, id: i64) -> Result<bool, AppError>;

    async fn restore_user(&mut self, id: i64) -> Result<bool, AppError>;

    /// 永久删除，先解除角色与直接权限关联
    async fn force_delete_user(&mut self, id: i64) -> Result<bool, AppError>;

    /// 持有管理员角色的用户，按 ID 排序
    async fn administrators(&mut self, include_deleted: bool) -> Result<Vec<User>, AppError>;

    /// 锁定管理员集合（SELECT ... FOR UPDATE），使计数检查与随后的删除原子化
    async fn lock_administrators(&mut self) -> Result<(), AppError>;
}

/// Role store
#[async_trait]
pub trait RoleStore: Send {
    async fn insert_role(
        &mut self,
        name: &str,
        description: Option<&str>,
        is_administrator: bool,
        is_system: bool,
    ) -> Result<Role, AppError>;

    async fn find_role(&mut self, id: i64) -> Result<Option<Role>, AppError>;

    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<Role>, AppError>;

    async fn list_roles(&mut self) -> Result<Vec<Role>, AppError>;

    async fn delete_role(&mut self, id: i64) -> Result<bool, AppError>;

    async fn user_roles(&mut self, user_id: i64) -> Result<Vec<Role>, AppError>;

    async fn role_holders(&mut self, role_id: i64) -> Result<Vec<User>, AppError>;

    /// 返回是否为新增关联
    async fn assign_role(&mut self, user_id: i64, role_id: i64) -> Result<bool, AppError>;

    async fn remove_role(&mut self, user_id: i64, role_id: i64) -> Result<bool, AppError>;
}

/// Permission catalog and grant links
#[async_trait]
pub trait PermissionStore: Send {
    /// 幂等插入，返回实际新增的行数
    async fn insert_permissions(&mut self, permissions: &[Permission]) -> Result<u64, AppError>;

    async fn find_permission(&mut self, name: &str) -> Result<Option<PermissionRecord>, AppError>;

    async fn list_permissions(&mut self) -> Result<Vec<PermissionRecord>, AppError>;

    async fn permissions_for_scope(
        &mut self,
        scope: EntityRef,
    ) -> Result<Vec<PermissionRecord>, AppError>;

    /// 解除与所有角色和用户的关联后删除
    async fn delete_permissions(&mut self, ids: &[i64]) -> Result<u64, AppError>;

    async fn user_permission_names(&mut self, user_id: i64) -> Result<Vec<String>, AppError>;

    async fn role_permission_names(&mut self, role_id: i64) -> Result<Vec<String>, AppError>;

    async fn grant_to_user(&mut self, user_id: i64, permission_id: i64) -> Result<bool, AppError>;

    async fn revoke_from_user(&mut self, user_id: i64, permission_id: i64)
        -> Result<bool, AppError>;

    async fn grant_to_role(&mut self, role_id: i64, permission_id: i64) -> Result<bool, AppError>;

    async fn revoke_from_role(&mut self, role_id: i64, permission_id: i64)
        -> Result<bool, AppError>;
}

/// Audit sink
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AppError>;

    async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>, AppError>;
}
