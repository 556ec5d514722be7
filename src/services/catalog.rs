//! Permission catalog
//!
//! 每个层级实体对应一组固定的作用域权限，由实体的创建/删除钩子在同一事务内维护。

use tracing::instrument;

use crate::{
    error::AppError,
    models::{
        hierarchy::{Entity, EntityKind, EntityRef},
        permission::{Action, Permission, PermissionRecord, Resource},
    },
    repository::{HierarchyStore, PermissionStore, StoreTx},
};

/// 可在某一层级授予的下级资源动作
const DESCENDANT_ACTIONS: &[(Resource, Action)] = &[
    (Resource::Areas, Action::ViewAny),
    (Resource::Areas, Action::Create),
    (Resource::Sectors, Action::ViewAny),
    (Resource::Sectors, Action::Create),
    (Resource::Assets, Action::ViewAny),
    (Resource::Assets, Action::Create),
    (Resource::Assets, Action::Manage),
    (Resource::Assets, Action::ExecuteRoutines),
    (Resource::Assets, Action::Export),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionCatalog;

impl PermissionCatalog {
    pub fn new() -> Self {
        Self
    }

    /// 实体对应的权限模板
    pub fn permissions_for(entity: EntityRef) -> Vec<Permission> {
        let own = entity.kind.resource();
        let mut permissions: Vec<Permission> = [Action::View, Action::Update, Action::Delete]
            .into_iter()
            .map(|action| Permission::scoped(own, action, entity))
            .collect();

        match entity.kind {
            EntityKind::Asset => {
                permissions.push(Permission::scoped(own, Action::ExecuteRoutines, entity));
                permissions.push(Permission::scoped(own, Action::Export, entity));
            }
            kind => {
                permissions.push(Permission::scoped(Resource::Users, Action::Invite, entity));
                // 只生成严格位于本层级之下的资源
                permissions.extend(
                    DESCENDANT_ACTIONS
                        .iter()
                        .filter(|(resource, _)| {
                            resource.entity_kind().is_some_and(|k| k > kind)
                        })
                        .map(|(resource, action)| Permission::scoped(*resource, *action, entity)),
                );
            }
        }

        permissions
    }

    /// 无作用域的系统权限
    pub fn system_permissions() -> Vec<Permission> {
        vec![
            Permission::system(Action::Create, Resource::Plants),
            Permission::system(Action::Create, Resource::Areas),
            Permission::system(Action::Create, Resource::Sectors),
            Permission::system(Action::Create, Resource::Assets),
            Permission::system(Action::Manage, Resource::Users),
        ]
    }

    /// 生成实体的权限行，重复调用不会产生重复行
    pub async fn create_for_entity(
        &self,
        tx: &mut dyn StoreTx,
        entity: EntityRef,
    ) -> Result<u64, AppError> {
        tx.insert_permissions(&Self::permissions_for(entity)).await
    }

    /// 解除并删除作用域为该实体的全部权限，返回删除行数
    pub async fn delete_for_entity(
        &self,
        tx: &mut dyn StoreTx,
        entity: EntityRef,
    ) -> Result<u64, AppError> {
        if tx.children_count(entity).await? > 0 {
            return Err(AppError::HasChildren(format!(
                "{} still has children; delete them first",
                entity
            )));
        }

        let ids: Vec<i64> = tx
            .permissions_for_scope(entity)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();

        tx.delete_permissions(&ids).await
    }

    /// 实体创建钩子
    #[instrument(skip(self, tx, entity), fields(entity = %entity.entity_ref()))]
    pub async fn on_created(&self, tx: &mut dyn StoreTx, entity: &Entity) -> Result<u64, AppError> {
        let created = self.create_for_entity(tx, entity.entity_ref()).await?;
        tracing::debug!(created, "Permissions generated");
        Ok(created)
    }

    /// 实体删除钩子，须在实体行删除之后调用
    #[instrument(skip(self, tx))]
    pub async fn on_deleted(&self, tx: &mut dyn StoreTx, entity: EntityRef) -> Result<u64, AppError> {
        let purged = self.delete_for_entity(tx, entity).await?;
        tracing::debug!(purged, "Scoped permissions purged");
        Ok(purged)
    }

    /// 作用域实体已不存在的权限行
    pub async fn find_orphans(&self, tx: &mut dyn StoreTx) -> Result<Vec<PermissionRecord>, AppError> {
        let mut orphans = Vec::new();

        for record in tx.list_permissions().await? {
            let Some(scope) = record.scope() else {
                continue;
            };
            if tx.find_entity(scope).await?.is_none() {
                let violation = AppError::OrphanedPermission(record.name.clone());
                tracing::error!(error = %violation, scope = %scope, "Invariant violation");
                orphans.push(record);
            }
        }

        Ok(orphans)
    }
}
