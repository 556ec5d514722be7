//! 层级实体服务
//!
//! 实体的创建与删除和权限目录钩子在同一事务内执行：任何一步失败，整个操作回滚。

use std::sync::Arc;

use serde_json::json;
use tracing::instrument;

use super::{
    audit_service::{AuditAction, AuditService},
    catalog::PermissionCatalog,
};
use crate::{
    error::AppError,
    models::{
        audit::{Actor, AuditTarget},
        hierarchy::{Entity, EntityId, EntityKind, EntityRef},
    },
    repository::{HierarchyStore, Store, StoreTx},
};

pub struct HierarchyService {
    store: Arc<dyn Store>,
    catalog: PermissionCatalog,
    audit: Arc<AuditService>,
}

impl HierarchyService {
    pub fn new(store: Arc<dyn Store>, catalog: PermissionCatalog, audit: Arc<AuditService>) -> Self {
        Self {
            store,
            catalog,
            audit,
        }
    }

    /// 解析父级引用：厂区不能有父级，其余层级必须有
    pub fn parent_ref(kind: EntityKind, parent_id: Option<EntityId>) -> Result<Option<EntityRef>, AppError> {
        match (kind.parent_kind(), parent_id) {
            (None, None) => Ok(None),
            (Some(parent_kind), Some(id)) => Ok(Some(EntityRef::new(parent_kind, id))),
            (None, Some(_)) => Err(AppError::BadRequest(format!("a {} has no parent", kind))),
            (Some(parent_kind), None) => Err(AppError::BadRequest(format!(
                "a {} requires a parent {}",
                kind, parent_kind
            ))),
        }
    }

    /// 创建实体并生成其权限
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        actor: Actor,
        kind: EntityKind,
        name: &str,
        parent: Option<EntityRef>,
    ) -> Result<Entity, AppError> {
        let mut tx = self.store.begin().await?;

        let entity = tx.insert_entity(kind, name, parent).await?;
        let generated = self.catalog.on_created(tx.as_mut(), &entity).await?;

        tx.commit().await?;

        tracing::info!(entity = %entity.entity_ref(), generated, "Entity created");

        self.audit
            .record(
                actor,
                AuditAction::EntityCreate(kind),
                Some(AuditTarget::from(entity.entity_ref())),
                json!({ "name": entity.name, "parent": parent.map(|p| p.to_string()) }),
            )
            .await;

        Ok(entity)
    }

    /// 删除实体并清理其权限；存在子级时拒绝
    #[instrument(skip(self))]
    pub async fn delete(&self, actor: Actor, entity: EntityRef) -> Result<u64, AppError> {
        let mut tx = self.store.begin().await?;

        let found = tx.find_entity(entity).await?.ok_or(AppError::NotFound)?;

        let children = tx.children_count(entity).await?;
        if children > 0 {
            return Err(AppError::HasChildren(format!(
                "{} \"{}\" still has {} child entities",
                entity.kind, found.name, children
            )));
        }

        tx.delete_entity(entity).await?;
        let purged = self.catalog.on_deleted(tx.as_mut(), entity).await?;

        tx.commit().await?;

        tracing::info!(entity = %entity, purged, "Entity deleted");

        self.audit
            .record(
                actor,
                AuditAction::EntityDelete(entity.kind),
                Some(AuditTarget::from(entity)),
                json!({ "name": found.name }),
            )
            .await;

        if purged > 0 {
            self.audit
                .record(
                    actor,
                    AuditAction::PermissionPurge,
                    Some(AuditTarget::from(entity)),
                    json!({ "purged": purged }),
                )
                .await;
        }

        Ok(purged)
    }

    pub async fn get(&self, entity: EntityRef) -> Result<Entity, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_entity(entity).await?.ok_or(AppError::NotFound)
    }

    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.list_entities(kind).await
    }

    /// 祖先序列，由近及远
    pub async fn ancestors(&self, entity: EntityRef) -> Result<Vec<EntityRef>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.ancestors_of(entity).await
    }
}
