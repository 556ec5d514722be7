//! In-memory store
//!
//! 与 PostgreSQL 实现语义一致：事务持有一把拥有所有权的异步互斥锁，
//! 在工作副本上读写，提交时整体替换。丢弃事务即回滚。
//! 用于测试和嵌入式场景，不包含数据库触发器。

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    AuditSink, HierarchyStore, PermissionStore, RoleStore, Store, StoreTx, UserStore,
};
use crate::{
    error::AppError,
    models::{
        audit::AuditEntry,
        hierarchy::{Entity, EntityKind, EntityRef},
        permission::{Permission, PermissionRecord},
        role::{Role, ADMINISTRATOR_ROLE},
        user::User,
    },
    services::catalog::PermissionCatalog,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    entities: BTreeMap<EntityRef, Entity>,
    users: BTreeMap<i64, User>,
    roles: BTreeMap<i64, Role>,
    permissions: BTreeMap<i64, PermissionRecord>,
    user_roles: BTreeSet<(i64, i64)>,
    user_permissions: BTreeSet<(i64, i64)>,
    role_permissions: BTreeSet<(i64, i64)>,
    sequences: BTreeMap<&'static str, i64>,
}

impl MemoryState {
    fn next_id(&mut self, sequence: &'static str) -> i64 {
        let next = self.sequences.entry(sequence).or_insert(0);
        *next += 1;
        *next
    }

    fn is_administrator(&self, user_id: i64) -> bool {
        self.user_roles
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .any(|(_, rid)| self.roles.get(rid).is_some_and(|r| r.is_administrator))
    }

    fn insert_permission(&mut self, permission: &Permission) -> bool {
        let name = permission.name();
        if self.permissions.values().any(|p| p.name == name) {
            return false;
        }
        let id = self.next_id("permissions");
        let scope = permission.scope();
        self.permissions.insert(
            id,
            PermissionRecord {
                id,
                name,
                scope_type: scope.map(|s| s.kind.as_str().to_string()),
                scope_id: scope.map(|s| s.id),
                created_at: Utc::now(),
            },
        );
        true
    }

    fn permission_names(&self, ids: impl Iterator<Item = i64>) -> Vec<String> {
        let mut names: Vec<String> = ids
            .filter_map(|id| self.permissions.get(&id).map(|p| p.name.clone()))
            .collect();
        names.sort();
        names
    }
}

/// In-memory `Store`, seeded like a freshly migrated database
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut state = MemoryState::default();

        let now = Utc::now();
        let id = state.next_id("roles");
        state.roles.insert(
            id,
            Role {
                id,
                name: ADMINISTRATOR_ROLE.to_string(),
                description: Some("Full administrative rights".to_string()),
                is_administrator: true,
                is_system: true,
                created_at: now,
                updated_at: now,
            },
        );

        for permission in PermissionCatalog::system_permissions() {
            state.insert_permission(&permission);
        }

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

/// 内存事务
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

#[async_trait]
impl HierarchyStore for MemoryTx {
    async fn insert_entity(
        &mut self,
        kind: EntityKind,
        name: &str,
        parent: Option<EntityRef>,
    ) -> Result<Entity, AppError> {
        if parent.map(|p| p.kind) != kind.parent_kind() {
            return Err(AppError::BadRequest(format!("invalid parent for {}", kind)));
        }
        if let Some(parent) = parent {
            if !self.work.entities.contains_key(&parent) {
                return Err(AppError::NotFound);
            }
        }

        let now = Utc::now();
        let entity = Entity {
            id: self.work.next_id(kind.plural()),
            kind,
            name: name.to_string(),
            parent,
            created_at: now,
            updated_at: now,
        };
        self.work.entities.insert(entity.entity_ref(), entity.clone());
        Ok(entity)
    }

    async fn find_entity(&mut self, entity: EntityRef) -> Result<Option<Entity>, AppError> {
        Ok(self.work.entities.get(&entity).cloned())
    }

    async fn list_entities(&mut self, kind: EntityKind) -> Result<Vec<Entity>, AppError> {
        Ok(self
            .work
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect())
    }

    async fn children_count(&mut self, entity: EntityRef) -> Result<i64, AppError> {
        Ok(self
            .work
            .entities
            .values()
            .filter(|e| e.parent == Some(entity))
            .count() as i64)
    }

    async fn delete_entity(&mut self, entity: EntityRef) -> Result<bool, AppError> {
        if self.work.entities.values().any(|e| e.parent == Some(entity)) {
            return Err(AppError::HasChildren(format!("{} still has children", entity)));
        }
        Ok(self.work.entities.remove(&entity).is_some())
    }
}

#[async_trait]
impl UserStore for MemoryTx {
    async fn insert_user(&mut self, name: &str, email: &str) -> Result<User, AppError> {
        if self.work.users.values().any(|u| u.email == email) {
            return Err(AppError::Conflict(format!("email {} is already registered", email)));
        }
        let now = Utc::now();
        let user = User {
            id: self.work.next_id("users"),
            name: name.to_string(),
            email: email.to_string(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.work.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&mut self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn list_users(&mut self, include_deleted: bool) -> Result<Vec<User>, AppError> {
        Ok(self
            .work
            .users
            .values()
            .filter(|u| include_deleted || u.is_active())
            .cloned()
            .collect())
    }

    async fn count_users(&mut self, include_deleted: bool) -> Result<i64, AppError> {
        Ok(self
            .work
            .users
            .values()
            .filter(|u| include_deleted || u.is_active())
            .count() as i64)
    }

    async fn soft_delete_user(&mut self, id: i64) -> Result<bool, AppError> {
        match self.work.users.get_mut(&id) {
            Some(user) if user.is_active() => {
                let now = Utc::now();
                user.deleted_at = Some(now);
                user.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_user(&mut self, id: i64) -> Result<bool, AppError> {
        match self.work.users.get_mut(&id) {
            Some(user) if !user.is_active() => {
                user.deleted_at = None;
                user.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_delete_user(&mut self, id: i64) -> Result<bool, AppError> {
        self.work.user_roles.retain(|(uid, _)| *uid != id);
        self.work.user_permissions.retain(|(uid, _)| *uid != id);
        Ok(self.work.users.remove(&id).is_some())
    }

    async fn administrators(&mut self, include_deleted: bool) -> Result<Vec<User>, AppError> {
        Ok(self
            .work
            .users
            .values()
            .filter(|u| include_deleted || u.is_active())
            .filter(|u| self.work.is_administrator(u.id))
            .cloned()
            .collect())
    }

    async fn lock_administrators(&mut self) -> Result<(), AppError> {
        // 事务本身已独占整个状态
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryTx {
    async fn insert_role(
        &mut self,
        name: &str,
        description: Option<&str>,
        is_administrator: bool,
        is_system: bool,
    ) -> Result<Role, AppError> {
        if self.work.roles.values().any(|r| r.name == name) {
            return Err(AppError::Conflict(format!("role {} already exists", name)));
        }
        let now = Utc::now();
        let role = Role {
            id: self.work.next_id("roles"),
            name: name.to_string(),
            description: description.map(str::to_string),
            is_administrator,
            is_system,
            created_at: now,
            updated_at: now,
        };
        self.work.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn find_role(&mut self, id: i64) -> Result<Option<Role>, AppError> {
        Ok(self.work.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<Role>, AppError> {
        Ok(self.work.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&mut self) -> Result<Vec<Role>, AppError> {
        let mut roles: Vec<Role> = self.work.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn delete_role(&mut self, id: i64) -> Result<bool, AppError> {
        self.work.user_roles.retain(|(_, rid)| *rid != id);
        self.work.role_permissions.retain(|(rid, _)| *rid != id);
        Ok(self.work.roles.remove(&id).is_some())
    }

    async fn user_roles(&mut self, user_id: i64) -> Result<Vec<Role>, AppError> {
        Ok(self
            .work
            .user_roles
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .filter_map(|(_, rid)| self.work.roles.get(rid).cloned())
            .collect())
    }

    async fn role_holders(&mut self, role_id: i64) -> Result<Vec<User>, AppError> {
        Ok(self
            .work
            .user_roles
            .iter()
            .filter(|(_, rid)| *rid == role_id)
            .filter_map(|(uid, _)| self.work.users.get(uid).cloned())
            .collect())
    }

    async fn assign_role(&mut self, user_id: i64, role_id: i64) -> Result<bool, AppError> {
        if !self.work.users.contains_key(&user_id) || !self.work.roles.contains_key(&role_id) {
            return Err(AppError::NotFound);
        }
        Ok(self.work.user_roles.insert((user_id, role_id)))
    }

    async fn remove_role(&mut self, user_id: i64, role_id: i64) -> Result<bool, AppError> {
        Ok(self.work.user_roles.remove(&(user_id, role_id)))
    }
}

#[async_trait]
impl PermissionStore for MemoryTx {
    async fn insert_permissions(&mut self, permissions: &[Permission]) -> Result<u64, AppError> {
        Ok(permissions
            .iter()
            .filter(|p| self.work.insert_permission(p))
            .count() as u64)
    }

    async fn find_permission(&mut self, name: &str) -> Result<Option<PermissionRecord>, AppError> {
        Ok(self.work.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn list_permissions(&mut self) -> Result<Vec<PermissionRecord>, AppError> {
        let mut records: Vec<PermissionRecord> = self.work.permissions.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn permissions_for_scope(
        &mut self,
        scope: EntityRef,
    ) -> Result<Vec<PermissionRecord>, AppError> {
        Ok(self
            .work
            .permissions
            .values()
            .filter(|p| p.scope() == Some(scope))
            .cloned()
            .collect())
    }

    async fn delete_permissions(&mut self, ids: &[i64]) -> Result<u64, AppError> {
        self.work
            .user_permissions
            .retain(|(_, pid)| !ids.contains(pid));
        self.work
            .role_permissions
            .retain(|(_, pid)| !ids.contains(pid));
        Ok(ids
            .iter()
            .filter(|id| self.work.permissions.remove(id).is_some())
            .count() as u64)
    }

    async fn user_permission_names(&mut self, user_id: i64) -> Result<Vec<String>, AppError> {
        let ids = self
            .work
            .user_permissions
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, pid)| *pid);
        Ok(self.work.permission_names(ids))
    }

    async fn role_permission_names(&mut self, role_id: i64) -> Result<Vec<String>, AppError> {
        let ids = self
            .work
            .role_permissions
            .iter()
            .filter(|(rid, _)| *rid == role_id)
            .map(|(_, pid)| *pid);
        Ok(self.work.permission_names(ids))
    }

    async fn grant_to_user(&mut self, user_id: i64, permission_id: i64) -> Result<bool, AppError> {
        if !self.work.users.contains_key(&user_id)
            || !self.work.permissions.contains_key(&permission_id)
        {
            return Err(AppError::NotFound);
        }
        Ok(self.work.user_permissions.insert((user_id, permission_id)))
    }

    async fn revoke_from_user(
        &mut self,
        user_id: i64,
        permission_id: i64,
    ) -> Result<bool, AppError> {
        Ok(self.work.user_permissions.remove(&(user_id, permission_id)))
    }

    async fn grant_to_role(&mut self, role_id: i64, permission_id: i64) -> Result<bool, AppError> {
        if !self.work.roles.contains_key(&role_id)
            || !self.work.permissions.contains_key(&permission_id)
        {
            return Err(AppError::NotFound);
        }
        Ok(self.work.role_permissions.insert((role_id, permission_id)))
    }

    async fn revoke_from_role(
        &mut self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, AppError> {
        Ok(self.work.role_permissions.remove(&(role_id, permission_id)))
    }
}

/// In-memory audit sink
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部记录，按写入顺序
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AppError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>, AppError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_entity(EntityKind::Plant, "North", None).await.unwrap();
            // 未提交即丢弃
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_entities(EntityKind::Plant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_committed_transaction_is_visible() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        let plant = tx.insert_entity(EntityKind::Plant, "North", None).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let found = tx.find_entity(plant.entity_ref()).await.unwrap();
        assert_eq!(found.map(|e| e.name), Some("North".to_string()));
    }

    #[tokio::test]
    async fn test_ancestors_nearest_first() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let plant = tx.insert_entity(EntityKind::Plant, "P", None).await.unwrap();
        let area = tx
            .insert_entity(EntityKind::Area, "A", Some(plant.entity_ref()))
            .await
            .unwrap();
        let sector = tx
            .insert_entity(EntityKind::Sector, "S", Some(area.entity_ref()))
            .await
            .unwrap();
        let asset = tx
            .insert_entity(EntityKind::Asset, "X", Some(sector.entity_ref()))
            .await
            .unwrap();

        let ancestors = tx.ancestors_of(asset.entity_ref()).await.unwrap();
        assert_eq!(
            ancestors,
            vec![sector.entity_ref(), area.entity_ref(), plant.entity_ref()]
        );
        assert!(tx
            .descends_from(asset.entity_ref(), plant.entity_ref())
            .await
            .unwrap());
        assert!(!tx
            .descends_from(plant.entity_ref(), asset.entity_ref())
            .await
            .unwrap());
        assert!(tx.ancestors_of(plant.entity_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_found() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.parent_of(EntityRef::sector(99)).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_wrong_parent_kind_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let plant = tx.insert_entity(EntityKind::Plant, "P", None).await.unwrap();

        let result = tx
            .insert_entity(EntityKind::Sector, "S", Some(plant.entity_ref()))
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_seeded_like_migration() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let admin = tx.find_role_by_name(ADMINISTRATOR_ROLE).await.unwrap().unwrap();
        assert!(admin.is_administrator);
        assert!(admin.is_system);
        assert!(tx.find_permission("system.create-plants").await.unwrap().is_some());
        assert!(tx.find_permission("system.manage-users").await.unwrap().is_some());

        let seeded = tx.list_permissions().await.unwrap();
        let system = PermissionCatalog::system_permissions();
        assert_eq!(seeded.len(), system.len());
        for permission in system {
            assert!(seeded.iter().any(|p| p.name == permission.name()));
        }
    }

    #[tokio::test]
    async fn test_revoke_from_role_unlinks_only_that_role() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let planner = tx.insert_role("Planner", None, false, false).await.unwrap();
        let auditor = tx.insert_role("Auditor", None, false, false).await.unwrap();
        let record = tx.find_permission("system.create-plants").await.unwrap().unwrap();
        tx.grant_to_role(planner.id, record.id).await.unwrap();
        tx.grant_to_role(auditor.id, record.id).await.unwrap();

        assert!(tx.revoke_from_role(planner.id, record.id).await.unwrap());
        assert!(!tx.revoke_from_role(planner.id, record.id).await.unwrap());
        assert!(tx.role_permission_names(planner.id).await.unwrap().is_empty());
        assert_eq!(
            tx.role_permission_names(auditor.id).await.unwrap(),
            vec!["system.create-plants".to_string()]
        );
    }
}
