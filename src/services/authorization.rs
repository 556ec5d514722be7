//! 授权解析服务
//!
//! 输入是预加载的用户授权聚合（角色、角色权限、直接权限），沿层级由近及远查找匹配的授权。
//! 没有显式拒绝：找不到授权即拒绝。解析过程中的任何错误都记录日志并按拒绝处理。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::instrument;

use crate::{
    error::AppError,
    models::{
        hierarchy::{Entity, EntityKind, EntityRef},
        permission::{Action, Permission, Resource},
        user::UserGrants,
    },
    repository::{HierarchyStore, PermissionStore, RoleStore, Store, StoreTx, UserStore},
};

pub struct AuthorizationService {
    store: Arc<dyn Store>,
}

impl AuthorizationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// 加载用户授权聚合；用户不存在时返回 None
    pub async fn load_grants(
        tx: &mut dyn StoreTx,
        user_id: i64,
    ) -> Result<Option<UserGrants>, AppError> {
        let Some(user) = tx.find_user(user_id).await? else {
            return Ok(None);
        };

        let roles = tx.user_roles(user_id).await?;

        let direct = parse_names(tx.user_permission_names(user_id).await?);
        let mut via_roles = HashSet::new();
        for role in &roles {
            via_roles.extend(parse_names(tx.role_permission_names(role.id).await?));
        }

        Ok(Some(UserGrants {
            user,
            roles,
            direct,
            via_roles,
        }))
    }

    pub async fn grants(&self, user_id: i64) -> Result<Option<UserGrants>, AppError> {
        let mut tx = self.store.begin().await?;
        Self::load_grants(tx.as_mut(), user_id).await
    }

    /// 用户能否对实体执行其自身资源上的动作
    pub async fn can(&self, user_id: i64, action: Action, entity: EntityRef) -> bool {
        self.can_on(user_id, entity.kind.resource(), action, Some(entity))
            .await
    }

    /// 锚定在某实体上的资源动作，例如在工段上 `assets.create`，在厂区上 `users.invite`
    #[instrument(skip(self))]
    pub async fn can_on(
        &self,
        user_id: i64,
        resource: Resource,
        action: Action,
        anchor: Option<EntityRef>,
    ) -> bool {
        let result = async {
            let mut tx = self.store.begin().await?;
            let Some(grants) = Self::load_grants(tx.as_mut(), user_id).await? else {
                return Ok(false);
            };
            Self::decide(tx.as_mut(), &grants, resource, action, anchor).await
        }
        .await;

        resolve(result, user_id, resource, action)
    }

    /// 在父级之下创建实体（父级为空表示创建厂区）
    pub async fn can_create(&self, user_id: i64, kind: EntityKind, parent: Option<EntityRef>) -> bool {
        self.can_on(user_id, kind.resource(), Action::Create, parent)
            .await
    }

    /// 字符串形式的能力检查，例如 `"assets.create"`；无法解析时拒绝
    pub async fn check_ability(&self, user_id: i64, ability: &str, entity: Option<EntityRef>) -> bool {
        let parsed = ability.split_once('.').and_then(|(resource, action)| {
            Some((Resource::parse(resource)?, Action::parse(action)?))
        });

        match parsed {
            Some((resource, action)) => self.can_on(user_id, resource, action, entity).await,
            None => {
                tracing::debug!(user_id, ability, "Malformed ability, denying");
                metrics::counter!("authz.decisions", "outcome" => "deny").increment(1);
                false
            }
        }
    }

    /// 过滤出用户可见的实体（用于列表接口）
    #[instrument(skip(self, entities), fields(count = entities.len()))]
    pub async fn filter_visible(&self, user_id: i64, entities: Vec<Entity>) -> Vec<Entity> {
        let result = async {
            let mut tx = self.store.begin().await?;
            let Some(grants) = Self::load_grants(tx.as_mut(), user_id).await? else {
                return Ok(Vec::new());
            };

            let mut visible = Vec::with_capacity(entities.len());
            for entity in entities {
                let target = entity.entity_ref();
                if Self::decide(tx.as_mut(), &grants, target.kind.resource(), Action::View, Some(target))
                    .await?
                {
                    visible.push(entity);
                }
            }
            Ok::<_, AppError>(visible)
        }
        .await;

        result.unwrap_or_else(|e| {
            tracing::error!(error = %e, user_id, "Visibility filter failed, returning nothing");
            Vec::new()
        })
    }

    /// 无权限时返回 Forbidden
    pub async fn require(
        &self,
        user_id: i64,
        resource: Resource,
        action: Action,
        anchor: Option<EntityRef>,
    ) -> Result<(), AppError> {
        if self.can_on(user_id, resource, action, anchor).await {
            return Ok(());
        }

        tracing::warn!(
            user_id,
            resource = %resource,
            action = %action,
            anchor = ?anchor,
            "Permission denied"
        );
        Err(AppError::Forbidden)
    }

    /// 管理员或持有 `system.manage-users`
    pub async fn can_manage_users(&self, user_id: i64) -> bool {
        self.can_on(user_id, Resource::Users, Action::Manage, None)
            .await
    }

    /// 核心判定
    pub async fn decide(
        tx: &mut dyn StoreTx,
        grants: &UserGrants,
        resource: Resource,
        action: Action,
        anchor: Option<EntityRef>,
    ) -> Result<bool, AppError> {
        if !grants.user.is_active() {
            return Ok(false);
        }
        // 未知实体一律拒绝，管理员也不例外
        if let Some(anchor) = anchor {
            if tx.find_entity(anchor).await?.is_none() {
                return Ok(false);
            }
        }
        if grants.is_administrator() {
            return Ok(true);
        }

        if let Some(anchor) = anchor {
            // 锚点本身（直接授予与角色授予一并检查）
            if holds_any(grants, resource, action, anchor)
                || (action.is_view_family()
                    && resource != anchor.kind.resource()
                    && holds_any(grants, anchor.kind.resource(), Action::View, anchor))
            {
                return Ok(true);
            }

            // 祖先，由近及远
            for ancestor in tx.ancestors_of(anchor).await? {
                if holds_any(grants, resource, action, ancestor)
                    || (action.is_view_family()
                        && holds_any(grants, ancestor.kind.resource(), Action::View, ancestor))
                {
                    return Ok(true);
                }
            }
        }

        // 无作用域的系统权限
        if action
            .granted_by()
            .iter()
            .any(|granting| grants.holds(&Permission::system(*granting, resource)))
        {
            return Ok(true);
        }

        // 导航可见性：持有下级实体的查看授权即可看到其上级
        if let Some(anchor) = anchor {
            if action == Action::View && resource == anchor.kind.resource() {
                return Self::sees_descendant(tx, grants, anchor).await;
            }
        }

        Ok(false)
    }

    async fn sees_descendant(
        tx: &mut dyn StoreTx,
        grants: &UserGrants,
        anchor: EntityRef,
    ) -> Result<bool, AppError> {
        let scopes: HashSet<EntityRef> = grants
            .effective()
            .filter(|p| p.action().subsumes(Action::View))
            .filter_map(Permission::scope)
            .filter(|scope| scope.kind >= anchor.kind)
            .collect();

        if scopes.contains(&anchor) {
            return Ok(true);
        }

        for scope in scopes {
            match tx.descends_from(scope, anchor).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(AppError::NotFound) => {
                    tracing::warn!(
                        error = %AppError::OrphanedPermission(scope.to_string()),
                        "Skipping grant scoped to a missing entity"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(false)
    }
}

/// `action` 或任一能隐含它的动作在 `scope` 上被授予
fn holds_any(grants: &UserGrants, resource: Resource, action: Action, scope: EntityRef) -> bool {
    action
        .granted_by()
        .iter()
        .any(|granting| grants.holds(&Permission::scoped(resource, *granting, scope)))
}

fn parse_names(names: Vec<String>) -> HashSet<Permission> {
    names
        .into_iter()
        .filter_map(|name| match name.parse::<Permission>() {
            Ok(permission) => Some(permission),
            Err(e) => {
                tracing::warn!(permission = %name, error = %e, "Skipping unparsable permission");
                None
            }
        })
        .collect()
}

fn resolve(result: Result<bool, AppError>, user_id: i64, resource: Resource, action: Action) -> bool {
    let allowed = match result {
        Ok(allowed) => allowed,
        Err(AppError::NotFound) => {
            tracing::debug!(user_id, resource = %resource, action = %action, "Unknown entity, denying");
            false
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                user_id,
                resource = %resource,
                action = %action,
                "Authorization check failed, denying"
            );
            false
        }
    };

    let outcome = if allowed { "allow" } else { "deny" };
    metrics::counter!("authz.decisions", "outcome" => outcome).increment(1);

    allowed
}
