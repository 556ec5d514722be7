//! User domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

use super::permission::Permission;
use super::role::Role;

/// User account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// 未被软删除
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Create user request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
}

/// 用户授权聚合：预加载角色、角色权限与直接权限
#[derive(Debug, Clone)]
pub struct UserGrants {
    pub user: User,
    pub roles: Vec<Role>,
    pub direct: HashSet<Permission>,
    pub via_roles: HashSet<Permission>,
}

impl UserGrants {
    /// 持有管理员角色且未被软删除
    pub fn is_administrator(&self) -> bool {
        self.user.is_active() && self.roles.iter().any(|r| r.is_administrator)
    }

    /// 直接授予或经由角色授予
    pub fn holds(&self, permission: &Permission) -> bool {
        self.direct.contains(permission) || self.via_roles.contains(permission)
    }

    /// 全部有效权限（直接 ∪ 角色）
    pub fn effective(&self) -> impl Iterator<Item = &Permission> {
        self.direct
            .iter()
            .chain(self.via_roles.iter().filter(|p| !self.direct.contains(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::hierarchy::EntityRef;
    use crate::models::permission::{Action, Resource};

    fn user(deleted: bool) -> User {
        User {
            id: 1,
            name: "alice".to_string(),
            email: "alice@example.com".to_string(),
            deleted_at: deleted.then(Utc::now),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn admin_role() -> Role {
        Role {
            id: 1,
            name: "Administrator".to_string(),
            description: None,
            is_administrator: true,
            is_system: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_soft_deleted_admin_is_not_administrator() {
        let grants = UserGrants {
            user: user(true),
            roles: vec![admin_role()],
            direct: HashSet::new(),
            via_roles: HashSet::new(),
        };
        assert!(!grants.is_administrator());

        let grants = UserGrants {
            user: user(false),
            ..grants
        };
        assert!(grants.is_administrator());
    }

    #[test]
    fn test_effective_deduplicates() {
        let p = Permission::scoped(Resource::Sectors, Action::View, EntityRef::sector(1));
        let grants = UserGrants {
            user: user(false),
            roles: vec![],
            direct: HashSet::from([p]),
            via_roles: HashSet::from([p]),
        };
        assert!(grants.holds(&p));
        assert_eq!(grants.effective().count(), 1);
    }
}
