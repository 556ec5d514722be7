//! Permission domain model and its string codec
//!
//! 权限在内部是带标签的枚举，字符串形式只在存储/传输边界出现：
//!
//! ```text
//! {resource}.{action}.{entityId}                 sectors.view.42
//! {resource}.{action}.{scopeType}.{scopeId}      assets.manage.sector.42
//! system.{action}-{resource}                     system.create-plants
//! ```
//!
//! 当资源就是作用域实体自身的类型时使用单段作用域形式，否则使用带类型的形式。
//! 解析只接受规范形式，保证编码与解码互为逆运算。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::hierarchy::{EntityId, EntityKind, EntityRef};

const SYSTEM_PREFIX: &str = "system";

/// Resource family a permission applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Plants,
    Areas,
    Sectors,
    Assets,
    Users,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Plants,
        Resource::Areas,
        Resource::Sectors,
        Resource::Assets,
        Resource::Users,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Plants => "plants",
            Resource::Areas => "areas",
            Resource::Sectors => "sectors",
            Resource::Assets => "assets",
            Resource::Users => "users",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }

    /// 资源对应的层级类型（users 不属于层级）
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            Resource::Plants => Some(EntityKind::Plant),
            Resource::Areas => Some(EntityKind::Area),
            Resource::Sectors => Some(EntityKind::Sector),
            Resource::Assets => Some(EntityKind::Asset),
            Resource::Users => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action component of a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "view")]
    View,
    #[serde(rename = "viewAny")]
    ViewAny,
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "manage")]
    Manage,
    #[serde(rename = "invite")]
    Invite,
    #[serde(rename = "execute-routines")]
    ExecuteRoutines,
    #[serde(rename = "export")]
    Export,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::View,
        Action::ViewAny,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Manage,
        Action::Invite,
        Action::ExecuteRoutines,
        Action::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::ViewAny => "viewAny",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
            Action::Invite => "invite",
            Action::ExecuteRoutines => "execute-routines",
            Action::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    /// 能够授予本动作的所有动作（包含自身）
    ///
    /// manage ⊇ {view, viewAny, create, update}，viewAny ⊇ {view}
    pub fn granted_by(&self) -> &'static [Action] {
        match self {
            Action::View => &[Action::View, Action::ViewAny, Action::Manage],
            Action::ViewAny => &[Action::ViewAny, Action::Manage],
            Action::Create => &[Action::Create, Action::Manage],
            Action::Update => &[Action::Update, Action::Manage],
            Action::Delete => &[Action::Delete],
            Action::Manage => &[Action::Manage],
            Action::Invite => &[Action::Invite],
            Action::ExecuteRoutines => &[Action::ExecuteRoutines],
            Action::Export => &[Action::Export],
        }
    }

    /// `self` 的授权是否隐含 `other`
    pub fn subsumes(&self, other: Action) -> bool {
        other.granted_by().contains(self)
    }

    pub fn is_view_family(&self) -> bool {
        matches!(self, Action::View | Action::ViewAny)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope-qualified capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    /// Anchored at one entity instance
    Scoped {
        resource: Resource,
        action: Action,
        scope: EntityRef,
    },
    /// Unscoped system capability, e.g. `system.create-plants`
    System { action: Action, resource: Resource },
}

impl Permission {
    pub fn scoped(resource: Resource, action: Action, scope: EntityRef) -> Self {
        Permission::Scoped {
            resource,
            action,
            scope,
        }
    }

    pub fn system(action: Action, resource: Resource) -> Self {
        Permission::System { action, resource }
    }

    pub fn resource(&self) -> Resource {
        match self {
            Permission::Scoped { resource, .. } | Permission::System { resource, .. } => *resource,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Permission::Scoped { action, .. } | Permission::System { action, .. } => *action,
        }
    }

    pub fn scope(&self) -> Option<EntityRef> {
        match self {
            Permission::Scoped { scope, .. } => Some(*scope),
            Permission::System { .. } => None,
        }
    }

    /// 存储用的规范字符串
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Scoped {
                resource,
                action,
                scope,
            } => {
                if resource.entity_kind() == Some(scope.kind) {
                    write!(f, "{}.{}.{}", resource, action, scope.id)
                } else {
                    write!(f, "{}.{}.{}.{}", resource, action, scope.kind, scope.id)
                }
            }
            Permission::System { action, resource } => {
                write!(f, "{}.{}-{}", SYSTEM_PREFIX, action, resource)
            }
        }
    }
}

/// 权限字符串解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionParseError {
    #[error("empty permission name")]
    Empty,

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown scope type: {0}")]
    UnknownScope(String),

    #[error("invalid entity id: {0}")]
    InvalidId(String),

    #[error("malformed permission name: {0}")]
    Malformed(String),
}

fn parse_id(raw: &str) -> Result<EntityId, PermissionParseError> {
    let canonical = !raw.is_empty()
        && raw.bytes().all(|b| b.is_ascii_digit())
        && (raw == "0" || !raw.starts_with('0'));
    if !canonical {
        return Err(PermissionParseError::InvalidId(raw.to_string()));
    }
    raw.parse::<EntityId>()
        .map_err(|_| PermissionParseError::InvalidId(raw.to_string()))
}

fn parse_resource(raw: &str) -> Result<Resource, PermissionParseError> {
    Resource::parse(raw).ok_or_else(|| PermissionParseError::UnknownResource(raw.to_string()))
}

fn parse_action(raw: &str) -> Result<Action, PermissionParseError> {
    Action::parse(raw).ok_or_else(|| PermissionParseError::UnknownAction(raw.to_string()))
}

impl FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PermissionParseError::Empty);
        }

        let parts: Vec<&str> = s.split('.').collect();

        if parts[0] == SYSTEM_PREFIX {
            if parts.len() != 2 {
                return Err(PermissionParseError::Malformed(s.to_string()));
            }
            // action 本身可能含有 '-'（execute-routines），因此从右侧切分
            let (action, resource) = parts[1]
                .rsplit_once('-')
                .ok_or_else(|| PermissionParseError::Malformed(s.to_string()))?;
            return Ok(Permission::system(
                parse_action(action)?,
                parse_resource(resource)?,
            ));
        }

        match parts.as_slice() {
            [resource, action, id] => {
                let resource = parse_resource(resource)?;
                let action = parse_action(action)?;
                let kind = resource
                    .entity_kind()
                    .ok_or_else(|| PermissionParseError::Malformed(s.to_string()))?;
                Ok(Permission::scoped(resource, action, EntityRef::new(kind, parse_id(id)?)))
            }
            [resource, action, scope_type, id] => {
                let resource = parse_resource(resource)?;
                let action = parse_action(action)?;
                let kind = EntityKind::parse(scope_type)
                    .ok_or_else(|| PermissionParseError::UnknownScope(scope_type.to_string()))?;
                if resource.entity_kind() == Some(kind) {
                    // 规范形式应为单段作用域
                    return Err(PermissionParseError::Malformed(s.to_string()));
                }
                Ok(Permission::scoped(resource, action, EntityRef::new(kind, parse_id(id)?)))
            }
            _ => Err(PermissionParseError::Malformed(s.to_string())),
        }
    }
}

impl TryFrom<String> for Permission {
    type Error = PermissionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.to_string()
    }
}

/// Persisted permission row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PermissionRecord {
    pub id: i64,
    pub name: String,
    pub scope_type: Option<String>,
    pub scope_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl PermissionRecord {
    /// 解析存储的名称；无法解析的行由调用方记录并跳过
    pub fn permission(&self) -> Result<Permission, PermissionParseError> {
        self.name.parse()
    }

    /// 记录中的作用域列
    pub fn scope(&self) -> Option<EntityRef> {
        let kind = EntityKind::parse(self.scope_type.as_deref()?)?;
        Some(EntityRef::new(kind, self.scope_id?))
    }
}

/// Grant permission request (user or role)
#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub permission: String,
}
