//! Entity hierarchy domain models
//!
//! 厂区 → 区域 → 工段 → 设备 的四级严格树结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::permission::Resource;

/// 实体主键（与数据库 BIGSERIAL 对齐）
pub type EntityId = i64;

/// 层级深度上限，用于祖先遍历的环检测
pub const HIERARCHY_DEPTH: usize = 4;

/// Hierarchy level of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Plant,
    Area,
    Sector,
    Asset,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Plant,
        EntityKind::Area,
        EntityKind::Sector,
        EntityKind::Asset,
    ];

    /// 作用域类型名（用于权限字符串）
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Plant => "plant",
            EntityKind::Area => "area",
            EntityKind::Sector => "sector",
            EntityKind::Asset => "asset",
        }
    }

    /// 复数形式（用于路由和表名）
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Plant => "plants",
            EntityKind::Area => "areas",
            EntityKind::Sector => "sectors",
            EntityKind::Asset => "assets",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn from_plural(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.plural() == s)
    }

    /// 父级类型，厂区没有父级
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Plant => None,
            EntityKind::Area => Some(EntityKind::Plant),
            EntityKind::Sector => Some(EntityKind::Area),
            EntityKind::Asset => Some(EntityKind::Sector),
        }
    }

    /// 子级类型，设备没有子级
    pub fn child_kind(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Plant => Some(EntityKind::Area),
            EntityKind::Area => Some(EntityKind::Sector),
            EntityKind::Sector => Some(EntityKind::Asset),
            EntityKind::Asset => None,
        }
    }

    /// 该层级自身对应的权限资源
    pub fn resource(&self) -> Resource {
        match self {
            EntityKind::Plant => Resource::Plants,
            EntityKind::Area => Resource::Areas,
            EntityKind::Sector => Resource::Sectors,
            EntityKind::Asset => Resource::Assets,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a single entity instance (also used as a permission scope)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }

    pub fn plant(id: EntityId) -> Self {
        Self::new(EntityKind::Plant, id)
    }

    pub fn area(id: EntityId) -> Self {
        Self::new(EntityKind::Area, id)
    }

    pub fn sector(id: EntityId) -> Self {
        Self::new(EntityKind::Sector, id)
    }

    pub fn asset(id: EntityId) -> Self {
        Self::new(EntityKind::Asset, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Hierarchy entity (plant, area, sector or asset)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub parent: Option<EntityRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id)
    }
}

/// Create entity request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateEntityRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub parent_id: Option<EntityId>,
}
