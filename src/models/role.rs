//! Role domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 系统内置的管理员角色名
pub const ADMINISTRATOR_ROLE: &str = "Administrator";

/// Role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Confers full administrative rights
    pub is_administrator: bool,
    /// Seeded and non-deletable
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role with its permission names
#[derive(Debug, Clone, Serialize)]
pub struct RoleSummary {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<String>,
}

/// Create role request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[serde(default)]
    pub is_administrator: bool,
}

/// Assign role request
#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: i64,
}
