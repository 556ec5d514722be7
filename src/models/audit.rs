//! Audit domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::hierarchy::EntityRef;

/// Who performed an operation. Never null: unauthenticated flows use `System`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Actor {
    User(i64),
    System,
}

impl Actor {
    pub fn actor_type(&self) -> &'static str {
        match self {
            Actor::User(_) => "user",
            Actor::System => "system",
        }
    }
}

/// Target of an audited operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTarget {
    pub target_type: String,
    pub id: i64,
}

impl AuditTarget {
    pub fn user(id: i64) -> Self {
        Self {
            target_type: "user".to_string(),
            id,
        }
    }

    pub fn role(id: i64) -> Self {
        Self {
            target_type: "role".to_string(),
            id,
        }
    }
}

impl From<EntityRef> for AuditTarget {
    fn from(entity: EntityRef) -> Self {
        Self {
            target_type: entity.kind.as_str().to_string(),
            id: entity.id,
        }
    }
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: i64,
    pub actor_type: String,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<i64>,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}
