//! 授权检查端点

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::hierarchy::{EntityId, EntityKind, EntityRef},
};

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    /// `resource.action`，例如 `assets.create`
    pub ability: String,
    /// 作用域类型（单数形式）
    pub kind: Option<String>,
    pub id: Option<EntityId>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

/// 当前用户能否在目标实体上执行某能力
pub async fn check(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, AppError> {
    let entity = match (query.kind.as_deref(), query.id) {
        (None, None) => None,
        (Some(kind), Some(id)) => {
            let kind = EntityKind::parse(kind)
                .ok_or_else(|| AppError::BadRequest(format!("unknown scope type: {}", kind)))?;
            Some(EntityRef::new(kind, id))
        }
        _ => {
            return Err(AppError::BadRequest(
                "kind and id must be given together".to_string(),
            ))
        }
    };

    let allowed = state
        .authz
        .check_ability(auth_context.user_id, &query.ability, entity)
        .await;

    Ok(Json(CheckResponse { allowed }))
}
