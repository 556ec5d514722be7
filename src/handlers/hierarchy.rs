//! 层级实体的 HTTP 处理器

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::parse_kind;
use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::{
        hierarchy::{CreateEntityRequest, EntityId, EntityRef},
        permission::Action,
    },
    services::HierarchyService,
};

/// 列出某一层级中当前用户可见的实体
pub async fn list_entities(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(kind): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let kind = parse_kind(&kind)?;

    let entities = state.hierarchy_service.list(kind).await?;
    let visible = state
        .authz
        .filter_visible(auth_context.user_id, entities)
        .await;

    Ok(Json(json!({
        "items": visible,
        "count": visible.len()
    })))
}

/// 创建实体
pub async fn create_entity(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(kind): Path<String>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind = parse_kind(&kind)?;
    req.validate()?;

    let parent = HierarchyService::parent_ref(kind, req.parent_id)?;
    if let Some(parent) = parent {
        state.hierarchy_service.get(parent).await?;
    }
    if !state.authz.can_create(auth_context.user_id, kind, parent).await {
        return Err(AppError::Forbidden);
    }

    let entity = state
        .hierarchy_service
        .create(auth_context.actor(), kind, &req.name, parent)
        .await?;

    Ok((StatusCode::CREATED, Json(entity)))
}

/// 获取实体及其祖先
pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((kind, id)): Path<(String, EntityId)>,
) -> Result<impl IntoResponse, AppError> {
    let target = EntityRef::new(parse_kind(&kind)?, id);
    let entity = state.hierarchy_service.get(target).await?;

    state
        .authz
        .require(auth_context.user_id, target.kind.resource(), Action::View, Some(target))
        .await?;

    let ancestors = state.hierarchy_service.ancestors(target).await?;

    Ok(Json(json!({
        "entity": entity,
        "ancestors": ancestors
    })))
}

/// 删除实体（存在子级时返回 409）
pub async fn delete_entity(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((kind, id)): Path<(String, EntityId)>,
) -> Result<impl IntoResponse, AppError> {
    let target = EntityRef::new(parse_kind(&kind)?, id);
    state.hierarchy_service.get(target).await?;

    state
        .authz
        .require(auth_context.user_id, target.kind.resource(), Action::Delete, Some(target))
        .await?;

    let purged = state
        .hierarchy_service
        .delete(auth_context.actor(), target)
        .await?;

    Ok(Json(json!({
        "deleted": target,
        "purged_permissions": purged
    })))
}
