//! 角色管理的 HTTP 处理器

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use super::require_user_manager;
use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::{permission::GrantPermissionRequest, role::CreateRoleRequest},
};

/// 列出所有角色
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let roles = state.role_service.list().await?;

    Ok(Json(json!({
        "roles": roles,
        "count": roles.len()
    })))
}

/// 创建角色
pub async fn create_role(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Json(req): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let role = state
        .role_service
        .create(auth_context.actor(), req)
        .await?;

    Ok((StatusCode::CREATED, Json(role)))
}

/// 获取角色详情
pub async fn get_role(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    Ok(Json(state.role_service.get(id).await?))
}

/// 删除角色
pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    state
        .role_service
        .delete(auth_context.actor(), id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 为角色授予权限
pub async fn grant_permission(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<GrantPermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    state
        .role_service
        .grant_permission(auth_context.actor(), id, &req.permission)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 从角色撤销权限
pub async fn revoke_permission(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((id, name)): Path<(i64, String)>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    state
        .role_service
        .revoke_permission(auth_context.actor(), id, &name)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
