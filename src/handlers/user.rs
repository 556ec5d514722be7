//! 用户管理的 HTTP 处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::require_user_manager;
use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::{
        permission::GrantPermissionRequest,
        role::AssignRoleRequest,
        user::CreateUserRequest,
    },
    services::ProtectedOperation,
};

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct OperationQuery {
    pub role_id: Option<i64>,
}

/// 列出用户
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let users = state.user_service.list(query.include_deleted).await?;

    Ok(Json(json!({
        "users": users,
        "count": users.len()
    })))
}

/// 注册用户（系统中第一个用户成为管理员）
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let user = state
        .user_service
        .register(auth_context.actor(), req)
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// 用户详情，包含角色与有效权限；本人或用户管理者可见
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if auth_context.user_id != id {
        require_user_manager(&state, &auth_context).await?;
    }

    let grants = state.authz.grants(id).await?.ok_or(AppError::NotFound)?;

    let mut effective: Vec<String> = grants.effective().map(|p| p.name()).collect();
    effective.sort();
    let mut direct: Vec<String> = grants.direct.iter().map(|p| p.name()).collect();
    direct.sort();
    let is_administrator = grants.is_administrator();

    Ok(Json(json!({
        "user": grants.user,
        "is_administrator": is_administrator,
        "roles": grants.roles,
        "direct_permissions": direct,
        "effective_permissions": effective
    })))
}

/// 软删除
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    // 删除自己的账户不需要管理权限也会被拒绝
    if auth_context.user_id == id {
        return Err(AppError::SelfDeletion);
    }
    require_user_manager(&state, &auth_context).await?;

    state.user_service.delete(auth_context.user_id, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 永久删除
pub async fn force_delete_user(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if auth_context.user_id == id {
        return Err(AppError::SelfDeletion);
    }
    require_user_manager(&state, &auth_context).await?;

    state
        .user_service
        .force_delete(auth_context.user_id, id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 恢复软删除的用户
pub async fn restore_user(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let user = state
        .user_service
        .restore(auth_context.actor(), id)
        .await?;

    Ok(Json(user))
}

/// 预检受保护操作：delete / force-delete / remove-role?role_id=
pub async fn check_operation(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((id, operation)): Path<(i64, String)>,
    Query(query): Query<OperationQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let operation = ProtectedOperation::parse(&operation, query.role_id).ok_or_else(|| {
        AppError::BadRequest(format!("unknown protected operation: {}", operation))
    })?;

    if auth_context.user_id == id
        && matches!(operation, ProtectedOperation::Delete | ProtectedOperation::ForceDelete)
    {
        return Ok(Json(json!({
            "allowed": false,
            "message": AppError::SelfDeletion.user_message()
        })));
    }

    let check = state
        .protection
        .can_perform_operation(id, operation)
        .await?;

    Ok(Json(json!(check)))
}

/// 分配角色
pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    state
        .user_service
        .assign_role(auth_context.actor(), id, req.role_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 移除角色
pub async fn remove_role(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((id, role_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    state
        .user_service
        .remove_role(auth_context.actor(), id, role_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 直接授予权限
pub async fn grant_permission(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<GrantPermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    state
        .user_service
        .grant_permission(auth_context.actor(), id, &req.permission)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 撤销直接授予的权限
pub async fn revoke_permission(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((id, name)): Path<(i64, String)>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    state
        .user_service
        .revoke_permission(auth_context.actor(), id, &name)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
