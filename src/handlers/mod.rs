//! HTTP 处理器模块

pub mod admin;
pub mod authz;
pub mod health;
pub mod hierarchy;
pub mod role;
pub mod user;

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::hierarchy::EntityKind,
};

/// 用户与角色管理需要管理员或 `system.manage-users`
pub(crate) async fn require_user_manager(
    state: &AppState,
    auth_context: &AuthContext,
) -> Result<(), AppError> {
    if state.authz.can_manage_users(auth_context.user_id).await {
        return Ok(());
    }

    tracing::warn!(user_id = auth_context.user_id, "User management denied");
    Err(AppError::Forbidden)
}

/// 路径中的层级名（复数形式）
pub(crate) fn parse_kind(raw: &str) -> Result<EntityKind, AppError> {
    EntityKind::from_plural(raw)
        .ok_or_else(|| AppError::BadRequest(format!("unknown hierarchy level: {}", raw)))
}
