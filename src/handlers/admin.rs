//! 管理员状态与审计端点

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::require_user_manager;
use crate::{
    auth::middleware::AuthContext, error::AppError, middleware::AppState, services::AdminState,
};

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

/// 管理员集合状态
pub async fn status(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let active = state.protection.active_administrator_count(None).await?;
    let administrators = state.protection.all_administrators().await?;

    Ok(Json(json!({
        "state": AdminState::from_count(active),
        "active_administrators": active,
        "administrators": administrators
    })))
}

/// 手动触发恢复；零管理员且无可恢复对象时返回 503
pub async fn recover(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let recovered = state.protection.attempt_recovery().await?;
    if recovered.is_none() && state.protection.is_in_critical_state().await? {
        return Err(AppError::CriticalState);
    }

    Ok(Json(json!({ "recovered": recovered })))
}

/// 最近的审计日志
pub async fn audit_logs(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_user_manager(&state, &auth_context).await?;

    let entries = state
        .audit_service
        .recent(query.limit.unwrap_or(100))
        .await?;

    Ok(Json(json!({
        "entries": entries,
        "count": entries.len()
    })))
}
