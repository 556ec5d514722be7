//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::{handlers, middleware::AppState};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 需要认证的路由
    let authenticated_routes = Router::new()
        // 授权检查
        .route("/api/v1/authz/check", get(handlers::authz::check))

        // 层级实体
        .route(
            "/api/v1/hierarchy/{kind}",
            get(handlers::hierarchy::list_entities)
                .post(handlers::hierarchy::create_entity),
        )
        .route(
            "/api/v1/hierarchy/{kind}/{id}",
            get(handlers::hierarchy::get_entity)
                .delete(handlers::hierarchy::delete_entity),
        )

        // 用户管理
        .route(
            "/api/v1/users",
            get(handlers::user::list_users)
                .post(handlers::user::create_user),
        )
        .route(
            "/api/v1/users/{id}",
            get(handlers::user::get_user)
                .delete(handlers::user::delete_user),
        )
        .route("/api/v1/users/{id}/force", delete(handlers::user::force_delete_user))
        .route("/api/v1/users/{id}/restore", post(handlers::user::restore_user))
        .route(
            "/api/v1/users/{id}/operations/{operation}",
            get(handlers::user::check_operation),
        )
        .route("/api/v1/users/{id}/roles", post(handlers::user::assign_role))
        .route(
            "/api/v1/users/{id}/roles/{role_id}",
            delete(handlers::user::remove_role),
        )
        .route(
            "/api/v1/users/{id}/permissions",
            post(handlers::user::grant_permission),
        )
        .route(
            "/api/v1/users/{id}/permissions/{name}",
            delete(handlers::user::revoke_permission),
        )

        // 角色管理
        .route(
            "/api/v1/roles",
            get(handlers::role::list_roles)
                .post(handlers::role::create_role),
        )
        .route(
            "/api/v1/roles/{id}",
            get(handlers::role::get_role)
                .delete(handlers::role::delete_role),
        )
        .route(
            "/api/v1/roles/{id}/permissions",
            post(handlers::role::grant_permission),
        )
        .route(
            "/api/v1/roles/{id}/permissions/{name}",
            delete(handlers::role::revoke_permission),
        )

        // 管理员保护与审计
        .route("/api/v1/admin/status", get(handlers::admin::status))
        .route("/api/v1/admin/recover", post(handlers::admin::recover))
        .route("/api/v1/audit/logs", get(handlers::admin::audit_logs))
        .layer(axum::middleware::from_fn_with_state(
            state.jwt_service.clone(),
            crate::auth::middleware::jwt_auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.server.body_limit_bytes;

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
