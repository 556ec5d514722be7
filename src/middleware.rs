//! HTTP 中间件与应用状态

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::JwtService,
    config::AppConfig,
    error::AppError,
    repository::{AuditSink, Store},
    services::{
        AdminProtectionService, AuditService, AuthorizationService, HierarchyService,
        PermissionCatalog, RoleService, UserService,
    },
};

/// 应用状态
///
/// 服务以 Arc 共享，Clone 只是指针拷贝。
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// 使用 PostgreSQL 存储时的连接池，用于就绪检查与连接池指标
    pub db: Option<PgPool>,
    pub store: Arc<dyn Store>,
    pub jwt_service: Arc<JwtService>,
    pub audit_service: Arc<AuditService>,
    pub authz: Arc<AuthorizationService>,
    pub hierarchy_service: Arc<HierarchyService>,
    pub protection: Arc<AdminProtectionService>,
    pub user_service: Arc<UserService>,
    pub role_service: Arc<RoleService>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        sink: Arc<dyn AuditSink>,
        db: Option<PgPool>,
    ) -> Result<Self, AppError> {
        let jwt_service = Arc::new(JwtService::from_config(&config)?);
        let audit_service = Arc::new(AuditService::new(sink, config.authz.system_actor_id));

        Ok(Self {
            authz: Arc::new(AuthorizationService::new(store.clone())),
            hierarchy_service: Arc::new(HierarchyService::new(
                store.clone(),
                PermissionCatalog::new(),
                audit_service.clone(),
            )),
            protection: Arc::new(AdminProtectionService::new(store.clone(), audit_service.clone())),
            user_service: Arc::new(UserService::new(store.clone(), audit_service.clone())),
            role_service: Arc::new(RoleService::new(store.clone(), audit_service.clone())),
            config,
            db,
            store,
            jwt_service,
            audit_service,
        })
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().clone();
    let uri = req.uri().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "UNKNOWN",
        };
        let status_code = match status {
            200 => "200",
            201 => "201",
            204 => "204",
            400 => "400",
            401 => "401",
            403 => "403",
            404 => "404",
            409 => "409",
            500 => "500",
            503 => "503",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_code)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
