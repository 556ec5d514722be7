//! 健康检查处理器
//! 提供 /health 和 /ready 端点

use axum::{extract::State, Json};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    db::{self, HealthStatus},
    middleware::AppState,
    services::AdminState,
};

/// 存活探针响应
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// 就绪探针响应
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: Vec<HealthCheck>,
}

/// 健康检查项
#[derive(Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    fn new(name: &str, status: &HealthStatus) -> Self {
        let (label, message) = match status {
            HealthStatus::Healthy => ("healthy", None),
            HealthStatus::Unhealthy(msg) => ("unhealthy", Some(msg.clone())),
        };
        Self {
            name: name.to_string(),
            status: label.to_string(),
            message,
        }
    }
}

/// 应用启动时间
static APP_START_TIME: OnceCell<Instant> = OnceCell::new();

/// 设置应用启动时间（main 中调用一次）
pub fn set_start_time() {
    let _ = APP_START_TIME.set(Instant::now());
}

/// 获取应用运行时间（秒）
pub fn get_uptime() -> u64 {
    APP_START_TIME
        .get()
        .map_or(0, |start| start.elapsed().as_secs())
}

/// 存活探针
/// 快速响应，不检查依赖
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: get_uptime(),
    })
}

/// 就绪探针
/// 检查数据库与管理员状态
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> Json<ReadinessResponse> {
    let mut statuses = Vec::new();

    if let Some(pool) = &state.db {
        statuses.push(("database", db::health_check(pool).await));
        db::record_pool_metrics(pool);
    }

    // 零管理员时不可就绪
    statuses.push((
        "administrators",
        match state.protection.state().await {
            Ok(AdminState::Critical) => HealthStatus::Unhealthy(
                "no active administrator; manual intervention required".to_string(),
            ),
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        },
    ));

    Json(ReadinessResponse {
        ready: statuses.iter().all(|(_, status)| status.is_healthy()),
        checks: statuses
            .iter()
            .map(|(name, status)| HealthCheck::new(name, status))
            .collect(),
    })
}
