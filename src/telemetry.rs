//! 日志与追踪系统
//! 初始化结构化日志和指标描述

use crate::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志与追踪系统
pub fn init_telemetry(config: &AppConfig) {
    // RUST_LOG 优先于配置
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(false)
            .boxed(),
        // JSON 格式（生产环境）
        _ => tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .boxed(),
    };

    // 重复初始化（例如测试中）不视为错误
    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .try_init()
    {
        eprintln!("Telemetry already initialized: {}", e);
        return;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 注册指标描述
pub fn init_metrics() {
    metrics::describe_counter!("authz.decisions", "Authorization decisions by outcome");
    metrics::describe_counter!(
        "admin.protection.refused",
        "Operations refused to keep an active administrator"
    );
    metrics::describe_counter!("admin.recovery", "Critical-state recovery attempts by outcome");
    metrics::describe_counter!("http_requests_total", "HTTP requests by method and status");
    metrics::describe_histogram!("http_request_duration_seconds", "HTTP request latency");
    metrics::describe_gauge!("db.pool.size", "Database pool size");
    metrics::describe_gauge!("db.pool.idle", "Idle database connections");

    tracing::debug!("Metrics initialized");
}
