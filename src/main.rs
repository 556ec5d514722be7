//! 授权服务主入口

use maintenance_authz::{
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    models::{audit::Actor, user::CreateUserRequest},
    repository::{AuditRepository, PgStore},
    routes, telemetry,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser)]
#[command(
    name = "maintenance-authz",
    version,
    about = "Hierarchical permission service for maintenance sites",
    after_help = "所有配置通过 AUTHZ_ 前缀的环境变量完成，例如 AUTHZ_DATABASE__URL"
)]
struct Cli {
    /// 缺省时启动 HTTP 服务
    #[command(subcommand)]
    command: Option<Command>,
}

/// 运维命令
#[derive(Subcommand)]
enum Command {
    /// 启动 HTTP 服务
    Serve,
    /// 创建用户（空系统中的首个用户成为管理员）
    Bootstrap { name: String, email: String },
    /// 为用户签发访问令牌
    IssueToken { user_id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Cli::parse().command.unwrap_or(Command::Serve);

    // 加载 .env 文件（开发环境）；生产环境直接设置环境变量
    if let Ok(env) = std::env::var("AUTHZ_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Authorization service starting...");

    // 3. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 4. 构建应用状态
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(PgStore::new(db_pool.clone())),
        Arc::new(AuditRepository::new(db_pool.clone())),
        Some(db_pool),
    )?);

    match command {
        Command::Bootstrap { name, email } => {
            let user = state
                .user_service
                .register(Actor::System, CreateUserRequest { name, email })
                .await?;
            println!("created user #{} ({})", user.id, user.email);
            return Ok(());
        }
        Command::IssueToken { user_id } => {
            let user = state.user_service.get(user_id).await?;
            if !user.is_active() {
                anyhow::bail!("user #{} is deleted", user_id);
            }
            println!("{}", state.jwt_service.generate_access_token(user.id, &user.name)?);
            return Ok(());
        }
        Command::Serve => {}
    }

    // 5. 零管理员检测与恢复
    if state.protection.is_in_critical_state().await? {
        tracing::error!("No active administrator found at startup");
        if config.authz.recover_on_startup {
            match state.protection.attempt_recovery().await? {
                Some(user) => tracing::warn!(user_id = user.id, "Administrator restored at startup"),
                None => tracing::error!(
                    "Recovery failed; seed an administrator with `bootstrap` or directly in the database"
                ),
            }
        }
    }

    // 6. 构建路由
    let app = routes::create_router(state);

    // 7. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 8. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理；超时后强制退出
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}
