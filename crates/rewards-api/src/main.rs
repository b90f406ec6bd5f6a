//! 积分与优惠券 API 服务
//!
//! 提供积分账本、优惠券模板、签发核销与问卷发券配置的 REST API。

use std::sync::Arc;

use axum::{Json, routing::get};
use loyalty_shared::{cache::Cache, config::AppConfig, database::Database, observability};
use rewards_api::{routes, state::AppState};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("rewards-api")?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting rewards-api on {}", config.server_addr());

    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    // Redis 不可用时等级列表直接查库
    let cache = match Cache::new(&config.redis) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "Redis 初始化失败，等级列表不走缓存");
            None
        }
    };

    let state = AppState::new(db.pool().clone(), cache.clone(), &config.rewards);

    let allowed_origins = std::env::var("LOYALTY_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());
    if allowed_origins.trim() == "*" && config.is_production() {
        warn!("生产环境放开了全部跨域来源，请设置 LOYALTY_CORS_ORIGINS");
    }
    info!(origins = %allowed_origins, "跨域来源");

    let app = routes::app(state)
        .route(
            "/ready",
            get({
                let db = db.clone();
                move || readiness_check(db.clone(), cache.clone())
            }),
        )
        .layer(routes::cors_layer(&allowed_origins))
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 就绪探针：检查数据库和 Redis 连接是否可用
async fn readiness_check(db: Database, cache: Option<Arc<Cache>>) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();
    let cache_ok = match &cache {
        Some(cache) => cache.health_check().await.is_ok(),
        None => false,
    };

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "rewards-api",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" },
            "redis": if cache_ok { "ok" } else { "fail" }
        }
    }))
}
