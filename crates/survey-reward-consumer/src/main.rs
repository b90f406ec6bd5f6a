//! 问卷发券消费服务
//!
//! 消费 `survey.completed` 事件并签发问卷奖励优惠券，同时提供存活与就绪探针。

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, routing::get};
use loyalty_shared::{
    cache::Cache, config::AppConfig, database::Database, kafka::KafkaProducer, observability,
};
use rewards_engine::SurveyRewardBridge;
use survey_reward_consumer::{BridgeEventProcessor, KafkaDeadLetterSink, SurveyRewardConsumer};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("survey-reward-consumer")?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting survey-reward-consumer...");

    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    // Redis 只承担快速去重，不可用时仍可依赖数据库奖励记录
    let cache = match Cache::new(&config.redis) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "Redis 初始化失败，跳过发奖标记");
            None
        }
    };

    let bridge = Arc::new(SurveyRewardBridge::from_pool(
        db.pool().clone(),
        config.rewards.code_generation_max_attempts,
    ));
    let processor = Arc::new(BridgeEventProcessor::new(
        bridge,
        cache.clone(),
        Duration::from_secs(config.rewards.survey_marker_ttl_seconds),
    ));
    let dead_letters = Arc::new(KafkaDeadLetterSink::new(KafkaProducer::new(&config.kafka)?));

    let consumer = SurveyRewardConsumer::new(&config, processor, dead_letters)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(shutdown_rx).await {
            error!(error = %e, "问卷发券消费者异常退出");
        }
    });

    let health_router = Router::new()
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db = db.clone();
                move || readiness_check(db.clone(), cache.clone())
            }),
        );

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Health endpoints listening on {}", config.server_addr());

    axum::serve(listener, health_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 通知消费循环退出并等待当前消息处理完
    if shutdown_tx.send(true).is_err() {
        warn!("消费循环已提前结束");
    }
    if let Err(e) = consumer_handle.await {
        error!(error = %e, "等待消费任务结束失败");
    }

    db.close().await;
    info!("survey-reward-consumer shutdown complete");

    Ok(())
}

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

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "survey-reward-consumer"
    }))
}

/// 就绪探针：数据库必须可用，Redis 仅作参考
async fn readiness_check(db: Database, cache: Option<Arc<Cache>>) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();
    let cache_ok = match &cache {
        Some(cache) => cache.health_check().await.is_ok(),
        None => false,
    };

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "survey-reward-consumer",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" },
            "redis": if cache_ok { "ok" } else { "fail" }
        }
    }))
}
