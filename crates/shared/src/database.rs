//! PostgreSQL 连接池
//!
//! 积分余额、优惠券状态与核销记录都以数据库为准，服务启动时必须拿到连接池
//! 并完成迁移。容器编排下数据库可能晚于服务就绪，首次连接按退避策略重试。

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{LoyaltyError, Result};
use crate::retry::{RetryPolicy, retry_with_policy};

/// 连接池快照，供就绪探针与日志使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池，连接失败时有限次重试
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(url = %config.redacted_url(), "连接数据库");
        let options = Self::connect_options(config)?;
        let pool_options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        let pool = retry_with_policy(
            &RetryPolicy::default(),
            "database_connect",
            LoyaltyError::is_retryable,
            || {
                let pool_options = pool_options.clone();
                let options = options.clone();
                async move {
                    pool_options
                        .connect_with(options)
                        .await
                        .map_err(LoyaltyError::from)
                }
            },
        )
        .await?;

        let db = Self { pool };
        let stats = db.stats();
        info!(size = stats.size, idle = stats.idle, "数据库连接池已建立");
        Ok(db)
    }

    /// 解析连接串并标注 application_name，便于在 pg_stat_activity 中区分服务
    fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&config.url)?;
        Ok(options.application_name(&config.application_name))
    }

    /// 包装已有连接池（测试场景）
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }

    /// 应用工作区根目录 `migrations/` 下的迁移（编译期嵌入）
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("数据库迁移已应用");
        Ok(())
    }
}
