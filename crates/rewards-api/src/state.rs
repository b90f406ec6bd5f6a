//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use sqlx::PgPool;

use loyalty_shared::cache::Cache;
use loyalty_shared::config::RewardsConfig;
use rewards_engine::{
    CatalogService, IssueService, LedgerService, RedemptionService, SurveyRewardBridge,
};

/// Axum 应用共享状态
///
/// 各服务通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    pub catalog: Arc<CatalogService>,
    pub issuer: Arc<IssueService>,
    pub redemption: Arc<RedemptionService>,
    pub bridge: Arc<SurveyRewardBridge>,
}

impl AppState {
    /// 基于连接池构建全部服务
    ///
    /// 传入缓存时等级列表走 Redis 缓存
    pub fn new(pool: PgPool, cache: Option<Arc<Cache>>, config: &RewardsConfig) -> Self {
        let mut ledger = LedgerService::from_pool(pool.clone());
        if let Some(cache) = cache {
            ledger = ledger.with_cache(cache);
        }

        Self {
            ledger: Arc::new(ledger),
            catalog: Arc::new(
                CatalogService::from_pool(pool.clone())
                    .with_default_currency(config.default_currency.clone()),
            ),
            issuer: Arc::new(IssueService::from_pool(pool.clone()).with_config(config)),
            redemption: Arc::new(RedemptionService::from_pool(pool.clone())),
            bridge: Arc::new(SurveyRewardBridge::from_pool(
                pool,
                config.code_generation_max_attempts,
            )),
        }
    }
}
