//! 积分账本服务
//!
//! 积分流水只追加不修改。每次写入后在同一事务内：
//! 1. 对全部流水求和得到余额
//! 2. 按启用等级重新推导会员等级
//! 3. 回写账户余额与等级
//!
//! 账户行在事务开始时加 `FOR UPDATE` 锁，同一用户的并发写入串行执行。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use loyalty_shared::cache::{Cache, CacheKey};
use loyalty_shared::observability::metrics;

use crate::error::{Result, RewardsError};
use crate::models::{
    LoyaltyAccount, PointsTransaction, Tier, next_tier, progress_percentage, resolve_tier,
};
use crate::repository::{
    AccountRepository, AccountRepositoryTrait, PointsTransactionRepository,
    PointsTransactionRepositoryTrait, TierRepository, TierRepositoryTrait,
};
use crate::service::dto::{
    AwardPointsRequest, AwardPointsResponse, BalanceDto, CreateTierRequest, TierInfoDto,
    TransactionPage,
};

/// 等级列表缓存 TTL
const TIER_LIST_TTL: Duration = Duration::from_secs(300);

/// 流水分页上限
const MAX_PAGE_LIMIT: i64 = 200;

/// 积分账本服务
pub struct LedgerService {
    tier_repo: Arc<dyn TierRepositoryTrait>,
    account_repo: Arc<dyn AccountRepositoryTrait>,
    transaction_repo: Arc<dyn PointsTransactionRepositoryTrait>,
    cache: Option<Arc<Cache>>,
    pool: PgPool,
}

impl LedgerService {
    pub fn new(
        tier_repo: Arc<dyn TierRepositoryTrait>,
        account_repo: Arc<dyn AccountRepositoryTrait>,
        transaction_repo: Arc<dyn PointsTransactionRepositoryTrait>,
        pool: PgPool,
    ) -> Self {
        Self {
            tier_repo,
            account_repo,
            transaction_repo,
            cache: None,
            pool,
        }
    }

    /// 使用 PostgreSQL 仓储构建
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(
            Arc::new(TierRepository::new(pool.clone())),
            Arc::new(AccountRepository::new(pool.clone())),
            Arc::new(PointsTransactionRepository::new(pool.clone())),
            pool,
        )
    }

    /// 启用等级列表缓存
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    // ==================== 积分写入 ====================

    /// 写入一笔积分流水并重算余额与等级
    ///
    /// 允许负数 delta，余额没有下限
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, delta = request.delta, transaction_type = %request.transaction_type)
    )]
    pub async fn award_points(&self, request: AwardPointsRequest) -> Result<AwardPointsResponse> {
        request.validate()?;

        let result = self.execute_award(&request).await;
        let status = if result.is_ok() { "success" } else { "failed" };
        metrics::record_points_transaction(request.transaction_type.as_str(), status);

        let response = result?;
        info!(
            user_id = %request.user_id,
            transaction_id = %response.transaction_id,
            balance = response.balance,
            tier_changed = response.tier_changed,
            "积分流水写入成功"
        );

        Ok(response)
    }

    /// 初始化账户（幂等）
    ///
    /// 新账户余额为 0，等级按余额 0 推导
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn initialize_account(&self, user_id: Uuid) -> Result<LoyaltyAccount> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let tiers = TierRepository::list_active_in_tx(&mut tx).await?;
        let tier_id = resolve_tier(&tiers, 0).map(|t| t.id);

        let created =
            AccountRepository::create_if_absent_in_tx(&mut tx, user_id, tier_id, now).await?;
        let account = AccountRepository::get_for_update(&mut tx, user_id)
            .await?
            .ok_or(RewardsError::AccountNotFound(user_id))?;

        tx.commit().await?;

        if created {
            info!(user_id = %user_id, tier_id = ?tier_id, "积分账户已创建");
        }

        Ok(account)
    }

    /// 按全部流水重算余额与等级
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn recalculate_tier(&self, user_id: Uuid) -> Result<Tier> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let previous = AccountRepository::get_for_update(&mut tx, user_id)
            .await?
            .ok_or(RewardsError::AccountNotFound(user_id))?;

        let (account, tier) = Self::recompute_in_tx(&mut tx, user_id, now).await?;
        let tier = tier.ok_or(RewardsError::NoActiveTier)?;

        tx.commit().await?;

        if previous.current_balance != account.current_balance || previous.tier_id != account.tier_id {
            warn!(
                user_id = %user_id,
                old_balance = previous.current_balance,
                new_balance = account.current_balance,
                tier = %tier.name,
                "重算后余额或等级发生变化"
            );
        }

        Ok(tier)
    }

    // ==================== 查询 ====================

    /// 查询余额
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_balance(&self, user_id: Uuid) -> Result<BalanceDto> {
        let account = self.require_account(user_id).await?;

        Ok(BalanceDto {
            user_id,
            balance: account.current_balance,
            balance_updated_at: account.balance_updated_at,
        })
    }

    /// 查询等级详情与升级进度
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_tier_info(&self, user_id: Uuid) -> Result<TierInfoDto> {
        let account = self.require_account(user_id).await?;
        let tiers = self.tier_repo.list_active().await?;
        let balance = account.current_balance;

        // 等级始终按余额与当前启用等级推导，账户上记录的等级可能落后于等级表的变更
        let tier = resolve_tier(&tiers, balance).ok_or(RewardsError::NoActiveTier)?;
        if account.tier_id != Some(tier.id) {
            match self.account_repo.sync_tier(user_id, balance, Some(tier.id)).await {
                Ok(true) => info!(
                    user_id = %user_id,
                    old_tier_id = ?account.tier_id,
                    tier = %tier.name,
                    "账户等级已按最新等级表校正"
                ),
                Ok(false) => {}
                Err(e) => warn!(user_id = %user_id, error = %e, "回写账户等级失败"),
            }
        }

        let next = next_tier(&tiers, tier);

        Ok(TierInfoDto {
            tier: tier.clone(),
            balance,
            next_tier: next.cloned(),
            points_to_next_tier: next.map(|n| (n.min_balance - balance).max(0)),
            progress_percentage: progress_percentage(balance, tier, next),
        })
    }

    /// 分页查询流水，最新的在前
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<TransactionPage> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = offset.max(0);

        let items = self
            .transaction_repo
            .list_by_user(user_id, limit, offset)
            .await?;
        let total = self.transaction_repo.count_by_user(user_id).await?;

        Ok(TransactionPage {
            items,
            total,
            limit,
            offset,
        })
    }

    // ==================== 等级管理 ====================

    /// 列出全部等级
    #[instrument(skip(self))]
    pub async fn list_tiers(&self) -> Result<Vec<Tier>> {
        let Some(cache) = &self.cache else {
            return self.tier_repo.list_all().await;
        };

        let tier_repo = self.tier_repo.clone();
        cache
            .get_or_set(&CacheKey::tier_list(), TIER_LIST_TTL, || async move {
                tier_repo.list_all().await
            })
            .await
    }

    /// 创建等级
    #[instrument(skip(self, request), fields(name = %request.name, min_balance = request.min_balance))]
    pub async fn create_tier(&self, request: CreateTierRequest) -> Result<Tier> {
        if request.name.trim().is_empty() {
            return Err(RewardsError::Validation("等级名称不能为空".to_string()));
        }

        let now = Utc::now();
        let tier = Tier {
            id: Uuid::now_v7(),
            name: request.name.trim().to_string(),
            min_balance: request.min_balance,
            sort_order: request.sort_order,
            color: request.color,
            benefits: request.benefits.unwrap_or_else(|| serde_json::json!([])),
            is_active: request.is_active,
            created_at: now,
            updated_at: now,
        };

        self.tier_repo.create(&tier).await?;
        self.invalidate_tier_cache().await;

        info!(tier_id = %tier.id, name = %tier.name, min_balance = tier.min_balance, "会员等级已创建");

        // 新门槛可能改变已有账户的等级；失败时由查询时推导兜底
        match self.account_repo.resync_tiers().await {
            Ok(changed) => info!(tier_id = %tier.id, changed, "已有账户等级已重算"),
            Err(e) => warn!(tier_id = %tier.id, error = %e, "重算已有账户等级失败"),
        }

        Ok(tier)
    }

    // ==================== 私有方法 ====================

    async fn require_account(&self, user_id: Uuid) -> Result<LoyaltyAccount> {
        self.account_repo
            .get(user_id)
            .await?
            .ok_or(RewardsError::AccountNotFound(user_id))
    }

    async fn execute_award(&self, request: &AwardPointsRequest) -> Result<AwardPointsResponse> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let previous = AccountRepository::get_for_update(&mut tx, request.user_id)
            .await?
            .ok_or(RewardsError::AccountNotFound(request.user_id))?;

        let transaction = PointsTransaction {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            delta: request.delta,
            transaction_type: request.transaction_type,
            description: request.description.clone(),
            reference_id: request.reference_id.clone(),
            admin_actor_id: request.admin_actor_id,
            admin_reason: request.admin_reason.clone(),
            expires_at: request.expires_at,
            created_at: now,
        };
        PointsTransactionRepository::create_in_tx(&mut tx, &transaction).await?;

        let (account, _) = Self::recompute_in_tx(&mut tx, request.user_id, now).await?;

        tx.commit().await?;

        Ok(AwardPointsResponse {
            transaction_id: transaction.id,
            balance: account.current_balance,
            tier_id: account.tier_id,
            tier_changed: previous.tier_id != account.tier_id,
        })
    }

    /// 在事务中按流水总和重算余额与等级并回写账户
    ///
    /// 调用方必须已持有账户行锁
    async fn recompute_in_tx(
        conn: &mut PgConnection,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(LoyaltyAccount, Option<Tier>)> {
        let balance = PointsTransactionRepository::sum_for_user_in_tx(conn, user_id).await?;
        let tiers = TierRepository::list_active_in_tx(conn).await?;
        let tier = resolve_tier(&tiers, balance).cloned();

        let account = AccountRepository::update_balance_and_tier_in_tx(
            conn,
            user_id,
            balance,
            tier.as_ref().map(|t| t.id),
            now,
        )
        .await?;

        Ok((account, tier))
    }

    async fn invalidate_tier_cache(&self) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache.delete(&CacheKey::tier_list()).await
        {
            warn!(error = %e, "清除等级缓存失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionType;
    use crate::repository::{
        MockAccountRepositoryTrait, MockPointsTransactionRepositoryTrait, MockTierRepositoryTrait,
    };
    use serde_json::json;

    fn tier(name: &str, min_balance: i64) -> Tier {
        Tier {
            id: Uuid::now_v7(),
            name: name.to_string(),
            min_balance,
            sort_order: 0,
            color: "#CD7F32".to_string(),
            benefits: json!([]),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn account(user_id: Uuid, balance: i64, tier_id: Option<Uuid>) -> LoyaltyAccount {
        LoyaltyAccount {
            user_id,
            current_balance: balance,
            tier_id,
            tier_updated_at: Utc::now(),
            balance_updated_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    fn service(
        tiers: MockTierRepositoryTrait,
        accounts: MockAccountRepositoryTrait,
        transactions: MockPointsTransactionRepositoryTrait,
    ) -> LedgerService {
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        LedgerService::new(
            Arc::new(tiers),
            Arc::new(accounts),
            Arc::new(transactions),
            pool,
        )
    }

    #[tokio::test]
    async fn test_get_balance_not_found() {
        let mut accounts = MockAccountRepositoryTrait::new();
        accounts.expect_get().returning(|_| Ok(None));

        let svc = service(
            MockTierRepositoryTrait::new(),
            accounts,
            MockPointsTransactionRepositoryTrait::new(),
        );

        let user_id = Uuid::now_v7();
        let result = svc.get_balance(user_id).await;
        assert!(matches!(result, Err(RewardsError::AccountNotFound(id)) if id == user_id));
    }

    #[tokio::test]
    async fn test_get_tier_info_progress() {
        let bronze = tier("Bronze", 0);
        let silver = tier("Silver", 1000);
        let gold = tier("Gold", 5000);
        let silver_id = silver.id;
        let all = vec![bronze, silver, gold];

        let mut tiers = MockTierRepositoryTrait::new();
        tiers.expect_list_active().returning(move || Ok(all.clone()));

        let user_id = Uuid::now_v7();
        let mut accounts = MockAccountRepositoryTrait::new();
        accounts
            .expect_get()
            .returning(move |id| Ok(Some(account(id, 3000, Some(silver_id)))));

        let svc = service(tiers, accounts, MockPointsTransactionRepositoryTrait::new());
        let info = svc.get_tier_info(user_id).await.unwrap();

        assert_eq!(info.tier.name, "Silver");
        assert_eq!(info.next_tier.as_ref().map(|t| t.name.as_str()), Some("Gold"));
        assert_eq!(info.points_to_next_tier, Some(2000));
        assert_eq!(info.progress_percentage, 50.0);
    }

    #[tokio::test]
    async fn test_get_tier_info_negative_balance_falls_to_lowest() {
        let all = vec![tier("Bronze", 0), tier("Silver", 1000)];

        let mut tiers = MockTierRepositoryTrait::new();
        tiers.expect_list_active().returning(move || Ok(all.clone()));

        let mut accounts = MockAccountRepositoryTrait::new();
        accounts
            .expect_get()
            .returning(|id| Ok(Some(account(id, -500, None))));
        accounts
            .expect_sync_tier()
            .times(1)
            .returning(|_, _, _| Ok(true));

        let svc = service(tiers, accounts, MockPointsTransactionRepositoryTrait::new());
        let info = svc.get_tier_info(Uuid::now_v7()).await.unwrap();

        assert_eq!(info.tier.name, "Bronze");
        assert_eq!(info.balance, -500);
        assert_eq!(info.points_to_next_tier, Some(1500));
        assert_eq!(info.progress_percentage, 0.0);
    }

    #[tokio::test]
    async fn test_get_tier_info_follows_tier_added_after_account() {
        // 账户停在 Bronze 之后，管理员新增了一个门槛更低的 Silver
        let bronze = tier("Bronze", 5000);
        let bronze_id = bronze.id;
        let silver = tier("Silver", 1000);
        let silver_id = silver.id;
        let all = vec![silver, bronze];

        let mut tiers = MockTierRepositoryTrait::new();
        tiers.expect_list_active().returning(move || Ok(all.clone()));

        let mut accounts = MockAccountRepositoryTrait::new();
        accounts
            .expect_get()
            .returning(move |id| Ok(Some(account(id, 3000, Some(bronze_id)))));
        accounts
            .expect_sync_tier()
            .withf(move |_, balance, tier_id| *balance == 3000 && *tier_id == Some(silver_id))
            .times(1)
            .returning(|_, _, _| Ok(true));

        let svc = service(tiers, accounts, MockPointsTransactionRepositoryTrait::new());
        let info = svc.get_tier_info(Uuid::now_v7()).await.unwrap();

        assert_eq!(info.tier.name, "Silver");
        assert_eq!(info.next_tier.as_ref().map(|t| t.name.as_str()), Some("Bronze"));
    }

    #[tokio::test]
    async fn test_get_tier_info_sync_failure_still_answers() {
        let all = vec![tier("Bronze", 0)];

        let mut tiers = MockTierRepositoryTrait::new();
        tiers.expect_list_active().returning(move || Ok(all.clone()));

        let mut accounts = MockAccountRepositoryTrait::new();
        accounts
            .expect_get()
            .returning(|id| Ok(Some(account(id, 10, None))));
        accounts
            .expect_sync_tier()
            .returning(|_, _, _| Err(RewardsError::StorageConflict));

        let svc = service(tiers, accounts, MockPointsTransactionRepositoryTrait::new());
        let info = svc.get_tier_info(Uuid::now_v7()).await.unwrap();
        assert_eq!(info.tier.name, "Bronze");
    }

    #[tokio::test]
    async fn test_get_tier_info_top_tier() {
        let platinum = tier("Platinum", 15000);
        let platinum_id = platinum.id;
        let all = vec![tier("Bronze", 0), platinum];

        let mut tiers = MockTierRepositoryTrait::new();
        tiers.expect_list_active().returning(move || Ok(all.clone()));

        let mut accounts = MockAccountRepositoryTrait::new();
        accounts
            .expect_get()
            .returning(move |id| Ok(Some(account(id, 20000, Some(platinum_id)))));

        let svc = service(tiers, accounts, MockPointsTransactionRepositoryTrait::new());
        let info = svc.get_tier_info(Uuid::now_v7()).await.unwrap();

        assert!(info.next_tier.is_none());
        assert!(info.points_to_next_tier.is_none());
        assert_eq!(info.progress_percentage, 100.0);
    }

    #[tokio::test]
    async fn test_get_transactions_clamps_paging() {
        let mut transactions = MockPointsTransactionRepositoryTrait::new();
        transactions
            .expect_list_by_user()
            .withf(|_, limit, offset| *limit == MAX_PAGE_LIMIT && *offset == 0)
            .returning(|_, _, _| Ok(vec![]));
        transactions.expect_count_by_user().returning(|_| Ok(0));

        let svc = service(
            MockTierRepositoryTrait::new(),
            MockAccountRepositoryTrait::new(),
            transactions,
        );

        let page = svc.get_transactions(Uuid::now_v7(), 10_000, -5).await.unwrap();
        assert_eq!(page.limit, MAX_PAGE_LIMIT);
        assert_eq!(page.offset, 0);
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_award_points_rejects_zero_delta_before_storage() {
        let svc = service(
            MockTierRepositoryTrait::new(),
            MockAccountRepositoryTrait::new(),
            MockPointsTransactionRepositoryTrait::new(),
        );

        let request = AwardPointsRequest::new(Uuid::now_v7(), 0, TransactionType::EarnedBonus);
        let result = svc.award_points(request).await;
        assert!(matches!(result, Err(RewardsError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_tier_maps_duplicate_threshold() {
        let mut tiers = MockTierRepositoryTrait::new();
        tiers
            .expect_create()
            .returning(|t| Err(RewardsError::DuplicateTierThreshold(t.min_balance)));

        let svc = service(
            tiers,
            MockAccountRepositoryTrait::new(),
            MockPointsTransactionRepositoryTrait::new(),
        );

        let result = svc
            .create_tier(CreateTierRequest {
                name: "Silver".to_string(),
                min_balance: 1000,
                sort_order: 2,
                color: "#C0C0C0".to_string(),
                benefits: None,
                is_active: true,
            })
            .await;

        assert!(matches!(result, Err(RewardsError::DuplicateTierThreshold(1000))));
    }

    #[tokio::test]
    async fn test_create_tier_resyncs_existing_accounts() {
        let mut tiers = MockTierRepositoryTrait::new();
        tiers.expect_create().times(1).returning(|_| Ok(()));

        let mut accounts = MockAccountRepositoryTrait::new();
        accounts.expect_resync_tiers().times(1).returning(|| Ok(3));

        let svc = service(tiers, accounts, MockPointsTransactionRepositoryTrait::new());
        let tier = svc
            .create_tier(CreateTierRequest {
                name: " Silver ".to_string(),
                min_balance: 1000,
                sort_order: 2,
                color: "#C0C0C0".to_string(),
                benefits: None,
                is_active: true,
            })
            .await
            .unwrap();

        assert_eq!(tier.name, "Silver");
    }
}
