//! 积分账户仓储
//!
//! 账户行是积分写入的串行化点：所有追加流水的事务先对账户行加锁

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::AccountRepositoryTrait;
use crate::error::Result;
use crate::models::LoyaltyAccount;

/// 按 `a.current_balance` 推导等级：门槛不超过余额的最高启用等级，余额低于所有门槛时取最低等级
const RESOLVED_TIER_SQL: &str = r#"
    COALESCE(
        (SELECT t.id FROM loyalty_tiers t
         WHERE t.is_active AND t.min_balance <= a.current_balance
         ORDER BY t.min_balance DESC LIMIT 1),
        (SELECT t.id FROM loyalty_tiers t
         WHERE t.is_active
         ORDER BY t.min_balance LIMIT 1)
    )
"#;

/// 积分账户仓储
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取账户
    pub async fn get(&self, user_id: Uuid) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            SELECT user_id, current_balance, tier_id, tier_updated_at, balance_updated_at, created_at
            FROM loyalty_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// 获取账户并加行锁
    ///
    /// 使用 FOR UPDATE 串行化同一用户的并发积分写入
    pub async fn get_for_update(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            SELECT user_id, current_balance, tier_id, tier_updated_at, balance_updated_at, created_at
            FROM loyalty_accounts
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(conn)
        .await?;

        Ok(account)
    }

    /// 在事务中创建账户（已存在则不做任何事）
    ///
    /// 返回是否为新建
    pub async fn create_if_absent_in_tx(
        conn: &mut PgConnection,
        user_id: Uuid,
        tier_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO loyalty_accounts
                (user_id, current_balance, tier_id, tier_updated_at, balance_updated_at, created_at)
            VALUES ($1, 0, $2, $3, $3, $3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(tier_id)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 在事务中写回重算后的余额与等级
    ///
    /// 等级变化时才刷新 tier_updated_at
    pub async fn update_balance_and_tier_in_tx(
        conn: &mut PgConnection,
        user_id: Uuid,
        balance: i64,
        tier_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<LoyaltyAccount> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            UPDATE loyalty_accounts
            SET current_balance = $2,
                tier_updated_at = CASE WHEN tier_id IS DISTINCT FROM $3 THEN $4 ELSE tier_updated_at END,
                tier_id = $3,
                balance_updated_at = $4
            WHERE user_id = $1
            RETURNING user_id, current_balance, tier_id, tier_updated_at, balance_updated_at, created_at
            "#,
        )
        .bind(user_id)
        .bind(balance)
        .bind(tier_id)
        .bind(now)
        .fetch_one(conn)
        .await?;

        Ok(account)
    }

    /// 改写单个账户的等级
    ///
    /// 以读取时的余额为条件，期间有新的积分写入时放弃，由那次写入负责推导等级
    pub async fn sync_tier(
        &self,
        user_id: Uuid,
        expected_balance: i64,
        tier_id: Option<Uuid>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE loyalty_accounts
            SET tier_id = $3, tier_updated_at = NOW()
            WHERE user_id = $1
              AND current_balance = $2
              AND tier_id IS DISTINCT FROM $3
            "#,
        )
        .bind(user_id)
        .bind(expected_balance)
        .bind(tier_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 等级表变化后批量重算账户等级
    ///
    /// 推导表达式引用目标行的余额，与积分写入并发时按最新余额重新求值
    pub async fn resync_tiers(&self) -> Result<u64> {
        let sql = format!(
            r#"
            UPDATE loyalty_accounts a
            SET tier_id = {resolved},
                tier_updated_at = NOW()
            WHERE a.tier_id IS DISTINCT FROM {resolved}
            "#,
            resolved = RESOLVED_TIER_SQL,
        );

        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AccountRepositoryTrait for AccountRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<LoyaltyAccount>> {
        self.get(user_id).await
    }

    async fn sync_tier(
        &self,
        user_id: Uuid,
        expected_balance: i64,
        tier_id: Option<Uuid>,
    ) -> Result<bool> {
        self.sync_tier(user_id, expected_balance, tier_id).await
    }

    async fn resync_tiers(&self) -> Result<u64> {
        self.resync_tiers().await
    }
}
