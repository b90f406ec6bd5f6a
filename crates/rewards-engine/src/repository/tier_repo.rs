//! 会员等级仓储

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use super::traits::TierRepositoryTrait;
use crate::error::{Result, RewardsError, is_unique_violation};
use crate::models::Tier;

/// 启用等级门槛的部分唯一索引
const ACTIVE_MIN_BALANCE_INDEX: &str = "uq_loyalty_tiers_active_min_balance";

/// 会员等级仓储
pub struct TierRepository {
    pool: PgPool,
}

impl TierRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 列出全部等级，按门槛升序
    pub async fn list_all(&self) -> Result<Vec<Tier>> {
        let tiers = sqlx::query_as::<_, Tier>(
            r#"
            SELECT id, name, min_balance, sort_order, color, benefits, is_active,
                   created_at, updated_at
            FROM loyalty_tiers
            ORDER BY min_balance, sort_order
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tiers)
    }

    /// 列出启用中的等级，按门槛升序
    pub async fn list_active(&self) -> Result<Vec<Tier>> {
        let tiers = sqlx::query_as::<_, Tier>(
            r#"
            SELECT id, name, min_balance, sort_order, color, benefits, is_active,
                   created_at, updated_at
            FROM loyalty_tiers
            WHERE is_active
            ORDER BY min_balance
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tiers)
    }

    /// 在事务中列出启用中的等级
    pub async fn list_active_in_tx(conn: &mut PgConnection) -> Result<Vec<Tier>> {
        let tiers = sqlx::query_as::<_, Tier>(
            r#"
            SELECT id, name, min_balance, sort_order, color, benefits, is_active,
                   created_at, updated_at
            FROM loyalty_tiers
            WHERE is_active
            ORDER BY min_balance
            "#,
        )
        .fetch_all(conn)
        .await?;

        Ok(tiers)
    }

    /// 创建等级
    ///
    /// 启用中的等级门槛重复时返回 `DuplicateTierThreshold`
    pub async fn create(&self, tier: &Tier) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loyalty_tiers
                (id, name, min_balance, sort_order, color, benefits, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tier.id)
        .bind(&tier.name)
        .bind(tier.min_balance)
        .bind(tier.sort_order)
        .bind(&tier.color)
        .bind(&tier.benefits)
        .bind(tier.is_active)
        .bind(tier.created_at)
        .bind(tier.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, Some(ACTIVE_MIN_BALANCE_INDEX)) {
                RewardsError::DuplicateTierThreshold(tier.min_balance)
            } else {
                RewardsError::from(e)
            }
        })?;

        Ok(())
    }
}

#[async_trait]
impl TierRepositoryTrait for TierRepository {
    async fn list_all(&self) -> Result<Vec<Tier>> {
        self.list_all().await
    }

    async fn list_active(&self) -> Result<Vec<Tier>> {
        self.list_active().await
    }

    async fn create(&self, tier: &Tier) -> Result<()> {
        self.create(tier).await
    }
}
