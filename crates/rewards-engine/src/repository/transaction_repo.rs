//! 积分流水仓储
//!
//! 流水只追加；余额始终由全量流水求和得到

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::traits::PointsTransactionRepositoryTrait;
use crate::error::Result;
use crate::models::PointsTransaction;

/// 积分流水仓储
pub struct PointsTransactionRepository {
    pool: PgPool,
}

impl PointsTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中追加流水
    pub async fn create_in_tx(conn: &mut PgConnection, txn: &PointsTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO points_transactions
                (id, user_id, delta, transaction_type, description, reference_id,
                 admin_actor_id, admin_reason, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(txn.id)
        .bind(txn.user_id)
        .bind(txn.delta)
        .bind(txn.transaction_type)
        .bind(&txn.description)
        .bind(&txn.reference_id)
        .bind(txn.admin_actor_id)
        .bind(&txn.admin_reason)
        .bind(txn.expires_at)
        .bind(txn.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// 在事务中对用户全部流水求和
    pub async fn sum_for_user_in_tx(conn: &mut PgConnection, user_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(delta), 0)::BIGINT AS balance
            FROM points_transactions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(conn)
        .await?;

        Ok(row.get("balance"))
    }

    /// 分页列出用户流水，最新的在前
    pub async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PointsTransaction>> {
        let items = sqlx::query_as::<_, PointsTransaction>(
            r#"
            SELECT id, user_id, delta, transaction_type, description, reference_id,
                   admin_actor_id, admin_reason, expires_at, created_at
            FROM points_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// 用户流水总数
    pub async fn count_by_user(&self, user_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM points_transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("total"))
    }
}

#[async_trait]
impl PointsTransactionRepositoryTrait for PointsTransactionRepository {
    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PointsTransaction>> {
        self.list_by_user(user_id, limit, offset).await
    }

    async fn count_by_user(&self, user_id: Uuid) -> Result<i64> {
        self.count_by_user(user_id).await
    }
}
