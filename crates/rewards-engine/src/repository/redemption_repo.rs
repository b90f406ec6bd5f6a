//! 核销记录仓储

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::RedemptionRecordRepositoryTrait;
use crate::error::{Result, RewardsError, is_unique_violation};
use crate::models::RedemptionRecord;

const INSTANCE_CONSTRAINT: &str = "uq_redemption_records_instance";

/// 核销记录仓储
pub struct RedemptionRecordRepository {
    pool: PgPool,
}

impl RedemptionRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取实例的核销记录
    pub async fn get_by_instance(&self, instance_id: Uuid) -> Result<Option<RedemptionRecord>> {
        let record = sqlx::query_as::<_, RedemptionRecord>(
            r#"
            SELECT id, instance_id, original_amount, discount_amount, final_amount,
                   reference, channel, staff_actor_id, location, created_at
            FROM redemption_records
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// 模板下的核销记录，最新的在前
    pub async fn list_by_template(
        &self,
        template_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RedemptionRecord>> {
        let records = sqlx::query_as::<_, RedemptionRecord>(
            r#"
            SELECT r.id, r.instance_id, r.original_amount, r.discount_amount, r.final_amount,
                   r.reference, r.channel, r.staff_actor_id, r.location, r.created_at
            FROM redemption_records r
            JOIN coupon_instances ci ON ci.id = r.instance_id
            WHERE ci.template_id = $1
            ORDER BY r.created_at DESC, r.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(template_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// 模板下的核销记录总数
    pub async fn count_by_template(&self, template_id: Uuid) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM redemption_records r
            JOIN coupon_instances ci ON ci.id = r.instance_id
            WHERE ci.template_id = $1
            "#,
        )
        .bind(template_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    /// 在事务中写入核销记录
    ///
    /// 同一实例重复写入违反唯一约束，映射为 `AlreadyUsed`
    pub async fn create_in_tx(
        conn: &mut PgConnection,
        record: &RedemptionRecord,
        redemption_code: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO redemption_records
                (id, instance_id, original_amount, discount_amount, final_amount,
                 reference, channel, staff_actor_id, location, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.instance_id)
        .bind(record.original_amount)
        .bind(record.discount_amount)
        .bind(record.final_amount)
        .bind(&record.reference)
        .bind(&record.channel)
        .bind(record.staff_actor_id)
        .bind(&record.location)
        .bind(record.created_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, Some(INSTANCE_CONSTRAINT)) {
                RewardsError::AlreadyUsed(redemption_code.to_string())
            } else {
                RewardsError::from(e)
            }
        })?;

        Ok(())
    }
}

#[async_trait]
impl RedemptionRecordRepositoryTrait for RedemptionRecordRepository {
    async fn get_by_instance(&self, instance_id: Uuid) -> Result<Option<RedemptionRecord>> {
        self.get_by_instance(instance_id).await
    }

    async fn list_by_template(
        &self,
        template_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RedemptionRecord>> {
        self.list_by_template(template_id, limit, offset).await
    }

    async fn count_by_template(&self, template_id: Uuid) -> Result<i64> {
        self.count_by_template(template_id).await
    }
}
