//! 优惠券模板仓储
//!
//! expired/exhausted 不落库，按状态筛选时在 SQL 中用与 `CouponTemplate::resolved_status`
//! 相同的规则推导

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::traits::CouponTemplateRepositoryTrait;
use crate::error::{Result, RewardsError, is_foreign_key_violation, is_unique_violation};
use crate::models::{CouponTemplate, TemplateStatus};

const TEMPLATE_CODE_CONSTRAINT: &str = "uq_coupon_templates_code";

/// 优惠券模板仓储
pub struct CouponTemplateRepository {
    pool: PgPool,
}

impl CouponTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建模板
    ///
    /// 编码重复时返回 `DuplicateTemplateCode`
    pub async fn create(&self, template: &CouponTemplate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coupon_templates
                (id, code, name, description, terms_and_conditions, coupon_type, value, currency,
                 min_spend, max_discount, valid_from, valid_until, total_usage_cap,
                 per_user_usage_cap, used_count, status, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(template.id)
        .bind(&template.code)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.terms_and_conditions)
        .bind(template.coupon_type)
        .bind(template.value)
        .bind(&template.currency)
        .bind(template.min_spend)
        .bind(template.max_discount)
        .bind(template.valid_from)
        .bind(template.valid_until)
        .bind(template.total_usage_cap)
        .bind(template.per_user_usage_cap)
        .bind(template.used_count)
        .bind(template.status)
        .bind(template.created_by)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, Some(TEMPLATE_CODE_CONSTRAINT)) {
                RewardsError::DuplicateTemplateCode(template.code.clone())
            } else {
                RewardsError::from(e)
            }
        })?;

        Ok(())
    }

    /// 根据 ID 获取模板
    pub async fn get(&self, id: Uuid) -> Result<Option<CouponTemplate>> {
        let template = sqlx::query_as::<_, CouponTemplate>(
            r#"
            SELECT id, code, name, description, terms_and_conditions, coupon_type, value, currency,
                   min_spend, max_discount, valid_from, valid_until, total_usage_cap,
                   per_user_usage_cap, used_count, status, created_by, created_at, updated_at
            FROM coupon_templates
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }

    /// 获取模板并加行锁
    ///
    /// 签发与核销都在事务内锁定模板行，串行化同一模板上的上限校验
    pub async fn get_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<CouponTemplate>> {
        let template = sqlx::query_as::<_, CouponTemplate>(
            r#"
            SELECT id, code, name, description, terms_and_conditions, coupon_type, value, currency,
                   min_spend, max_discount, valid_from, valid_until, total_usage_cap,
                   per_user_usage_cap, used_count, status, created_by, created_at, updated_at
            FROM coupon_templates
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(template)
    }

    /// 分页列出模板，可按读取时状态筛选
    pub async fn list(
        &self,
        status: Option<TemplateStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CouponTemplate>> {
        let templates = sqlx::query_as::<_, CouponTemplate>(
            r#"
            SELECT id, code, name, description, terms_and_conditions, coupon_type, value, currency,
                   min_spend, max_discount, valid_from, valid_until, total_usage_cap,
                   per_user_usage_cap, used_count, status, created_by, created_at, updated_at
            FROM coupon_templates
            WHERE $1::varchar IS NULL
               OR (CASE
                       WHEN status = 'draft' THEN 'draft'
                       WHEN valid_until IS NOT NULL AND valid_until < $2 THEN 'expired'
                       WHEN total_usage_cap IS NOT NULL AND used_count >= total_usage_cap THEN 'exhausted'
                       ELSE status
                   END) = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(templates)
    }

    /// 按读取时状态统计模板数量
    pub async fn count(&self, status: Option<TemplateStatus>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM coupon_templates
            WHERE $1::varchar IS NULL
               OR (CASE
                       WHEN status = 'draft' THEN 'draft'
                       WHEN valid_until IS NOT NULL AND valid_until < $2 THEN 'expired'
                       WHEN total_usage_cap IS NOT NULL AND used_count >= total_usage_cap THEN 'exhausted'
                       ELSE status
                   END) = $1
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    /// 在事务中更新持久化状态
    pub async fn update_status_in_tx(
        conn: &mut PgConnection,
        id: Uuid,
        status: TemplateStatus,
        now: DateTime<Utc>,
    ) -> Result<CouponTemplate> {
        let template = sqlx::query_as::<_, CouponTemplate>(
            r#"
            UPDATE coupon_templates
            SET status = $2, updated_at = $3
            WHERE id = $1
            RETURNING id, code, name, description, terms_and_conditions, coupon_type, value, currency,
                      min_spend, max_discount, valid_from, valid_until, total_usage_cap,
                      per_user_usage_cap, used_count, status, created_by, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(now)
        .fetch_one(conn)
        .await?;

        Ok(template)
    }

    /// 在事务中改写可编辑字段，调用方应已持有行锁
    pub async fn update_in_tx(
        conn: &mut PgConnection,
        template: &CouponTemplate,
        now: DateTime<Utc>,
    ) -> Result<CouponTemplate> {
        let updated = sqlx::query_as::<_, CouponTemplate>(
            r#"
            UPDATE coupon_templates
            SET name = $2, description = $3, terms_and_conditions = $4, value = $5,
                currency = $6, min_spend = $7, max_discount = $8, valid_from = $9,
                valid_until = $10, total_usage_cap = $11, per_user_usage_cap = $12,
                updated_at = $13
            WHERE id = $1
            RETURNING id, code, name, description, terms_and_conditions, coupon_type, value, currency,
                      min_spend, max_discount, valid_from, valid_until, total_usage_cap,
                      per_user_usage_cap, used_count, status, created_by, created_at, updated_at
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.terms_and_conditions)
        .bind(template.value)
        .bind(&template.currency)
        .bind(template.min_spend)
        .bind(template.max_discount)
        .bind(template.valid_from)
        .bind(template.valid_until)
        .bind(template.total_usage_cap)
        .bind(template.per_user_usage_cap)
        .bind(now)
        .fetch_one(conn)
        .await?;

        Ok(updated)
    }

    /// 在事务中删除模板
    ///
    /// 仍被实例或发券配置引用时外键拒绝删除，映射为 `TemplateInUse`
    pub async fn delete_in_tx(conn: &mut PgConnection, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM coupon_templates WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    RewardsError::TemplateInUse(id)
                } else {
                    RewardsError::from(e)
                }
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// 在事务中累加核销次数
    pub async fn increment_used_count_in_tx(
        conn: &mut PgConnection,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE coupon_templates
            SET used_count = used_count + 1, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CouponTemplateRepositoryTrait for CouponTemplateRepository {
    async fn create(&self, template: &CouponTemplate) -> Result<()> {
        self.create(template).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<CouponTemplate>> {
        self.get(id).await
    }

    async fn list(
        &self,
        status: Option<TemplateStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CouponTemplate>> {
        self.list(status, limit, offset).await
    }

    async fn count(&self, status: Option<TemplateStatus>) -> Result<i64> {
        self.count(status).await
    }
}
