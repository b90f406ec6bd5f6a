//! 优惠券实例仓储
//!
//! 提供实例的签发写入、上限计数、核销与撤回，支持事务和行级锁

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection, PgPool, Row};
use uuid::Uuid;

use super::traits::CouponInstanceRepositoryTrait;
use crate::error::{Result, is_unique_violation};
use crate::models::{CouponInstance, InstanceStatus, WalletRow};

const REDEMPTION_CODE_CONSTRAINT: &str = "uq_coupon_instances_redemption_code";

/// 优惠券实例仓储
pub struct CouponInstanceRepository {
    pool: PgPool,
}

impl CouponInstanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询操作 ====================

    /// 根据 ID 获取实例
    pub async fn get(&self, id: Uuid) -> Result<Option<CouponInstance>> {
        let instance = sqlx::query_as::<_, CouponInstance>(
            r#"
            SELECT id, user_id, template_id, redemption_code, status, issued_at, instance_expiry,
                   used_at, used_by_actor, assigned_by_actor, assign_reason,
                   revoked_at, revoked_by, revoke_reason
            FROM coupon_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(instance)
    }

    /// 根据兑换码获取实例
    pub async fn get_by_code(&self, code: &str) -> Result<Option<CouponInstance>> {
        let instance = sqlx::query_as::<_, CouponInstance>(
            r#"
            SELECT id, user_id, template_id, redemption_code, status, issued_at, instance_expiry,
                   used_at, used_by_actor, assigned_by_actor, assign_reason,
                   revoked_at, revoked_by, revoke_reason
            FROM coupon_instances
            WHERE redemption_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(instance)
    }

    /// 获取实例并加行锁
    pub async fn get_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<CouponInstance>> {
        let instance = sqlx::query_as::<_, CouponInstance>(
            r#"
            SELECT id, user_id, template_id, redemption_code, status, issued_at, instance_expiry,
                   used_at, used_by_actor, assigned_by_actor, assign_reason,
                   revoked_at, revoked_by, revoke_reason
            FROM coupon_instances
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(instance)
    }

    /// 用户钱包：实例关联模板信息，最新签发的在前
    pub async fn list_wallet(&self, user_id: Uuid) -> Result<Vec<WalletRow>> {
        let rows = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT ci.id, ci.template_id, ci.redemption_code, ci.status, ci.issued_at,
                   ci.instance_expiry, ci.used_at,
                   ct.code AS template_code, ct.name, ct.description, ct.terms_and_conditions,
                   ct.coupon_type, ct.value, ct.currency, ct.min_spend, ct.max_discount,
                   ct.valid_until AS template_valid_until
            FROM coupon_instances ci
            JOIN coupon_templates ct ON ct.id = ci.template_id
            WHERE ci.user_id = $1
            ORDER BY ci.issued_at DESC, ci.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// 模板下的实例，最新签发的在前
    ///
    /// 返回的 status 为读取时状态：到期未用的 available 呈现为 expired，筛选同样作用于读取时状态
    pub async fn list_by_template(
        &self,
        template_id: Uuid,
        status: Option<InstanceStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CouponInstance>> {
        let instances = sqlx::query_as::<_, CouponInstance>(
            r#"
            SELECT ci.id, ci.user_id, ci.template_id, ci.redemption_code,
                   (CASE
                        WHEN ci.status = 'available'
                         AND LEAST(ci.instance_expiry, ct.valid_until) <= $2 THEN 'expired'
                        ELSE ci.status
                    END) AS status,
                   ci.issued_at, ci.instance_expiry, ci.used_at, ci.used_by_actor,
                   ci.assigned_by_actor, ci.assign_reason,
                   ci.revoked_at, ci.revoked_by, ci.revoke_reason
            FROM coupon_instances ci
            JOIN coupon_templates ct ON ct.id = ci.template_id
            WHERE ci.template_id = $1
              AND ($3::varchar IS NULL
                   OR (CASE
                           WHEN ci.status = 'available'
                            AND LEAST(ci.instance_expiry, ct.valid_until) <= $2 THEN 'expired'
                           ELSE ci.status
                       END) = $3)
            ORDER BY ci.issued_at DESC, ci.id DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(template_id)
        .bind(Utc::now())
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(instances)
    }

    /// 按读取时状态统计模板下的实例数
    pub async fn count_by_template(
        &self,
        template_id: Uuid,
        status: Option<InstanceStatus>,
    ) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM coupon_instances ci
            JOIN coupon_templates ct ON ct.id = ci.template_id
            WHERE ci.template_id = $1
              AND ($3::varchar IS NULL
                   OR (CASE
                           WHEN ci.status = 'available'
                            AND LEAST(ci.instance_expiry, ct.valid_until) <= $2 THEN 'expired'
                           ELSE ci.status
                       END) = $3)
            "#,
        )
        .bind(template_id)
        .bind(Utc::now())
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    /// 在事务中统计模板下的全部实例（任意状态）
    pub async fn count_by_template_in_tx(
        conn: &mut PgConnection,
        template_id: Uuid,
    ) -> Result<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM coupon_instances WHERE template_id = $1")
                .bind(template_id)
                .fetch_one(conn)
                .await?;

        Ok(total)
    }

    // ==================== 上限计数 ====================

    /// 用户在该模板上已占用的名额（available + used）
    pub async fn count_user_claims(&self, user_id: Uuid, template_id: Uuid) -> Result<i64> {
        let row = Self::count_user_claims_query(user_id, template_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("claims"))
    }

    /// 在事务中统计用户已占用的名额
    pub async fn count_user_claims_in_tx(
        conn: &mut PgConnection,
        user_id: Uuid,
        template_id: Uuid,
    ) -> Result<i64> {
        let row = Self::count_user_claims_query(user_id, template_id)
            .fetch_one(conn)
            .await?;

        Ok(row.get("claims"))
    }

    /// 模板上未过期的 available 实例数（已签发未核销的名额）
    pub async fn count_outstanding(&self, template_id: Uuid) -> Result<i64> {
        let row = Self::count_outstanding_query(template_id, Utc::now())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("outstanding"))
    }

    /// 在事务中统计未核销名额
    pub async fn count_outstanding_in_tx(
        conn: &mut PgConnection,
        template_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let row = Self::count_outstanding_query(template_id, now)
            .fetch_one(conn)
            .await?;

        Ok(row.get("outstanding"))
    }

    fn count_user_claims_query(
        user_id: Uuid,
        template_id: Uuid,
    ) -> sqlx::query::Query<'static, sqlx::Postgres, sqlx::postgres::PgArguments> {
        sqlx::query(
            r#"
            SELECT COUNT(*) AS claims
            FROM coupon_instances
            WHERE user_id = $1 AND template_id = $2 AND status IN ('available', 'used')
            "#,
        )
        .bind(user_id)
        .bind(template_id)
    }

    fn count_outstanding_query(
        template_id: Uuid,
        now: DateTime<Utc>,
    ) -> sqlx::query::Query<'static, sqlx::Postgres, sqlx::postgres::PgArguments> {
        sqlx::query(
            r#"
            SELECT COUNT(*) AS outstanding
            FROM coupon_instances
            WHERE template_id = $1
              AND status = 'available'
              AND (instance_expiry IS NULL OR instance_expiry > $2)
            "#,
        )
        .bind(template_id)
        .bind(now)
    }

    // ==================== 写操作 ====================

    /// 在事务中尝试写入实例
    ///
    /// 写入在保存点内执行：兑换码冲突时回滚到保存点并返回 `false`，外层事务保持可用
    pub async fn try_insert_in_tx(
        conn: &mut PgConnection,
        instance: &CouponInstance,
    ) -> Result<bool> {
        let mut savepoint = conn.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO coupon_instances
                (id, user_id, template_id, redemption_code, status, issued_at, instance_expiry,
                 assigned_by_actor, assign_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(instance.id)
        .bind(instance.user_id)
        .bind(instance.template_id)
        .bind(&instance.redemption_code)
        .bind(instance.status)
        .bind(instance.issued_at)
        .bind(instance.instance_expiry)
        .bind(instance.assigned_by_actor)
        .bind(&instance.assign_reason)
        .execute(&mut *savepoint)
        .await;

        match result {
            Ok(_) => {
                savepoint.commit().await?;
                Ok(true)
            }
            Err(e) if is_unique_violation(&e, Some(REDEMPTION_CODE_CONSTRAINT)) => {
                savepoint.rollback().await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 在事务中标记为已使用
    pub async fn mark_used_in_tx(
        conn: &mut PgConnection,
        id: Uuid,
        actor: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<CouponInstance> {
        let instance = sqlx::query_as::<_, CouponInstance>(
            r#"
            UPDATE coupon_instances
            SET status = 'used', used_at = $2, used_by_actor = $3
            WHERE id = $1
            RETURNING id, user_id, template_id, redemption_code, status, issued_at, instance_expiry,
                      used_at, used_by_actor, assigned_by_actor, assign_reason,
                      revoked_at, revoked_by, revoke_reason
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(actor)
        .fetch_one(conn)
        .await?;

        Ok(instance)
    }

    /// 在事务中撤回
    pub async fn revoke_in_tx(
        conn: &mut PgConnection,
        id: Uuid,
        actor: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CouponInstance> {
        let instance = sqlx::query_as::<_, CouponInstance>(
            r#"
            UPDATE coupon_instances
            SET status = 'revoked', revoked_at = $2, revoked_by = $3, revoke_reason = $4
            WHERE id = $1
            RETURNING id, user_id, template_id, redemption_code, status, issued_at, instance_expiry,
                      used_at, used_by_actor, assigned_by_actor, assign_reason,
                      revoked_at, revoked_by, revoke_reason
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(actor)
        .bind(reason)
        .fetch_one(conn)
        .await?;

        Ok(instance)
    }
}

#[async_trait]
impl CouponInstanceRepositoryTrait for CouponInstanceRepository {
    async fn get(&self, id: Uuid) -> Result<Option<CouponInstance>> {
        self.get(id).await
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<CouponInstance>> {
        self.get_by_code(code).await
    }

    async fn list_wallet(&self, user_id: Uuid) -> Result<Vec<WalletRow>> {
        self.list_wallet(user_id).await
    }

    async fn count_user_claims(&self, user_id: Uuid, template_id: Uuid) -> Result<i64> {
        self.count_user_claims(user_id, template_id).await
    }

    async fn count_outstanding(&self, template_id: Uuid) -> Result<i64> {
        self.count_outstanding(template_id).await
    }

    async fn list_by_template(
        &self,
        template_id: Uuid,
        status: Option<InstanceStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CouponInstance>> {
        self.list_by_template(template_id, status, limit, offset)
            .await
    }

    async fn count_by_template(
        &self,
        template_id: Uuid,
        status: Option<InstanceStatus>,
    ) -> Result<i64> {
        self.count_by_template(template_id, status).await
    }
}
