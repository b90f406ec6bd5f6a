//! 问卷发券配置与奖励记录仓储

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::traits::SurveyAssignmentRepositoryTrait;
use crate::error::{Result, RewardsError, is_unique_violation};
use crate::models::{SurveyCouponAssignment, SurveyRewardHistoryEntry, SurveyRewardRecord};

const ASSIGNMENT_CONSTRAINT: &str = "uq_survey_coupon_assignments";

/// 问卷发券仓储
pub struct SurveyAssignmentRepository {
    pool: PgPool,
}

impl SurveyAssignmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 发券配置 ====================

    /// 创建发券配置
    ///
    /// 同一问卷重复配置同一模板时返回 `DuplicateAssignment`
    pub async fn create(&self, assignment: &SurveyCouponAssignment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO survey_coupon_assignments
                (id, survey_id, template_id, award_limit, awards_given, custom_expiry_days,
                 is_active, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.survey_id)
        .bind(assignment.template_id)
        .bind(assignment.award_limit)
        .bind(assignment.awards_given)
        .bind(assignment.custom_expiry_days)
        .bind(assignment.is_active)
        .bind(assignment.created_by)
        .bind(assignment.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, Some(ASSIGNMENT_CONSTRAINT)) {
                RewardsError::DuplicateAssignment {
                    survey_id: assignment.survey_id,
                    template_id: assignment.template_id,
                }
            } else {
                RewardsError::from(e)
            }
        })?;

        Ok(())
    }

    /// 根据 ID 获取配置
    pub async fn get(&self, id: Uuid) -> Result<Option<SurveyCouponAssignment>> {
        let assignment = sqlx::query_as::<_, SurveyCouponAssignment>(
            r#"
            SELECT id, survey_id, template_id, award_limit, awards_given, custom_expiry_days,
                   is_active, created_by, created_at
            FROM survey_coupon_assignments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }

    /// 列出问卷的全部配置
    pub async fn list_by_survey(&self, survey_id: Uuid) -> Result<Vec<SurveyCouponAssignment>> {
        let assignments = sqlx::query_as::<_, SurveyCouponAssignment>(
            r#"
            SELECT id, survey_id, template_id, award_limit, awards_given, custom_expiry_days,
                   is_active, created_by, created_at
            FROM survey_coupon_assignments
            WHERE survey_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(assignments)
    }

    /// 列出仍可发放的配置
    pub async fn list_eligible(&self, survey_id: Uuid) -> Result<Vec<SurveyCouponAssignment>> {
        let assignments = sqlx::query_as::<_, SurveyCouponAssignment>(
            r#"
            SELECT id, survey_id, template_id, award_limit, awards_given, custom_expiry_days,
                   is_active, created_by, created_at
            FROM survey_coupon_assignments
            WHERE survey_id = $1
              AND is_active
              AND (award_limit IS NULL OR awards_given < award_limit)
            ORDER BY created_at, id
            "#,
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(assignments)
    }

    /// 停用配置，返回是否有行被更新
    pub async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE survey_coupon_assignments SET is_active = FALSE WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 修改配置，未提供的字段保持原值
    ///
    /// 新上限低于已发放张数时不更新，与配置不存在一样返回 `None`
    pub async fn update(
        &self,
        id: Uuid,
        award_limit: Option<i32>,
        custom_expiry_days: Option<i32>,
        is_active: Option<bool>,
    ) -> Result<Option<SurveyCouponAssignment>> {
        let assignment = sqlx::query_as::<_, SurveyCouponAssignment>(
            r#"
            UPDATE survey_coupon_assignments
            SET award_limit = COALESCE($2, award_limit),
                custom_expiry_days = COALESCE($3, custom_expiry_days),
                is_active = COALESCE($4, is_active)
            WHERE id = $1
              AND ($2::int IS NULL OR awards_given <= $2)
            RETURNING id, survey_id, template_id, award_limit, awards_given, custom_expiry_days,
                      is_active, created_by, created_at
            "#,
        )
        .bind(id)
        .bind(award_limit)
        .bind(custom_expiry_days)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }

    /// 在事务中统计引用该模板的配置数
    pub async fn count_by_template_in_tx(
        conn: &mut PgConnection,
        template_id: Uuid,
    ) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM survey_coupon_assignments WHERE template_id = $1",
        )
        .bind(template_id)
        .fetch_one(conn)
        .await?;

        Ok(total)
    }

    /// 获取配置并加行锁
    pub async fn get_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<SurveyCouponAssignment>> {
        let assignment = sqlx::query_as::<_, SurveyCouponAssignment>(
            r#"
            SELECT id, survey_id, template_id, award_limit, awards_given, custom_expiry_days,
                   is_active, created_by, created_at
            FROM survey_coupon_assignments
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(assignment)
    }

    /// 在事务中累加已发放张数
    pub async fn increment_awards_in_tx(conn: &mut PgConnection, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE survey_coupon_assignments SET awards_given = awards_given + 1 WHERE id = $1",
        )
        .bind(id)
        .execute(conn)
        .await?;

        Ok(())
    }

    // ==================== 奖励记录 ====================

    /// 该回答是否已通过此配置领取
    pub async fn reward_exists(&self, response_id: Uuid, assignment_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM survey_reward_records
                WHERE response_id = $1 AND assignment_id = $2
            ) AS rewarded
            "#,
        )
        .bind(response_id)
        .bind(assignment_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("rewarded"))
    }

    /// 在事务中检查奖励记录，调用方应已持有配置行锁
    pub async fn reward_exists_in_tx(
        conn: &mut PgConnection,
        response_id: Uuid,
        assignment_id: Uuid,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM survey_reward_records
                WHERE response_id = $1 AND assignment_id = $2
            )
            "#,
        )
        .bind(response_id)
        .bind(assignment_id)
        .fetch_one(conn)
        .await?;

        Ok(exists)
    }

    /// 问卷奖励历史，最新的在前
    pub async fn list_rewards_by_survey(
        &self,
        survey_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SurveyRewardHistoryEntry>> {
        let entries = sqlx::query_as::<_, SurveyRewardHistoryEntry>(
            r#"
            SELECT r.id, r.response_id, r.assignment_id, a.template_id, r.instance_id,
                   ci.redemption_code, ci.status AS instance_status, r.user_id, r.created_at
            FROM survey_reward_records r
            JOIN survey_coupon_assignments a ON a.id = r.assignment_id
            JOIN coupon_instances ci ON ci.id = r.instance_id
            WHERE a.survey_id = $1
            ORDER BY r.created_at DESC, r.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(survey_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// 问卷奖励记录总数
    pub async fn count_rewards_by_survey(&self, survey_id: Uuid) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM survey_reward_records r
            JOIN survey_coupon_assignments a ON a.id = r.assignment_id
            WHERE a.survey_id = $1
            "#,
        )
        .bind(survey_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    /// 在事务中写入奖励记录
    ///
    /// 返回 `false` 表示 (response_id, assignment_id) 已存在，调用方应回滚整个事务
    pub async fn try_create_reward_in_tx(
        conn: &mut PgConnection,
        record: &SurveyRewardRecord,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO survey_reward_records
                (id, response_id, assignment_id, instance_id, user_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT uq_survey_reward_records DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.response_id)
        .bind(record.assignment_id)
        .bind(record.instance_id)
        .bind(record.user_id)
        .bind(record.created_at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SurveyAssignmentRepositoryTrait for SurveyAssignmentRepository {
    async fn get(&self, id: Uuid) -> Result<Option<SurveyCouponAssignment>> {
        self.get(id).await
    }

    async fn list_by_survey(&self, survey_id: Uuid) -> Result<Vec<SurveyCouponAssignment>> {
        self.list_by_survey(survey_id).await
    }

    async fn list_eligible(&self, survey_id: Uuid) -> Result<Vec<SurveyCouponAssignment>> {
        self.list_eligible(survey_id).await
    }

    async fn create(&self, assignment: &SurveyCouponAssignment) -> Result<()> {
        self.create(assignment).await
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        self.deactivate(id).await
    }

    async fn update(
        &self,
        id: Uuid,
        award_limit: Option<i32>,
        custom_expiry_days: Option<i32>,
        is_active: Option<bool>,
    ) -> Result<Option<SurveyCouponAssignment>> {
        self.update(id, award_limit, custom_expiry_days, is_active)
            .await
    }

    async fn reward_exists(&self, response_id: Uuid, assignment_id: Uuid) -> Result<bool> {
        self.reward_exists(response_id, assignment_id).await
    }

    async fn list_rewards_by_survey(
        &self,
        survey_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SurveyRewardHistoryEntry>> {
        self.list_rewards_by_survey(survey_id, limit, offset).await
    }

    async fn count_rewards_by_survey(&self, survey_id: Uuid) -> Result<i64> {
        self.count_rewards_by_survey(survey_id).await
    }
}
