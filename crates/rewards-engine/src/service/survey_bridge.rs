//! 问卷完成发券桥接
//!
//! 问卷回答从进行中变为已完成时触发。完成信号可能重复到达，处理必须幂等：
//!
//! 1. 加载问卷下启用中且未达上限的发券配置
//! 2. 逐个配置检查 (response_id, assignment_id) 是否已有奖励记录，有则跳过
//! 3. 否则在一个事务内：锁定配置 -> 复核奖励记录与上限 -> 签发优惠券 -> 写入奖励记录 -> 累加发放数
//!
//! 单个配置失败（上限、模板不可用等）只记录日志，不影响其他配置。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use loyalty_shared::observability::metrics;

use crate::error::{Result, RewardsError};
use crate::models::{
    AssignmentOutcome, AssignmentResult, SurveyCouponAssignment, SurveyRewardHistoryEntry,
    SurveyRewardRecord, SurveyRewardSummary,
};
use crate::repository::{
    CouponTemplateRepository, CouponTemplateRepositoryTrait, SurveyAssignmentRepository,
    SurveyAssignmentRepositoryTrait,
};
use crate::service::dto::{
    CreateAssignmentRequest, IssueCouponRequest, PageWindow, Paged, UpdateAssignmentRequest,
};
use crate::service::issue_service::IssueService;

/// 问卷发券的签发原因
const SURVEY_REWARD_REASON: &str = "survey completion";

/// 单个发券配置的事务性发放
///
/// 拆成 trait 便于在不连接数据库的情况下测试编排逻辑
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssignmentRewarder: Send + Sync {
    /// 在一个事务内签发优惠券并写入奖励记录
    async fn reward(
        &self,
        assignment: &SurveyCouponAssignment,
        response_id: Uuid,
        user_id: Uuid,
    ) -> Result<AssignmentOutcome>;
}

/// 基于 PostgreSQL 事务的发放实现
pub struct PgAssignmentRewarder {
    pool: PgPool,
    max_code_attempts: u32,
}

impl PgAssignmentRewarder {
    pub fn new(pool: PgPool, max_code_attempts: u32) -> Self {
        Self {
            pool,
            max_code_attempts,
        }
    }
}

#[async_trait]
impl AssignmentRewarder for PgAssignmentRewarder {
    async fn reward(
        &self,
        assignment: &SurveyCouponAssignment,
        response_id: Uuid,
        user_id: Uuid,
    ) -> Result<AssignmentOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // 先锁配置行：同一配置上的重复事件在此串行，后到者能看到先到者的奖励记录
        let locked = SurveyAssignmentRepository::get_for_update(&mut tx, assignment.id)
            .await?
            .ok_or(RewardsError::AssignmentNotFound(assignment.id))?;

        if SurveyAssignmentRepository::reward_exists_in_tx(&mut tx, response_id, assignment.id)
            .await?
        {
            tx.rollback().await?;
            return Ok(AssignmentOutcome::AlreadyRewarded);
        }
        if !locked.has_capacity() {
            return Err(RewardsError::AwardLimitReached(assignment.id));
        }

        let request = IssueCouponRequest::new(assignment.template_id, user_id)
            .with_reason(SURVEY_REWARD_REASON)
            .with_custom_expiry_days(locked.custom_expiry_days);
        let instance =
            IssueService::issue_in_tx(&mut tx, &request, self.max_code_attempts, now).await?;

        let record = SurveyRewardRecord {
            id: Uuid::now_v7(),
            response_id,
            assignment_id: assignment.id,
            instance_id: instance.id,
            user_id,
            created_at: now,
        };
        if !SurveyAssignmentRepository::try_create_reward_in_tx(&mut tx, &record).await? {
            // 唯一约束兜底，正常情况下已被行锁内的复核拦住
            tx.rollback().await?;
            return Ok(AssignmentOutcome::AlreadyRewarded);
        }

        SurveyAssignmentRepository::increment_awards_in_tx(&mut tx, assignment.id).await?;
        tx.commit().await?;

        Ok(AssignmentOutcome::Issued {
            instance_id: instance.id,
            redemption_code: instance.redemption_code,
        })
    }
}

/// 问卷完成发券桥接服务
pub struct SurveyRewardBridge {
    assignment_repo: Arc<dyn SurveyAssignmentRepositoryTrait>,
    template_repo: Arc<dyn CouponTemplateRepositoryTrait>,
    rewarder: Arc<dyn AssignmentRewarder>,
}

impl SurveyRewardBridge {
    pub fn new(
        assignment_repo: Arc<dyn SurveyAssignmentRepositoryTrait>,
        template_repo: Arc<dyn CouponTemplateRepositoryTrait>,
        rewarder: Arc<dyn AssignmentRewarder>,
    ) -> Self {
        Self {
            assignment_repo,
            template_repo,
            rewarder,
        }
    }

    pub fn from_pool(pool: PgPool, max_code_attempts: u32) -> Self {
        Self::new(
            Arc::new(SurveyAssignmentRepository::new(pool.clone())),
            Arc::new(CouponTemplateRepository::new(pool.clone())),
            Arc::new(PgAssignmentRewarder::new(pool, max_code_attempts)),
        )
    }

    /// 处理问卷完成
    ///
    /// 业务失败记为 `Skipped`；存储类失败在处理完其余配置后返回错误，由调用方重试。
    /// 重试是安全的：已发放的配置会被奖励记录挡住。
    #[instrument(
        skip(self),
        fields(response_id = %response_id, survey_id = %survey_id, user_id = %user_id)
    )]
    pub async fn on_survey_completed(
        &self,
        response_id: Uuid,
        survey_id: Uuid,
        user_id: Uuid,
    ) -> Result<SurveyRewardSummary> {
        let assignments = self.assignment_repo.list_eligible(survey_id).await?;
        let mut results = Vec::with_capacity(assignments.len());
        let mut retry_error: Option<RewardsError> = None;

        for assignment in &assignments {
            let outcome = match self.process_assignment(assignment, response_id, user_id).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_business_error() => {
                    warn!(
                        assignment_id = %assignment.id,
                        template_id = %assignment.template_id,
                        error = %e,
                        "问卷发券跳过"
                    );
                    AssignmentOutcome::Skipped {
                        reason: e.error_code().to_string(),
                    }
                }
                Err(e) => {
                    error!(
                        assignment_id = %assignment.id,
                        template_id = %assignment.template_id,
                        error = %e,
                        "问卷发券失败"
                    );
                    metrics::record_survey_reward("failed");
                    retry_error.get_or_insert(e);
                    continue;
                }
            };

            metrics::record_survey_reward(outcome.label());
            match &outcome {
                AssignmentOutcome::Issued { instance_id, .. } => {
                    metrics::record_coupon_issue("survey", "success");
                    info!(
                        assignment_id = %assignment.id,
                        instance_id = %instance_id,
                        "问卷发券成功"
                    );
                }
                AssignmentOutcome::AlreadyRewarded => {
                    info!(assignment_id = %assignment.id, "该回答已领取，幂等跳过");
                }
                AssignmentOutcome::Skipped { .. } => {}
            }

            results.push(AssignmentResult {
                assignment_id: assignment.id,
                template_id: assignment.template_id,
                outcome,
            });
        }

        if let Some(e) = retry_error {
            return Err(e);
        }

        let summary = SurveyRewardSummary {
            response_id,
            survey_id,
            user_id,
            results,
        };
        info!(
            assignments = assignments.len(),
            issued = summary.issued_count(),
            "问卷完成事件处理完毕"
        );

        Ok(summary)
    }

    /// 创建问卷发券配置
    #[instrument(
        skip(self, request),
        fields(survey_id = %request.survey_id, template_id = %request.template_id)
    )]
    pub async fn create_assignment(
        &self,
        request: CreateAssignmentRequest,
    ) -> Result<SurveyCouponAssignment> {
        request.validate()?;

        if self.template_repo.get(request.template_id).await?.is_none() {
            return Err(RewardsError::TemplateNotFound(request.template_id));
        }

        let assignment = SurveyCouponAssignment {
            id: Uuid::now_v7(),
            survey_id: request.survey_id,
            template_id: request.template_id,
            award_limit: request.award_limit,
            awards_given: 0,
            custom_expiry_days: request.custom_expiry_days,
            is_active: true,
            created_by: request.created_by,
            created_at: Utc::now(),
        };
        self.assignment_repo.create(&assignment).await?;

        info!(assignment_id = %assignment.id, "问卷发券配置已创建");
        Ok(assignment)
    }

    /// 列出问卷下的全部发券配置
    #[instrument(skip(self), fields(survey_id = %survey_id))]
    pub async fn list_assignments(&self, survey_id: Uuid) -> Result<Vec<SurveyCouponAssignment>> {
        self.assignment_repo.list_by_survey(survey_id).await
    }

    /// 修改发券配置
    ///
    /// 上限不能低于已发放张数；修改只影响之后的发放
    #[instrument(skip(self, request), fields(assignment_id = %assignment_id))]
    pub async fn update_assignment(
        &self,
        assignment_id: Uuid,
        request: UpdateAssignmentRequest,
    ) -> Result<SurveyCouponAssignment> {
        request.validate()?;

        let current = self
            .assignment_repo
            .get(assignment_id)
            .await?
            .ok_or(RewardsError::AssignmentNotFound(assignment_id))?;
        if let Some(limit) = request.award_limit
            && limit < current.awards_given
        {
            return Err(award_limit_below_given(limit, current.awards_given));
        }

        let updated = self
            .assignment_repo
            .update(
                assignment_id,
                request.award_limit,
                request.custom_expiry_days,
                request.is_active,
            )
            .await?;

        match updated {
            Some(assignment) => {
                info!(
                    assignment_id = %assignment_id,
                    award_limit = ?assignment.award_limit,
                    is_active = assignment.is_active,
                    "问卷发券配置已修改"
                );
                Ok(assignment)
            }
            // 读取之后又有发放，已发放张数越过了新上限
            None => match self.assignment_repo.get(assignment_id).await? {
                Some(latest) => Err(award_limit_below_given(
                    request.award_limit.unwrap_or_default(),
                    latest.awards_given,
                )),
                None => Err(RewardsError::AssignmentNotFound(assignment_id)),
            },
        }
    }

    /// 分页列出问卷的奖励历史
    #[instrument(skip(self), fields(survey_id = %survey_id))]
    pub async fn list_reward_history(
        &self,
        survey_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Paged<SurveyRewardHistoryEntry>> {
        let window = PageWindow::new(page, page_size);
        let items = self
            .assignment_repo
            .list_rewards_by_survey(survey_id, window.page_size, window.offset())
            .await?;
        let total = self.assignment_repo.count_rewards_by_survey(survey_id).await?;

        Ok(window.wrap(items, total))
    }

    /// 停用发券配置
    #[instrument(skip(self), fields(assignment_id = %assignment_id))]
    pub async fn deactivate_assignment(&self, assignment_id: Uuid) -> Result<()> {
        if !self.assignment_repo.deactivate(assignment_id).await? {
            return Err(RewardsError::AssignmentNotFound(assignment_id));
        }

        info!(assignment_id = %assignment_id, "问卷发券配置已停用");
        Ok(())
    }

    // ==================== 私有方法 ====================

    async fn process_assignment(
        &self,
        assignment: &SurveyCouponAssignment,
        response_id: Uuid,
        user_id: Uuid,
    ) -> Result<AssignmentOutcome> {
        if self
            .assignment_repo
            .reward_exists(response_id, assignment.id)
            .await?
        {
            return Ok(AssignmentOutcome::AlreadyRewarded);
        }

        self.rewarder.reward(assignment, response_id, user_id).await
    }
}

fn award_limit_below_given(limit: i32, awards_given: i32) -> RewardsError {
    RewardsError::Validation(format!(
        "发放上限 {limit} 不能低于已发放张数 {awards_given}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CapScope, CouponTemplate, CouponType, TemplateStatus};
    use crate::repository::{
        MockCouponTemplateRepositoryTrait, MockSurveyAssignmentRepositoryTrait,
    };
    use rust_decimal::Decimal;

    fn assignment(survey_id: Uuid) -> SurveyCouponAssignment {
        SurveyCouponAssignment {
            id: Uuid::now_v7(),
            survey_id,
            template_id: Uuid::now_v7(),
            award_limit: Some(100),
            awards_given: 0,
            custom_expiry_days: Some(30),
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    fn issued() -> AssignmentOutcome {
        AssignmentOutcome::Issued {
            instance_id: Uuid::now_v7(),
            redemption_code: "CPN-ABCDEFGHJKLM".to_string(),
        }
    }

    fn bridge(
        assignments: MockSurveyAssignmentRepositoryTrait,
        templates: MockCouponTemplateRepositoryTrait,
        rewarder: MockAssignmentRewarder,
    ) -> SurveyRewardBridge {
        SurveyRewardBridge::new(Arc::new(assignments), Arc::new(templates), Arc::new(rewarder))
    }

    #[tokio::test]
    async fn test_issues_for_each_eligible_assignment() {
        let survey_id = Uuid::now_v7();
        let list = vec![assignment(survey_id), assignment(survey_id)];

        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments
            .expect_list_eligible()
            .returning(move |_| Ok(list.clone()));
        assignments.expect_reward_exists().returning(|_, _| Ok(false));

        let mut rewarder = MockAssignmentRewarder::new();
        rewarder
            .expect_reward()
            .times(2)
            .returning(|_, _, _| Ok(issued()));

        let summary = bridge(assignments, MockCouponTemplateRepositoryTrait::new(), rewarder)
            .on_survey_completed(Uuid::now_v7(), survey_id, Uuid::now_v7())
            .await
            .unwrap();

        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.issued_count(), 2);
    }

    #[tokio::test]
    async fn test_existing_reward_is_skipped_without_issuing() {
        let survey_id = Uuid::now_v7();
        let list = vec![assignment(survey_id)];

        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments
            .expect_list_eligible()
            .returning(move |_| Ok(list.clone()));
        assignments.expect_reward_exists().returning(|_, _| Ok(true));

        let mut rewarder = MockAssignmentRewarder::new();
        rewarder.expect_reward().never();

        let summary = bridge(assignments, MockCouponTemplateRepositoryTrait::new(), rewarder)
            .on_survey_completed(Uuid::now_v7(), survey_id, Uuid::now_v7())
            .await
            .unwrap();

        assert_eq!(summary.results[0].outcome, AssignmentOutcome::AlreadyRewarded);
        assert_eq!(summary.issued_count(), 0);
    }

    #[tokio::test]
    async fn test_business_failure_does_not_block_others() {
        let survey_id = Uuid::now_v7();
        let first = assignment(survey_id);
        let second = assignment(survey_id);
        let first_id = first.id;
        let list = vec![first, second];

        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments
            .expect_list_eligible()
            .returning(move |_| Ok(list.clone()));
        assignments.expect_reward_exists().returning(|_, _| Ok(false));

        let mut rewarder = MockAssignmentRewarder::new();
        rewarder.expect_reward().returning(move |a, _, _| {
            if a.id == first_id {
                Err(RewardsError::CapExceeded {
                    template_id: a.template_id,
                    scope: CapScope::Global,
                })
            } else {
                Ok(issued())
            }
        });

        let summary = bridge(assignments, MockCouponTemplateRepositoryTrait::new(), rewarder)
            .on_survey_completed(Uuid::now_v7(), survey_id, Uuid::now_v7())
            .await
            .unwrap();

        assert_eq!(summary.results.len(), 2);
        assert_eq!(
            summary.results[0].outcome,
            AssignmentOutcome::Skipped {
                reason: "CAP_EXCEEDED".to_string()
            }
        );
        assert_eq!(summary.issued_count(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_processes_rest_then_errors() {
        let survey_id = Uuid::now_v7();
        let first = assignment(survey_id);
        let first_id = first.id;
        let list = vec![first, assignment(survey_id)];

        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments
            .expect_list_eligible()
            .returning(move |_| Ok(list.clone()));
        assignments.expect_reward_exists().returning(|_, _| Ok(false));

        let mut rewarder = MockAssignmentRewarder::new();
        rewarder.expect_reward().times(2).returning(move |a, _, _| {
            if a.id == first_id {
                Err(RewardsError::StorageConflict)
            } else {
                Ok(issued())
            }
        });

        let result = bridge(assignments, MockCouponTemplateRepositoryTrait::new(), rewarder)
            .on_survey_completed(Uuid::now_v7(), survey_id, Uuid::now_v7())
            .await;

        assert!(matches!(result, Err(RewardsError::StorageConflict)));
    }

    #[tokio::test]
    async fn test_no_assignments() {
        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments.expect_list_eligible().returning(|_| Ok(vec![]));

        let summary = bridge(
            assignments,
            MockCouponTemplateRepositoryTrait::new(),
            MockAssignmentRewarder::new(),
        )
        .on_survey_completed(Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7())
        .await
        .unwrap();

        assert!(summary.results.is_empty());
    }

    #[tokio::test]
    async fn test_create_assignment_requires_template() {
        let mut templates = MockCouponTemplateRepositoryTrait::new();
        templates.expect_get().returning(|_| Ok(None));
        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments.expect_create().never();

        let result = bridge(assignments, templates, MockAssignmentRewarder::new())
            .create_assignment(CreateAssignmentRequest {
                survey_id: Uuid::now_v7(),
                template_id: Uuid::now_v7(),
                award_limit: None,
                custom_expiry_days: None,
                created_by: None,
            })
            .await;

        assert!(matches!(result, Err(RewardsError::TemplateNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_assignment() {
        let now = Utc::now();
        let template = CouponTemplate {
            id: Uuid::now_v7(),
            code: "SURVEY10".to_string(),
            name: "问卷感谢券".to_string(),
            description: None,
            terms_and_conditions: None,
            coupon_type: CouponType::Percentage,
            value: Decimal::from(10),
            currency: "THB".to_string(),
            min_spend: None,
            max_discount: None,
            valid_from: now,
            valid_until: None,
            total_usage_cap: None,
            per_user_usage_cap: 1,
            used_count: 0,
            status: TemplateStatus::Active,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        let template_id = template.id;

        let mut templates = MockCouponTemplateRepositoryTrait::new();
        templates
            .expect_get()
            .returning(move |_| Ok(Some(template.clone())));
        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments
            .expect_create()
            .withf(|a| a.awards_given == 0 && a.is_active && a.award_limit == Some(50))
            .times(1)
            .returning(|_| Ok(()));

        let created = bridge(assignments, templates, MockAssignmentRewarder::new())
            .create_assignment(CreateAssignmentRequest {
                survey_id: Uuid::now_v7(),
                template_id,
                award_limit: Some(50),
                custom_expiry_days: Some(14),
                created_by: None,
            })
            .await
            .unwrap();

        assert_eq!(created.template_id, template_id);
        assert_eq!(created.custom_expiry_days, Some(14));
    }

    #[tokio::test]
    async fn test_deactivate_missing_assignment() {
        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments.expect_deactivate().returning(|_| Ok(false));

        let result = bridge(
            assignments,
            MockCouponTemplateRepositoryTrait::new(),
            MockAssignmentRewarder::new(),
        )
        .deactivate_assignment(Uuid::now_v7())
        .await;

        assert!(matches!(result, Err(RewardsError::AssignmentNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_assignment() {
        let current = SurveyCouponAssignment {
            awards_given: 20,
            ..assignment(Uuid::now_v7())
        };
        let id = current.id;

        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        let stored = current.clone();
        assignments
            .expect_get()
            .returning(move |_| Ok(Some(stored.clone())));
        assignments
            .expect_update()
            .withf(move |a, limit, days, active| {
                *a == id && *limit == Some(40) && days.is_none() && *active == Some(false)
            })
            .times(1)
            .returning(move |_, limit, _, active| {
                Ok(Some(SurveyCouponAssignment {
                    award_limit: limit,
                    is_active: active.unwrap_or(true),
                    ..current.clone()
                }))
            });

        let updated = bridge(
            assignments,
            MockCouponTemplateRepositoryTrait::new(),
            MockAssignmentRewarder::new(),
        )
        .update_assignment(
            id,
            UpdateAssignmentRequest {
                award_limit: Some(40),
                custom_expiry_days: None,
                is_active: Some(false),
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.award_limit, Some(40));
        assert!(!updated.is_active);
        assert_eq!(updated.awards_given, 20);
    }

    #[tokio::test]
    async fn test_update_assignment_limit_below_awards_given() {
        let current = SurveyCouponAssignment {
            awards_given: 20,
            ..assignment(Uuid::now_v7())
        };
        let id = current.id;

        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments
            .expect_get()
            .returning(move |_| Ok(Some(current.clone())));
        assignments.expect_update().never();

        let result = bridge(
            assignments,
            MockCouponTemplateRepositoryTrait::new(),
            MockAssignmentRewarder::new(),
        )
        .update_assignment(
            id,
            UpdateAssignmentRequest {
                award_limit: Some(10),
                ..Default::default()
            },
        )
        .await;

        assert!(matches!(result, Err(RewardsError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_missing_assignment() {
        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments.expect_get().returning(|_| Ok(None));
        assignments.expect_update().never();

        let result = bridge(
            assignments,
            MockCouponTemplateRepositoryTrait::new(),
            MockAssignmentRewarder::new(),
        )
        .update_assignment(
            Uuid::now_v7(),
            UpdateAssignmentRequest {
                is_active: Some(true),
                ..Default::default()
            },
        )
        .await;

        assert!(matches!(result, Err(RewardsError::AssignmentNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_reward_history_pages() {
        let survey_id = Uuid::now_v7();

        let mut assignments = MockSurveyAssignmentRepositoryTrait::new();
        assignments
            .expect_list_rewards_by_survey()
            .withf(move |id, limit, offset| *id == survey_id && *limit == 10 && *offset == 10)
            .returning(|_, _, _| Ok(vec![]));
        assignments
            .expect_count_rewards_by_survey()
            .returning(|_| Ok(12));

        let page = bridge(
            assignments,
            MockCouponTemplateRepositoryTrait::new(),
            MockAssignmentRewarder::new(),
        )
        .list_reward_history(survey_id, 2, 10)
        .await
        .unwrap();

        assert_eq!(page.total, 12);
        assert_eq!(page.page, 2);
        assert!(page.items.is_empty());
    }
}
