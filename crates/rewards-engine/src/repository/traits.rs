//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试。
//! 事务内的读写（`*_in_tx`）是具体仓储上的关联函数，不在 trait 中。

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CouponInstance, CouponTemplate, InstanceStatus, LoyaltyAccount, PointsTransaction,
    RedemptionRecord, SurveyCouponAssignment, SurveyRewardHistoryEntry, TemplateStatus, Tier,
    WalletRow,
};

/// 会员等级仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TierRepositoryTrait: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Tier>>;
    async fn list_active(&self) -> Result<Vec<Tier>>;
    async fn create(&self, tier: &Tier) -> Result<()>;
}

/// 积分账户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepositoryTrait: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<LoyaltyAccount>>;
    /// 余额仍为 `expected_balance` 时改写账户等级，返回是否有更新
    async fn sync_tier(
        &self,
        user_id: Uuid,
        expected_balance: i64,
        tier_id: Option<Uuid>,
    ) -> Result<bool>;
    /// 按当前启用等级重新推导全部账户的等级，返回变化的账户数
    async fn resync_tiers(&self) -> Result<u64>;
}

/// 积分流水仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PointsTransactionRepositoryTrait: Send + Sync {
    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PointsTransaction>>;
    async fn count_by_user(&self, user_id: Uuid) -> Result<i64>;
}

/// 优惠券模板仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponTemplateRepositoryTrait: Send + Sync {
    async fn create(&self, template: &CouponTemplate) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<CouponTemplate>>;
    async fn list(
        &self,
        status: Option<TemplateStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CouponTemplate>>;
    async fn count(&self, status: Option<TemplateStatus>) -> Result<i64>;
}

/// 优惠券实例仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponInstanceRepositoryTrait: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<CouponInstance>>;
    async fn get_by_code(&self, code: &str) -> Result<Option<CouponInstance>>;
    async fn list_wallet(&self, user_id: Uuid) -> Result<Vec<WalletRow>>;
    async fn count_user_claims(&self, user_id: Uuid, template_id: Uuid) -> Result<i64>;
    async fn count_outstanding(&self, template_id: Uuid) -> Result<i64>;
    /// 筛选与返回的状态均为读取时状态
    async fn list_by_template(
        &self,
        template_id: Uuid,
        status: Option<InstanceStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CouponInstance>>;
    async fn count_by_template(
        &self,
        template_id: Uuid,
        status: Option<InstanceStatus>,
    ) -> Result<i64>;
}

/// 核销记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedemptionRecordRepositoryTrait: Send + Sync {
    async fn get_by_instance(&self, instance_id: Uuid) -> Result<Option<RedemptionRecord>>;
    async fn list_by_template(
        &self,
        template_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RedemptionRecord>>;
    async fn count_by_template(&self, template_id: Uuid) -> Result<i64>;
}

/// 问卷发券配置仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SurveyAssignmentRepositoryTrait: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<SurveyCouponAssignment>>;
    async fn list_by_survey(&self, survey_id: Uuid) -> Result<Vec<SurveyCouponAssignment>>;
    /// 启用中且未达发放上限的配置
    async fn list_eligible(&self, survey_id: Uuid) -> Result<Vec<SurveyCouponAssignment>>;
    async fn create(&self, assignment: &SurveyCouponAssignment) -> Result<()>;
    async fn deactivate(&self, id: Uuid) -> Result<bool>;
    /// 新上限低于已发放张数时不更新并返回 `None`
    async fn update(
        &self,
        id: Uuid,
        award_limit: Option<i32>,
        custom_expiry_days: Option<i32>,
        is_active: Option<bool>,
    ) -> Result<Option<SurveyCouponAssignment>>;
    async fn reward_exists(&self, response_id: Uuid, assignment_id: Uuid) -> Result<bool>;
    async fn list_rewards_by_survey(
        &self,
        survey_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SurveyRewardHistoryEntry>>;
    async fn count_rewards_by_survey(&self, survey_id: Uuid) -> Result<i64>;
}
