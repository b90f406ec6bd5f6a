//! 服务层数据传输对象
//!
//! 定义服务层与外部交互使用的 DTO，与内部领域模型解耦

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, RewardsError};
use crate::models::{
    CouponInstance, CouponTemplate, CouponType, InstanceStatus, InvalidReason, PointsTransaction,
    TemplateStatus, Tier, TransactionType, validate_money,
};

/// 自定义有效天数上限（约十年）
pub const MAX_CUSTOM_EXPIRY_DAYS: i32 = 3650;

/// 校验自定义有效天数在 1..=3650 之间
pub fn validate_expiry_days(days: Option<i32>) -> Result<()> {
    match days {
        Some(days) if !(1..=MAX_CUSTOM_EXPIRY_DAYS).contains(&days) => Err(
            RewardsError::Validation(format!(
                "自定义有效天数必须在 1-{MAX_CUSTOM_EXPIRY_DAYS} 之间"
            )),
        ),
        _ => Ok(()),
    }
}

// ==================== 分页 ====================

/// 归一化后的分页窗口：页码至少为 1，每页条数在 1-100 之间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
}

impl PageWindow {
    pub const DEFAULT_SIZE: i64 = 20;
    pub const MAX_SIZE: i64 = 100;

    /// 非正的每页条数取默认值
    pub fn new(page: i64, page_size: i64) -> Self {
        let page_size = if page_size <= 0 {
            Self::DEFAULT_SIZE
        } else {
            page_size.min(Self::MAX_SIZE)
        };
        Self {
            page: page.max(1),
            page_size,
        }
    }

    /// 超大页码不会溢出，只会读到空页
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn wrap<T>(self, items: Vec<T>, total: i64) -> Paged<T> {
        Paged {
            items,
            total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

// ==================== 积分与等级 ====================

/// 积分写入请求
#[derive(Debug, Clone)]
pub struct AwardPointsRequest {
    pub user_id: Uuid,
    pub delta: i64,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub reference_id: Option<String>,
    pub admin_actor_id: Option<Uuid>,
    pub admin_reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AwardPointsRequest {
    pub fn new(user_id: Uuid, delta: i64, transaction_type: TransactionType) -> Self {
        Self {
            user_id,
            delta,
            transaction_type,
            description: None,
            reference_id: None,
            admin_actor_id: None,
            admin_reason: None,
            expires_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_admin(mut self, actor_id: Uuid, reason: Option<String>) -> Self {
        self.admin_actor_id = Some(actor_id);
        self.admin_reason = reason;
        self
    }

    /// 校验请求：delta 不能为 0，管理员类型必须带操作人
    pub fn validate(&self) -> Result<()> {
        if self.delta == 0 {
            return Err(RewardsError::Validation("积分变动值不能为 0".to_string()));
        }
        if self.transaction_type.is_admin() && self.admin_actor_id.is_none() {
            return Err(RewardsError::Validation(format!(
                "{} 类型的流水必须记录操作人",
                self.transaction_type
            )));
        }
        Ok(())
    }
}

/// 积分写入结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardPointsResponse {
    pub transaction_id: Uuid,
    pub balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_id: Option<Uuid>,
    pub tier_changed: bool,
}

/// 余额
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDto {
    pub user_id: Uuid,
    pub balance: i64,
    pub balance_updated_at: DateTime<Utc>,
}

/// 等级详情
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierInfoDto {
    pub tier: Tier,
    pub balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_to_next_tier: Option<i64>,
    pub progress_percentage: f64,
}

/// 积分流水分页
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub items: Vec<PointsTransaction>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// 创建等级请求
#[derive(Debug, Clone)]
pub struct CreateTierRequest {
    pub name: String,
    pub min_balance: i64,
    pub sort_order: i32,
    pub color: String,
    pub benefits: Option<serde_json::Value>,
    pub is_active: bool,
}

// ==================== 优惠券模板 ====================

/// 创建优惠券模板请求
#[derive(Debug, Clone)]
pub struct CreateTemplateRequest {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub terms_and_conditions: Option<String>,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub currency: Option<String>,
    pub min_spend: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub total_usage_cap: Option<i32>,
    pub per_user_usage_cap: Option<i32>,
    pub created_by: Option<Uuid>,
}

impl CreateTemplateRequest {
    /// 字段校验
    pub fn validate(&self) -> Result<()> {
        let code = self.code.trim();
        if code.is_empty() || code.chars().count() > 50 {
            return Err(RewardsError::Validation(
                "模板编码长度必须在 1-50 之间".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(RewardsError::Validation("模板名称不能为空".to_string()));
        }
        if self.value <= Decimal::ZERO {
            return Err(RewardsError::Validation("优惠值必须大于 0".to_string()));
        }
        if self.coupon_type == CouponType::Percentage && self.value > Decimal::ONE_HUNDRED {
            return Err(RewardsError::Validation(
                "百分比折扣不能超过 100".to_string(),
            ));
        }
        validate_money("优惠值", self.value)?;
        if let Some(min_spend) = self.min_spend {
            validate_money("最低消费", min_spend)?;
        }
        if let Some(max_discount) = self.max_discount {
            validate_money("最高折扣", max_discount)?;
            if max_discount <= Decimal::ZERO {
                return Err(RewardsError::Validation("最高折扣必须大于 0".to_string()));
            }
        }
        if self.per_user_usage_cap.is_some_and(|cap| cap < 1) {
            return Err(RewardsError::Validation("单用户上限至少为 1".to_string()));
        }
        if self.total_usage_cap.is_some_and(|cap| cap < 1) {
            return Err(RewardsError::Validation("总上限至少为 1".to_string()));
        }
        if self.valid_until.is_some_and(|until| until <= self.valid_from) {
            return Err(RewardsError::Validation(
                "结束时间必须晚于开始时间".to_string(),
            ));
        }
        Ok(())
    }
}

/// 修改优惠券模板请求
///
/// 未提供的字段保持原值；编码与券种不可修改
#[derive(Debug, Clone, Default)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub terms_and_conditions: Option<String>,
    pub value: Option<Decimal>,
    pub currency: Option<String>,
    pub min_spend: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub total_usage_cap: Option<i32>,
    pub per_user_usage_cap: Option<i32>,
}

impl UpdateTemplateRequest {
    /// 与现有模板合并，并按创建规则校验合并结果
    pub fn merge_into(self, template: &CouponTemplate) -> Result<CouponTemplate> {
        let merged = CreateTemplateRequest {
            code: template.code.clone(),
            name: self.name.unwrap_or_else(|| template.name.clone()),
            description: self.description.or_else(|| template.description.clone()),
            terms_and_conditions: self
                .terms_and_conditions
                .or_else(|| template.terms_and_conditions.clone()),
            coupon_type: template.coupon_type,
            value: self.value.unwrap_or(template.value),
            currency: Some(self.currency.unwrap_or_else(|| template.currency.clone())),
            min_spend: self.min_spend.or(template.min_spend),
            max_discount: self.max_discount.or(template.max_discount),
            valid_from: self.valid_from.unwrap_or(template.valid_from),
            valid_until: self.valid_until.or(template.valid_until),
            total_usage_cap: self.total_usage_cap.or(template.total_usage_cap),
            per_user_usage_cap: Some(
                self.per_user_usage_cap
                    .unwrap_or(template.per_user_usage_cap),
            ),
            created_by: template.created_by,
        };
        merged.validate()?;

        Ok(CouponTemplate {
            name: merged.name.trim().to_string(),
            description: merged.description,
            terms_and_conditions: merged.terms_and_conditions,
            value: merged.value,
            currency: merged.currency.unwrap_or_else(|| template.currency.clone()),
            min_spend: merged.min_spend,
            max_discount: merged.max_discount,
            valid_from: merged.valid_from,
            valid_until: merged.valid_until,
            total_usage_cap: merged.total_usage_cap,
            per_user_usage_cap: merged
                .per_user_usage_cap
                .unwrap_or(template.per_user_usage_cap),
            ..template.clone()
        })
    }
}

/// 优惠券模板视图（status 为读取时推导的状态）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponTemplateDto {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_and_conditions: Option<String>,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_spend: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_discount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_usage_cap: Option<i32>,
    pub per_user_usage_cap: i32,
    pub used_count: i32,
    pub status: TemplateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CouponTemplateDto {
    pub fn from_template(template: CouponTemplate, now: DateTime<Utc>) -> Self {
        let status = template.resolved_status(now);
        Self {
            id: template.id,
            code: template.code,
            name: template.name,
            description: template.description,
            terms_and_conditions: template.terms_and_conditions,
            coupon_type: template.coupon_type,
            value: template.value,
            currency: template.currency,
            min_spend: template.min_spend,
            max_discount: template.max_discount,
            valid_from: template.valid_from,
            valid_until: template.valid_until,
            total_usage_cap: template.total_usage_cap,
            per_user_usage_cap: template.per_user_usage_cap,
            used_count: template.used_count,
            status,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

/// 模板分页
pub type TemplatePage = Paged<CouponTemplateDto>;

// ==================== 签发与钱包 ====================

/// 签发请求
#[derive(Debug, Clone)]
pub struct IssueCouponRequest {
    pub template_id: Uuid,
    pub user_id: Uuid,
    pub assigned_by_actor: Option<Uuid>,
    pub reason: Option<String>,
    /// 自定义有效天数，从签发时刻起算
    pub custom_expiry_days: Option<i32>,
}

impl IssueCouponRequest {
    pub fn new(template_id: Uuid, user_id: Uuid) -> Self {
        Self {
            template_id,
            user_id,
            assigned_by_actor: None,
            reason: None,
            custom_expiry_days: None,
        }
    }

    pub fn with_actor(mut self, actor: Uuid) -> Self {
        self.assigned_by_actor = Some(actor);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_custom_expiry_days(mut self, days: Option<i32>) -> Self {
        self.custom_expiry_days = days;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_expiry_days(self.custom_expiry_days)
    }
}

/// 单次批量签发的用户数上限
pub const MAX_BULK_ISSUE_USERS: usize = 100;

/// 批量签发请求
#[derive(Debug, Clone)]
pub struct BulkIssueRequest {
    pub template_id: Uuid,
    pub user_ids: Vec<Uuid>,
    pub assigned_by_actor: Option<Uuid>,
    pub reason: Option<String>,
    pub custom_expiry_days: Option<i32>,
}

impl BulkIssueRequest {
    pub fn validate(&self) -> Result<()> {
        if self.user_ids.is_empty() {
            return Err(RewardsError::Validation("至少指定一个用户".to_string()));
        }
        if self.user_ids.len() > MAX_BULK_ISSUE_USERS {
            return Err(RewardsError::Validation(format!(
                "单次最多签发给 {MAX_BULK_ISSUE_USERS} 个用户"
            )));
        }
        validate_expiry_days(self.custom_expiry_days)
    }

    /// 按用户拆分为单个签发请求，重复的用户只保留第一次出现
    pub fn split(&self) -> Vec<IssueCouponRequest> {
        let mut seen = std::collections::HashSet::new();
        self.user_ids
            .iter()
            .filter(|user_id| seen.insert(**user_id))
            .map(|user_id| IssueCouponRequest {
                template_id: self.template_id,
                user_id: *user_id,
                assigned_by_actor: self.assigned_by_actor,
                reason: self.reason.clone(),
                custom_expiry_days: self.custom_expiry_days,
            })
            .collect()
    }
}

/// 批量签发中单个用户的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkIssueOutcome {
    #[serde(rename_all = "camelCase")]
    Issued {
        instance_id: Uuid,
        redemption_code: String,
    },
    /// reason 为错误码
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkIssueResult {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub outcome: BulkIssueOutcome,
}

/// 批量签发汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkIssueSummary {
    pub template_id: Uuid,
    pub issued: usize,
    pub failed: usize,
    pub results: Vec<BulkIssueResult>,
}

/// 领取资格预检结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityDto {
    pub eligible: bool,
    /// 不可领取时的错误码
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EligibilityDto {
    pub fn eligible() -> Self {
        Self {
            eligible: true,
            reason: None,
            message: None,
        }
    }

    pub fn rejected(err: &RewardsError) -> Self {
        Self {
            eligible: false,
            reason: Some(err.error_code().to_string()),
            message: Some(err.to_string()),
        }
    }
}

/// 钱包中的一张优惠券
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCouponDto {
    pub instance_id: Uuid,
    pub template_id: Uuid,
    pub redemption_code: String,
    /// 读取时呈现的状态
    pub status: InstanceStatus,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_expiry: Option<DateTime<Utc>>,
    pub expiring_soon: bool,
    pub template_code: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_and_conditions: Option<String>,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_spend: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_discount: Option<Decimal>,
}

// ==================== 核销 ====================

/// 核销请求
#[derive(Debug, Clone)]
pub struct RedeemCouponRequest {
    pub code: String,
    pub actor_id: Option<Uuid>,
    pub original_amount: Option<Decimal>,
    pub reference: String,
    pub channel: String,
    pub location: Option<String>,
}

impl RedeemCouponRequest {
    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty()
            || self.reference.trim().is_empty()
            || self.channel.trim().is_empty()
        {
            return Err(RewardsError::Validation(
                "兑换码、业务单号和渠道不能为空".to_string(),
            ));
        }
        if let Some(amount) = self.original_amount {
            validate_money("原始金额", amount)?;
        }
        Ok(())
    }
}

/// 兑换码校验结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResultDto {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<CouponInstance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<CouponTemplateDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
}

// ==================== 问卷发券 ====================

/// 创建问卷发券配置请求
#[derive(Debug, Clone)]
pub struct CreateAssignmentRequest {
    pub survey_id: Uuid,
    pub template_id: Uuid,
    pub award_limit: Option<i32>,
    pub custom_expiry_days: Option<i32>,
    pub created_by: Option<Uuid>,
}

impl CreateAssignmentRequest {
    pub fn validate(&self) -> Result<()> {
        if self.award_limit.is_some_and(|limit| limit < 1) {
            return Err(RewardsError::Validation("发放上限至少为 1".to_string()));
        }
        validate_expiry_days(self.custom_expiry_days)
    }
}

/// 修改问卷发券配置请求
///
/// 未提供的字段保持原值
#[derive(Debug, Clone, Default)]
pub struct UpdateAssignmentRequest {
    pub award_limit: Option<i32>,
    pub custom_expiry_days: Option<i32>,
    pub is_active: Option<bool>,
}

impl UpdateAssignmentRequest {
    pub fn validate(&self) -> Result<()> {
        if self.award_limit.is_none()
            && self.custom_expiry_days.is_none()
            && self.is_active.is_none()
        {
            return Err(RewardsError::Validation("没有需要修改的字段".to_string()));
        }
        if self.award_limit.is_some_and(|limit| limit < 1) {
            return Err(RewardsError::Validation("发放上限至少为 1".to_string()));
        }
        validate_expiry_days(self.custom_expiry_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn template_request() -> CreateTemplateRequest {
        CreateTemplateRequest {
            code: "SPRING10".to_string(),
            name: "春季九折".to_string(),
            description: None,
            terms_and_conditions: None,
            coupon_type: CouponType::Percentage,
            value: Decimal::from(10),
            currency: None,
            min_spend: None,
            max_discount: None,
            valid_from: Utc::now(),
            valid_until: None,
            total_usage_cap: None,
            per_user_usage_cap: None,
            created_by: None,
        }
    }

    #[test]
    fn test_award_points_request_validation() {
        let user_id = Uuid::now_v7();
        assert!(
            AwardPointsRequest::new(user_id, 500, TransactionType::EarnedStay)
                .validate()
                .is_ok()
        );
        assert!(matches!(
            AwardPointsRequest::new(user_id, 0, TransactionType::EarnedStay).validate(),
            Err(RewardsError::Validation(_))
        ));
        assert!(matches!(
            AwardPointsRequest::new(user_id, -100, TransactionType::AdminDeduction).validate(),
            Err(RewardsError::Validation(_))
        ));
        assert!(
            AwardPointsRequest::new(user_id, -100, TransactionType::AdminDeduction)
                .with_admin(Uuid::now_v7(), Some("纠错".to_string()))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_template_request_valid() {
        assert!(template_request().validate().is_ok());
    }

    #[test]
    fn test_template_request_rejects_bad_fields() {
        let mut req = template_request();
        req.code = "".to_string();
        assert!(req.validate().is_err());

        let mut req = template_request();
        req.code = "X".repeat(51);
        assert!(req.validate().is_err());

        let mut req = template_request();
        req.value = Decimal::from(101);
        assert!(req.validate().is_err());

        let mut req = template_request();
        req.value = Decimal::ZERO;
        assert!(req.validate().is_err());

        let mut req = template_request();
        req.per_user_usage_cap = Some(0);
        assert!(req.validate().is_err());

        let mut req = template_request();
        req.valid_until = Some(req.valid_from - Duration::days(1));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_fixed_amount_above_hundred_is_fine() {
        let mut req = template_request();
        req.coupon_type = CouponType::FixedAmount;
        req.value = Decimal::from(500);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_eligibility_rejected() {
        let err = RewardsError::CapExceeded {
            template_id: Uuid::nil(),
            scope: crate::models::CapScope::PerUser,
        };
        let dto = EligibilityDto::rejected(&err);
        assert!(!dto.eligible);
        assert_eq!(dto.reason.as_deref(), Some("CAP_EXCEEDED"));

        let json = serde_json::to_value(EligibilityDto::eligible()).unwrap();
        assert_eq!(json["eligible"], true);
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_assignment_request_validation() {
        let req = CreateAssignmentRequest {
            survey_id: Uuid::now_v7(),
            template_id: Uuid::now_v7(),
            award_limit: Some(0),
            custom_expiry_days: None,
            created_by: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_assignment_expiry_days_bounds() {
        let mut req = CreateAssignmentRequest {
            survey_id: Uuid::now_v7(),
            template_id: Uuid::now_v7(),
            award_limit: None,
            custom_expiry_days: Some(MAX_CUSTOM_EXPIRY_DAYS),
            created_by: None,
        };
        assert!(req.validate().is_ok());

        for days in [0, MAX_CUSTOM_EXPIRY_DAYS + 1, i32::MAX] {
            req.custom_expiry_days = Some(days);
            assert!(matches!(req.validate(), Err(RewardsError::Validation(_))));
        }

        let issue = IssueCouponRequest::new(Uuid::now_v7(), Uuid::now_v7())
            .with_custom_expiry_days(Some(i32::MAX));
        assert!(matches!(issue.validate(), Err(RewardsError::Validation(_))));
    }

    #[test]
    fn test_template_money_fields_fit_column() {
        let mut req = template_request();
        req.coupon_type = CouponType::FixedAmount;
        req.value = Decimal::from(10_000_000_000_i64);
        assert!(matches!(req.validate(), Err(RewardsError::Validation(_))));

        let mut req = template_request();
        req.min_spend = Some(Decimal::new(1005, 3));
        assert!(matches!(req.validate(), Err(RewardsError::Validation(_))));

        let mut req = template_request();
        req.max_discount = Some(Decimal::ZERO);
        assert!(matches!(req.validate(), Err(RewardsError::Validation(_))));
    }

    #[test]
    fn test_redeem_request_validation() {
        let mut req = RedeemCouponRequest {
            code: "ABCD2345".to_string(),
            actor_id: None,
            original_amount: Some(Decimal::new(120050, 2)),
            reference: "FOLIO-1".to_string(),
            channel: "front_desk".to_string(),
            location: None,
        };
        assert!(req.validate().is_ok());

        req.original_amount = Some(Decimal::MAX);
        assert!(matches!(req.validate(), Err(RewardsError::Validation(_))));

        req.original_amount = Some(Decimal::new(-1, 0));
        assert!(matches!(req.validate(), Err(RewardsError::Validation(_))));

        req.original_amount = None;
        req.reference = "  ".to_string();
        assert!(matches!(req.validate(), Err(RewardsError::Validation(_))));
    }

    #[test]
    fn test_page_window_huge_page_does_not_overflow() {
        let window = PageWindow::new(i64::MAX, 50);
        assert_eq!(window.page, i64::MAX);
        assert_eq!(window.offset(), i64::MAX);

        let window = PageWindow::new(0, 0);
        assert_eq!(window.page, 1);
        assert_eq!(window.page_size, PageWindow::DEFAULT_SIZE);
        assert_eq!(window.offset(), 0);

        assert_eq!(PageWindow::new(3, 500).page_size, PageWindow::MAX_SIZE);
    }

    fn existing_template(status: TemplateStatus) -> CouponTemplate {
        let now = Utc::now();
        CouponTemplate {
            id: Uuid::now_v7(),
            code: "SPRING10".to_string(),
            name: "春季九折".to_string(),
            description: Some("春季活动".to_string()),
            terms_and_conditions: None,
            coupon_type: CouponType::Percentage,
            value: Decimal::from(10),
            currency: "THB".to_string(),
            min_spend: Some(Decimal::from(500)),
            max_discount: None,
            valid_from: now,
            valid_until: Some(now + Duration::days(30)),
            total_usage_cap: Some(100),
            per_user_usage_cap: 1,
            used_count: 0,
            status,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_update_template_merges_fields() {
        let template = existing_template(TemplateStatus::Draft);
        let request = UpdateTemplateRequest {
            name: Some(" 春季八折 ".to_string()),
            value: Some(Decimal::from(20)),
            per_user_usage_cap: Some(2),
            ..Default::default()
        };

        let merged = request.merge_into(&template).unwrap();
        assert_eq!(merged.id, template.id);
        assert_eq!(merged.code, "SPRING10");
        assert_eq!(merged.name, "春季八折");
        assert_eq!(merged.value, Decimal::from(20));
        assert_eq!(merged.per_user_usage_cap, 2);
        assert_eq!(merged.min_spend, Some(Decimal::from(500)));
        assert_eq!(merged.description.as_deref(), Some("春季活动"));
        assert_eq!(merged.status, TemplateStatus::Draft);
    }

    #[test]
    fn test_update_template_validates_merged_result() {
        let template = existing_template(TemplateStatus::Paused);

        let request = UpdateTemplateRequest {
            value: Some(Decimal::from(120)),
            ..Default::default()
        };
        assert!(matches!(
            request.merge_into(&template),
            Err(RewardsError::Validation(_))
        ));

        let request = UpdateTemplateRequest {
            valid_until: Some(template.valid_from - Duration::days(1)),
            ..Default::default()
        };
        assert!(matches!(
            request.merge_into(&template),
            Err(RewardsError::Validation(_))
        ));
    }

    #[test]
    fn test_bulk_issue_request() {
        let template_id = Uuid::now_v7();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        let request = BulkIssueRequest {
            template_id,
            user_ids: vec![first, second, first],
            assigned_by_actor: Some(Uuid::now_v7()),
            reason: Some("会员日".to_string()),
            custom_expiry_days: Some(7),
        };
        assert!(request.validate().is_ok());

        let split = request.split();
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].user_id, first);
        assert_eq!(split[1].user_id, second);
        assert!(split.iter().all(|r| r.template_id == template_id
            && r.custom_expiry_days == Some(7)
            && r.assigned_by_actor == request.assigned_by_actor));

        let mut empty = request.clone();
        empty.user_ids.clear();
        assert!(matches!(empty.validate(), Err(RewardsError::Validation(_))));

        let mut too_many = request.clone();
        too_many.user_ids = (0..=MAX_BULK_ISSUE_USERS).map(|_| Uuid::now_v7()).collect();
        assert!(matches!(too_many.validate(), Err(RewardsError::Validation(_))));

        let mut bad_expiry = request;
        bad_expiry.custom_expiry_days = Some(i32::MAX);
        assert!(matches!(bad_expiry.validate(), Err(RewardsError::Validation(_))));
    }

    #[test]
    fn test_update_assignment_request_validation() {
        assert!(UpdateAssignmentRequest::default().validate().is_err());
        assert!(
            UpdateAssignmentRequest {
                is_active: Some(false),
                ..Default::default()
            }
            .validate()
            .is_ok()
        );
        assert!(
            UpdateAssignmentRequest {
                award_limit: Some(0),
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            UpdateAssignmentRequest {
                custom_expiry_days: Some(MAX_CUSTOM_EXPIRY_DAYS + 1),
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }
}
