//! 请求 DTO 定义
//!
//! 所有 REST API 的请求参数和请求体结构，字段校验由 validator 完成，
//! 业务规则校验留给引擎服务

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use rewards_engine::dto::{
    BulkIssueRequest, CreateAssignmentRequest, CreateTemplateRequest, CreateTierRequest,
    IssueCouponRequest, RedeemCouponRequest, UpdateAssignmentRequest, UpdateTemplateRequest,
};
use rewards_engine::{
    CouponType, InstanceStatus, MONEY_LIMIT, TemplateStatus, TransactionType, validate_money,
};

use crate::auth::Actor;

/// 金额字段须能存入 NUMERIC(12, 2)
fn money_amount(amount: &Decimal) -> Result<(), ValidationError> {
    validate_money("金额", *amount).map_err(|_| {
        ValidationError::new("money").with_message(
            format!("金额必须非负、最多两位小数且小于 {MONEY_LIMIT}").into(),
        )
    })
}

/// 通用分页参数
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

// ==================== 积分与等级 ====================

/// 积分变动请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AwardPointsBody {
    pub delta: i64,
    pub transaction_type: TransactionType,
    #[validate(length(max = 500, message = "描述不能超过500字符"))]
    pub description: Option<String>,
    #[validate(length(max = 100, message = "业务单号不能超过100字符"))]
    pub reference_id: Option<String>,
    #[validate(length(max = 500, message = "调整原因不能超过500字符"))]
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 积分流水分页参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TransactionQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// 创建等级请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTierBody {
    #[validate(length(min = 1, max = 50, message = "等级名称长度必须在1-50个字符之间"))]
    pub name: String,
    #[validate(range(min = 0, message = "门槛积分不能为负数"))]
    pub min_balance: i64,
    #[serde(default)]
    pub sort_order: i32,
    #[validate(length(min = 4, max = 20, message = "颜色格式错误"))]
    pub color: String,
    pub benefits: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl From<CreateTierBody> for CreateTierRequest {
    fn from(body: CreateTierBody) -> Self {
        Self {
            name: body.name,
            min_balance: body.min_balance,
            sort_order: body.sort_order,
            color: body.color,
            benefits: body.benefits,
            is_active: body.is_active,
        }
    }
}

// ==================== 优惠券模板 ====================

/// 创建优惠券模板请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateBody {
    #[validate(length(min = 1, max = 50, message = "模板编码长度必须在1-50个字符之间"))]
    pub code: String,
    #[validate(length(min = 1, max = 200, message = "模板名称长度必须在1-200个字符之间"))]
    pub name: String,
    pub description: Option<String>,
    pub terms_and_conditions: Option<String>,
    pub coupon_type: CouponType,
    #[validate(custom(function = "money_amount"))]
    pub value: Decimal,
    #[validate(length(equal = 3, message = "币种必须为3位代码"))]
    pub currency: Option<String>,
    #[validate(custom(function = "money_amount"))]
    pub min_spend: Option<Decimal>,
    #[validate(custom(function = "money_amount"))]
    pub max_discount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "总上限至少为1"))]
    pub total_usage_cap: Option<i32>,
    #[validate(range(min = 1, message = "单用户上限至少为1"))]
    pub per_user_usage_cap: Option<i32>,
}

impl CreateTemplateBody {
    pub fn into_request(self, actor: &Actor) -> CreateTemplateRequest {
        CreateTemplateRequest {
            code: self.code,
            name: self.name,
            description: self.description,
            terms_and_conditions: self.terms_and_conditions,
            coupon_type: self.coupon_type,
            value: self.value,
            currency: self.currency,
            min_spend: self.min_spend,
            max_discount: self.max_discount,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            total_usage_cap: self.total_usage_cap,
            per_user_usage_cap: self.per_user_usage_cap,
            created_by: Some(actor.id),
        }
    }
}

/// 修改优惠券模板请求，未提供的字段保持原值
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateBody {
    #[validate(length(min = 1, max = 200, message = "模板名称长度必须在1-200个字符之间"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub terms_and_conditions: Option<String>,
    #[validate(custom(function = "money_amount"))]
    pub value: Option<Decimal>,
    #[validate(length(equal = 3, message = "币种必须为3位代码"))]
    pub currency: Option<String>,
    #[validate(custom(function = "money_amount"))]
    pub min_spend: Option<Decimal>,
    #[validate(custom(function = "money_amount"))]
    pub max_discount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "总上限至少为1"))]
    pub total_usage_cap: Option<i32>,
    #[validate(range(min = 1, message = "单用户上限至少为1"))]
    pub per_user_usage_cap: Option<i32>,
}

impl From<UpdateTemplateBody> for UpdateTemplateRequest {
    fn from(body: UpdateTemplateBody) -> Self {
        Self {
            name: body.name,
            description: body.description,
            terms_and_conditions: body.terms_and_conditions,
            value: body.value,
            currency: body.currency,
            min_spend: body.min_spend,
            max_discount: body.max_discount,
            valid_from: body.valid_from,
            valid_until: body.valid_until,
            total_usage_cap: body.total_usage_cap,
            per_user_usage_cap: body.per_user_usage_cap,
        }
    }
}

/// 模板列表查询
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateQuery {
    pub status: Option<TemplateStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

// ==================== 签发与钱包 ====================

/// 管理员签发请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IssueCouponBody {
    pub user_id: Uuid,
    #[validate(length(max = 500, message = "签发原因不能超过500字符"))]
    pub reason: Option<String>,
    #[validate(range(min = 1, max = 3650, message = "自定义有效天数必须在1-3650之间"))]
    pub custom_expiry_days: Option<i32>,
}

impl IssueCouponBody {
    pub fn into_request(self, template_id: Uuid, actor: &Actor) -> IssueCouponRequest {
        let mut request = IssueCouponRequest::new(template_id, self.user_id)
            .with_actor(actor.id)
            .with_custom_expiry_days(self.custom_expiry_days);
        if let Some(reason) = self.reason {
            request = request.with_reason(reason);
        }
        request
    }
}

/// 批量签发请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkIssueBody {
    #[validate(length(min = 1, max = 100, message = "用户数必须在1-100之间"))]
    pub user_ids: Vec<Uuid>,
    #[validate(length(max = 500, message = "签发原因不能超过500字符"))]
    pub reason: Option<String>,
    #[validate(range(min = 1, max = 3650, message = "自定义有效天数必须在1-3650之间"))]
    pub custom_expiry_days: Option<i32>,
}

impl BulkIssueBody {
    pub fn into_request(self, template_id: Uuid, actor: &Actor) -> BulkIssueRequest {
        BulkIssueRequest {
            template_id,
            user_ids: self.user_ids,
            assigned_by_actor: Some(actor.id),
            reason: self.reason,
            custom_expiry_days: self.custom_expiry_days,
        }
    }
}

/// 模板实例列表查询
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceQuery {
    pub status: Option<InstanceStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

/// 钱包查询
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletQuery {
    pub status: Option<InstanceStatus>,
}

/// 撤回请求
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RevokeBody {
    #[validate(length(max = 500, message = "撤回原因不能超过500字符"))]
    pub reason: Option<String>,
}

// ==================== 核销 ====================

/// 核销请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemBody {
    #[validate(length(min = 1, max = 32, message = "兑换码不能为空"))]
    pub code: String,
    #[validate(custom(function = "money_amount"))]
    pub original_amount: Option<Decimal>,
    #[validate(length(min = 1, max = 100, message = "业务单号不能为空且不超过100字符"))]
    pub reference: String,
    #[validate(length(min = 1, max = 50, message = "核销渠道不能为空且不超过50字符"))]
    pub channel: String,
    #[validate(length(max = 200, message = "核销地点不能超过200字符"))]
    pub location: Option<String>,
}

impl RedeemBody {
    pub fn into_request(self, actor: &Actor) -> RedeemCouponRequest {
        RedeemCouponRequest {
            code: self.code,
            actor_id: Some(actor.id),
            original_amount: self.original_amount,
            reference: self.reference,
            channel: self.channel,
            location: self.location,
        }
    }
}

// ==================== 问卷发券 ====================

/// 创建问卷发券配置请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentBody {
    pub template_id: Uuid,
    #[validate(range(min = 1, message = "发放上限至少为1"))]
    pub award_limit: Option<i32>,
    #[validate(range(min = 1, max = 3650, message = "自定义有效天数必须在1-3650之间"))]
    pub custom_expiry_days: Option<i32>,
}

impl CreateAssignmentBody {
    pub fn into_request(self, survey_id: Uuid, actor: &Actor) -> CreateAssignmentRequest {
        CreateAssignmentRequest {
            survey_id,
            template_id: self.template_id,
            award_limit: self.award_limit,
            custom_expiry_days: self.custom_expiry_days,
            created_by: Some(actor.id),
        }
    }
}

/// 修改问卷发券配置请求
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAssignmentBody {
    #[validate(range(min = 1, message = "发放上限至少为1"))]
    pub award_limit: Option<i32>,
    #[validate(range(min = 1, max = 3650, message = "自定义有效天数必须在1-3650之间"))]
    pub custom_expiry_days: Option<i32>,
    pub is_active: Option<bool>,
}

impl From<UpdateAssignmentBody> for UpdateAssignmentRequest {
    fn from(body: UpdateAssignmentBody) -> Self {
        Self {
            award_limit: body.award_limit,
            custom_expiry_days: body.custom_expiry_days,
            is_active: body.is_active,
        }
    }
}

/// 问卷完成通知（内部接口，与 Kafka 事件等价）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyCompletedBody {
    pub response_id: Uuid,
    pub survey_id: Uuid,
    pub user_id: Uuid,
}
