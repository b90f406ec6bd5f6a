//! 优惠券模板、实例与核销记录实体
//!
//! 包含读取时的状态推导、有效期计算和折扣计算等纯逻辑

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{CouponType, InstanceStatus, TemplateStatus};
use crate::error::{Result, RewardsError};

/// 优惠券模板
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CouponTemplate {
    pub id: Uuid,
    /// 模板编码，全局唯一
    pub code: String,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    #[sqlx(default)]
    pub terms_and_conditions: Option<String>,
    pub coupon_type: CouponType,
    /// 百分比类型为折扣百分比，固定金额类型为抵扣金额
    pub value: Decimal,
    pub currency: String,
    #[sqlx(default)]
    pub min_spend: Option<Decimal>,
    #[sqlx(default)]
    pub max_discount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    #[sqlx(default)]
    pub valid_until: Option<DateTime<Utc>>,
    /// 总核销上限（null 表示不限）
    #[sqlx(default)]
    pub total_usage_cap: Option<i32>,
    pub per_user_usage_cap: i32,
    pub used_count: i32,
    /// 持久化状态，只会是 draft/active/paused
    pub status: TemplateStatus,
    #[sqlx(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CouponTemplate {
    /// 读取时推导的状态
    ///
    /// 草稿保持草稿；其余按 过期 > 用尽 > 持久化状态 的顺序判定
    pub fn resolved_status(&self, now: DateTime<Utc>) -> TemplateStatus {
        if self.status == TemplateStatus::Draft {
            return TemplateStatus::Draft;
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return TemplateStatus::Expired;
        }
        if self.is_exhausted() {
            return TemplateStatus::Exhausted;
        }
        self.status
    }

    /// 核销次数是否达到总上限
    pub fn is_exhausted(&self) -> bool {
        self.total_usage_cap.is_some_and(|cap| self.used_count >= cap)
    }

    /// 当前时间是否落在有效窗口内
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && self.valid_until.is_none_or(|until| now <= until)
    }

    /// 确认模板处于可签发/可核销状态
    pub fn ensure_active(&self, now: DateTime<Utc>) -> Result<()> {
        let status = self.resolved_status(now);
        if status != TemplateStatus::Active {
            return Err(RewardsError::TemplateNotActive {
                template_id: self.id,
                status,
            });
        }
        Ok(())
    }
}

/// 用户优惠券实例
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CouponInstance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    /// 兑换码，全局唯一
    pub redemption_code: String,
    pub status: InstanceStatus,
    pub issued_at: DateTime<Utc>,
    /// 实例自身的过期时间
    #[sqlx(default)]
    pub instance_expiry: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub used_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub used_by_actor: Option<Uuid>,
    #[sqlx(default)]
    pub assigned_by_actor: Option<Uuid>,
    #[sqlx(default)]
    pub assign_reason: Option<String>,
    #[sqlx(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub revoked_by: Option<Uuid>,
    #[sqlx(default)]
    pub revoke_reason: Option<String>,
}

impl CouponInstance {
    /// 结合模板有效期计算实际过期时间
    pub fn effective_expiry(
        &self,
        template_valid_until: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        effective_expiry(self.instance_expiry, template_valid_until)
    }

    /// 读取时呈现的状态：available 超过实际过期时间呈现为 expired
    pub fn read_status(
        &self,
        template_valid_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> InstanceStatus {
        if self.status == InstanceStatus::Available
            && self
                .effective_expiry(template_valid_until)
                .is_some_and(|expiry| now >= expiry)
        {
            return InstanceStatus::Expired;
        }
        self.status
    }
}

/// 核销记录
///
/// 每个实例最多一条（数据库唯一约束）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRecord {
    pub id: Uuid,
    pub instance_id: Uuid,
    #[sqlx(default)]
    pub original_amount: Option<Decimal>,
    #[sqlx(default)]
    pub discount_amount: Option<Decimal>,
    #[sqlx(default)]
    pub final_amount: Option<Decimal>,
    /// 业务单号（账单号、订单号等）
    pub reference: String,
    /// 核销渠道（front_desk、restaurant、spa 等）
    pub channel: String,
    #[sqlx(default)]
    pub staff_actor_id: Option<Uuid>,
    #[sqlx(default)]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 钱包行：实例关联模板的查询结果
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WalletRow {
    pub id: Uuid,
    pub template_id: Uuid,
    pub redemption_code: String,
    pub status: InstanceStatus,
    pub issued_at: DateTime<Utc>,
    #[sqlx(default)]
    pub instance_expiry: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub used_at: Option<DateTime<Utc>>,
    pub template_code: String,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    #[sqlx(default)]
    pub terms_and_conditions: Option<String>,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub currency: String,
    #[sqlx(default)]
    pub min_spend: Option<Decimal>,
    #[sqlx(default)]
    pub max_discount: Option<Decimal>,
    #[sqlx(default)]
    pub template_valid_until: Option<DateTime<Utc>>,
}

// ==================== 有效期与可核销判定 ====================

/// 实际过期时间
///
/// 两者都设置时取较早者，只设置一个时取该值，都未设置时永不过期
pub fn effective_expiry(
    instance_expiry: Option<DateTime<Utc>>,
    template_valid_until: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (instance_expiry, template_valid_until) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// 校验实例当前是否可核销
///
/// 过期边界为开区间：恰好等于实际过期时间即视为过期
pub fn check_redeemable(
    instance: &CouponInstance,
    template: &CouponTemplate,
    now: DateTime<Utc>,
) -> Result<()> {
    let code = &instance.redemption_code;

    match instance.status {
        InstanceStatus::Used => return Err(RewardsError::AlreadyUsed(code.clone())),
        InstanceStatus::Revoked => return Err(RewardsError::Revoked(code.clone())),
        InstanceStatus::Expired => return Err(RewardsError::Expired(code.clone())),
        InstanceStatus::Available => {}
    }

    if instance
        .effective_expiry(template.valid_until)
        .is_some_and(|expiry| now >= expiry)
    {
        return Err(RewardsError::Expired(code.clone()));
    }

    if template.valid_from > now {
        return Err(RewardsError::NotYetValid(code.clone()));
    }

    template.ensure_active(now)
}

// ==================== 折扣计算 ====================

/// 核销金额明细
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountBreakdown {
    pub original_amount: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub final_amount: Option<Decimal>,
}

/// 金额列为 NUMERIC(12, 2)：整数部分最多 10 位
pub const MONEY_LIMIT: i64 = 10_000_000_000;

/// 校验金额可以原样落库：非负、最多两位小数、小于 [`MONEY_LIMIT`]
pub fn validate_money(field: &str, amount: Decimal) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(RewardsError::Validation(format!("{field}不能为负数")));
    }
    if amount.normalize().scale() > 2 {
        return Err(RewardsError::Validation(format!("{field}最多保留两位小数")));
    }
    if amount >= Decimal::from(MONEY_LIMIT) {
        return Err(RewardsError::Validation(format!(
            "{field}必须小于 {MONEY_LIMIT}"
        )));
    }
    Ok(())
}

/// 按模板计算折扣
///
/// - 设置了最低消费时必须提供原始金额且不低于门槛
/// - 百分比：min(原价 × value / 100, 最高折扣)
/// - 固定金额：min(value, 原价)
/// - 其他类型：不计算折扣，折扣为空，最终金额等于原价
///
/// 结果保留两位小数，中点远离零舍入
pub fn compute_discount(
    template: &CouponTemplate,
    original_amount: Option<Decimal>,
) -> Result<DiscountBreakdown> {
    if let Some(amount) = original_amount {
        validate_money("原始金额", amount)?;
    }

    if let Some(min_spend) = template.min_spend {
        match original_amount {
            Some(amount) if amount >= min_spend => {}
            actual => {
                return Err(RewardsError::MinSpendNotMet {
                    required: min_spend,
                    actual,
                });
            }
        }
    }

    let Some(original) = original_amount else {
        return Ok(DiscountBreakdown::default());
    };

    let discount = match template.coupon_type {
        CouponType::Percentage => {
            let raw = original
                .checked_mul(template.value)
                .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
                .ok_or_else(overflow)?;
            match template.max_discount {
                Some(max) => raw.min(max),
                None => raw,
            }
        }
        CouponType::FixedAmount => template.value.min(original),
        CouponType::Bogo | CouponType::FreeUpgrade | CouponType::FreeService => {
            return Ok(DiscountBreakdown {
                original_amount: Some(original),
                discount_amount: None,
                final_amount: Some(original),
            });
        }
    };

    let discount = round_money(discount);
    let final_amount = original.checked_sub(discount).ok_or_else(overflow)?;

    Ok(DiscountBreakdown {
        original_amount: Some(original),
        discount_amount: Some(discount),
        final_amount: Some(round_money(final_amount)),
    })
}

fn overflow() -> RewardsError {
    RewardsError::Validation("折扣计算溢出".to_string())
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
