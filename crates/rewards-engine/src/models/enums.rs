//! 引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx，存储为小写下划线字符串）和 JSON（serde）序列化

use std::fmt;

use serde::{Deserialize, Serialize};

/// 积分流水类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum TransactionType {
    /// 住店累积
    EarnedStay,
    /// 活动奖励
    EarnedBonus,
    /// 积分兑换消耗
    Redeemed,
    /// 积分过期
    Expired,
    /// 管理员调整（可正可负）
    AdminAdjustment,
    /// 管理员赠送
    AdminAward,
    /// 管理员扣减
    AdminDeduction,
    /// 问卷奖励
    SurveyReward,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EarnedStay => "earned_stay",
            Self::EarnedBonus => "earned_bonus",
            Self::Redeemed => "redeemed",
            Self::Expired => "expired",
            Self::AdminAdjustment => "admin_adjustment",
            Self::AdminAward => "admin_award",
            Self::AdminDeduction => "admin_deduction",
            Self::SurveyReward => "survey_reward",
        }
    }

    /// 是否为管理员发起的流水（需要记录操作人）
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::AdminAdjustment | Self::AdminAward | Self::AdminDeduction
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 优惠券类型
///
/// 只有百分比和固定金额两类会产生折扣金额，其余类型核销时金额原样透传
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CouponType {
    Percentage,
    FixedAmount,
    /// 买一送一
    Bogo,
    FreeUpgrade,
    FreeService,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::FixedAmount => "fixed_amount",
            Self::Bogo => "bogo",
            Self::FreeUpgrade => "free_upgrade",
            Self::FreeService => "free_service",
        }
    }

    /// 是否产生折扣金额
    pub fn is_monetary(&self) -> bool {
        matches!(self, Self::Percentage | Self::FixedAmount)
    }
}

impl fmt::Display for CouponType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 优惠券模板状态
///
/// 数据库只持久化 draft/active/paused，expired/exhausted 在读取时推导
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum TemplateStatus {
    /// 草稿 - 配置中，不可签发
    #[default]
    Draft,
    /// 已上线 - 可签发可核销
    Active,
    /// 已暂停 - 停止签发和核销，可重新上线
    Paused,
    /// 已过期 - 超过 valid_until（推导）
    Expired,
    /// 已用尽 - 核销次数达到总上限（推导）
    Exhausted,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
        }
    }

    /// 是否为只能推导、不能持久化的状态
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Expired | Self::Exhausted)
    }
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 优惠券实例状态
///
/// `expired` 不会主动写库：available 超过有效期在读取时呈现为 expired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Available,
    Used,
    Expired,
    Revoked,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Used => "used",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 领取上限的作用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapScope {
    /// 模板总量上限
    Global,
    /// 单用户上限
    PerUser,
}

impl fmt::Display for CapScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::PerUser => f.write_str("per_user"),
        }
    }
}

/// 兑换码校验不通过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidReason {
    NotFound,
    AlreadyUsed,
    Revoked,
    Expired,
    NotYetValid,
    TemplateNotActive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_serialization() {
        let json = serde_json::to_string(&TransactionType::EarnedStay).unwrap();
        assert_eq!(json, "\"EARNED_STAY\"");

        let parsed: TransactionType = serde_json::from_str("\"SURVEY_REWARD\"").unwrap();
        assert_eq!(parsed, TransactionType::SurveyReward);
        assert_eq!(parsed.as_str(), "survey_reward");
    }

    #[test]
    fn test_transaction_type_is_admin() {
        assert!(TransactionType::AdminAward.is_admin());
        assert!(TransactionType::AdminDeduction.is_admin());
        assert!(!TransactionType::EarnedStay.is_admin());
        assert!(!TransactionType::SurveyReward.is_admin());
    }

    #[test]
    fn test_coupon_type_is_monetary() {
        assert!(CouponType::Percentage.is_monetary());
        assert!(CouponType::FixedAmount.is_monetary());
        assert!(!CouponType::Bogo.is_monetary());
        assert!(!CouponType::FreeUpgrade.is_monetary());
        assert!(!CouponType::FreeService.is_monetary());
    }

    #[test]
    fn test_template_status_derived() {
        assert!(TemplateStatus::Expired.is_derived());
        assert!(TemplateStatus::Exhausted.is_derived());
        assert!(!TemplateStatus::Paused.is_derived());
        assert_eq!(TemplateStatus::default(), TemplateStatus::Draft);
    }

    #[test]
    fn test_display() {
        assert_eq!(TemplateStatus::Paused.to_string(), "paused");
        assert_eq!(InstanceStatus::Revoked.to_string(), "revoked");
        assert_eq!(CapScope::PerUser.to_string(), "per_user");
        assert_eq!(CouponType::FixedAmount.to_string(), "fixed_amount");
    }
}
