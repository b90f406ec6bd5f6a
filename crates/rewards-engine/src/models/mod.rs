//! 引擎领域模型
//!
//! 包含积分、等级、优惠券和问卷奖励的核心实体定义

pub mod coupon;
pub mod enums;
pub mod loyalty;
pub mod survey;

// 重新导出常用类型
pub use coupon::{
    CouponInstance, CouponTemplate, DiscountBreakdown, RedemptionRecord, WalletRow,
    MONEY_LIMIT, check_redeemable, compute_discount, effective_expiry, validate_money,
};
pub use enums::{
    CapScope, CouponType, InstanceStatus, InvalidReason, TemplateStatus, TransactionType,
};
pub use loyalty::{
    LoyaltyAccount, PointsTransaction, Tier, next_tier, progress_percentage, resolve_tier,
};
pub use survey::{
    AssignmentOutcome, AssignmentResult, SurveyCouponAssignment, SurveyRewardHistoryEntry,
    SurveyRewardRecord, SurveyRewardSummary,
};
