//! 积分账户、流水与会员等级实体
//!
//! 等级推导是纯函数：给定启用中的等级表和余额，结果唯一确定

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::TransactionType;

/// 会员等级
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub id: Uuid,
    pub name: String,
    /// 解锁该等级所需的最低余额
    pub min_balance: i64,
    pub sort_order: i32,
    /// 展示色（#RRGGBB）
    pub color: String,
    pub benefits: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 积分账户
///
/// 与用户一对一；账户存在即视为用户存在
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyAccount {
    pub user_id: Uuid,
    /// 当前余额，始终等于全部流水 delta 之和
    pub current_balance: i64,
    #[sqlx(default)]
    pub tier_id: Option<Uuid>,
    pub tier_updated_at: DateTime<Utc>,
    pub balance_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 积分流水
///
/// 只追加，创建后不修改不删除
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointsTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// 带符号的变动值，不为 0
    pub delta: i64,
    pub transaction_type: TransactionType,
    #[sqlx(default)]
    pub description: Option<String>,
    #[sqlx(default)]
    pub reference_id: Option<String>,
    #[sqlx(default)]
    pub admin_actor_id: Option<Uuid>,
    #[sqlx(default)]
    pub admin_reason: Option<String>,
    /// 积分失效时间，仅作记录
    #[sqlx(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ==================== 等级推导 ====================

/// 推导余额对应的等级
///
/// 取 min_balance ≤ balance 中门槛最高的启用等级；
/// 余额低于所有门槛（如负余额）时落到门槛最低的启用等级。
/// 没有启用等级时返回 None。
pub fn resolve_tier(tiers: &[Tier], balance: i64) -> Option<&Tier> {
    let active = tiers.iter().filter(|t| t.is_active);

    active
        .clone()
        .filter(|t| t.min_balance <= balance)
        .max_by_key(|t| t.min_balance)
        .or_else(|| active.min_by_key(|t| t.min_balance))
}

/// 当前等级之上的下一个启用等级
pub fn next_tier<'a>(tiers: &'a [Tier], current: &Tier) -> Option<&'a Tier> {
    tiers
        .iter()
        .filter(|t| t.is_active && t.min_balance > current.min_balance)
        .min_by_key(|t| t.min_balance)
}

/// 升级进度百分比
///
/// (余额 - 当前门槛) / (下一门槛 - 当前门槛) × 100，截断到 [0, 100]；已是最高等级时为 100
pub fn progress_percentage(balance: i64, current: &Tier, next: Option<&Tier>) -> f64 {
    let Some(next) = next else {
        return 100.0;
    };

    let span = (next.min_balance - current.min_balance) as f64;
    if span <= 0.0 {
        return 100.0;
    }

    let progress = (balance - current.min_balance) as f64 / span * 100.0;
    (progress.clamp(0.0, 100.0) * 100.0).round() / 100.0
}
