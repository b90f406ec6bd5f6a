//! 问卷发券配置与奖励记录
//!
//! 奖励记录以 (response_id, assignment_id) 为幂等键，与发券在同一事务内写入

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::InstanceStatus;

/// 问卷 -> 优惠券模板的发券配置
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SurveyCouponAssignment {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub template_id: Uuid,
    /// 最多发放张数（null 表示不限）
    #[sqlx(default)]
    pub award_limit: Option<i32>,
    pub awards_given: i32,
    /// 自定义有效天数，覆盖模板默认有效期
    #[sqlx(default)]
    pub custom_expiry_days: Option<i32>,
    pub is_active: bool,
    #[sqlx(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl SurveyCouponAssignment {
    /// 是否还能继续发放
    pub fn has_capacity(&self) -> bool {
        self.is_active && self.award_limit.is_none_or(|limit| self.awards_given < limit)
    }
}

/// 问卷奖励记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRewardRecord {
    pub id: Uuid,
    pub response_id: Uuid,
    pub assignment_id: Uuid,
    pub instance_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 问卷奖励历史条目：奖励记录关联发券配置与优惠券实例
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRewardHistoryEntry {
    pub id: Uuid,
    pub response_id: Uuid,
    pub assignment_id: Uuid,
    pub template_id: Uuid,
    pub instance_id: Uuid,
    pub redemption_code: String,
    /// 实例的持久化状态
    pub instance_status: InstanceStatus,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 单个发券配置的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentOutcome {
    /// 本次新发放
    #[serde(rename_all = "camelCase")]
    Issued {
        instance_id: Uuid,
        redemption_code: String,
    },
    /// 该回答已领取过，幂等跳过
    AlreadyRewarded,
    /// 未发放（上限、模板不可用等），reason 为错误码
    Skipped { reason: String },
}

impl AssignmentOutcome {
    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Issued { .. } => "issued",
            Self::AlreadyRewarded => "already_rewarded",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// 一次问卷完成事件的处理汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRewardSummary {
    pub response_id: Uuid,
    pub survey_id: Uuid,
    pub user_id: Uuid,
    pub results: Vec<AssignmentResult>,
}

impl SurveyRewardSummary {
    /// 本次新发放的张数
    pub fn issued_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, AssignmentOutcome::Issued { .. }))
            .count()
    }
}

/// 单个发券配置的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub assignment_id: Uuid,
    pub template_id: Uuid,
    #[serde(flatten)]
    pub outcome: AssignmentOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(award_limit: Option<i32>, awards_given: i32) -> SurveyCouponAssignment {
        SurveyCouponAssignment {
            id: Uuid::now_v7(),
            survey_id: Uuid::now_v7(),
            template_id: Uuid::now_v7(),
            award_limit,
            awards_given,
            custom_expiry_days: None,
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_has_capacity() {
        assert!(assignment(None, 10_000).has_capacity());
        assert!(assignment(Some(3), 2).has_capacity());
        assert!(!assignment(Some(3), 3).has_capacity());

        let mut inactive = assignment(None, 0);
        inactive.is_active = false;
        assert!(!inactive.has_capacity());
    }

    #[test]
    fn test_outcome_serialization() {
        let result = AssignmentResult {
            assignment_id: Uuid::nil(),
            template_id: Uuid::nil(),
            outcome: AssignmentOutcome::Issued {
                instance_id: Uuid::nil(),
                redemption_code: "CPN-ABCDEFGHJKLM".to_string(),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "ISSUED");
        assert_eq!(json["redemptionCode"], "CPN-ABCDEFGHJKLM");

        let json = serde_json::to_value(AssignmentOutcome::Skipped {
            reason: "CAP_EXCEEDED".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "SKIPPED");
        assert_eq!(json["reason"], "CAP_EXCEEDED");
    }

    #[test]
    fn test_issued_count() {
        let summary = SurveyRewardSummary {
            response_id: Uuid::nil(),
            survey_id: Uuid::nil(),
            user_id: Uuid::nil(),
            results: vec![
                AssignmentResult {
                    assignment_id: Uuid::nil(),
                    template_id: Uuid::nil(),
                    outcome: AssignmentOutcome::AlreadyRewarded,
                },
                AssignmentResult {
                    assignment_id: Uuid::nil(),
                    template_id: Uuid::nil(),
                    outcome: AssignmentOutcome::Issued {
                        instance_id: Uuid::nil(),
                        redemption_code: "CPN-X".to_string(),
                    },
                },
            ],
        };
        assert_eq!(summary.issued_count(), 1);
        assert_eq!(AssignmentOutcome::AlreadyRewarded.label(), "already_rewarded");
    }
}
