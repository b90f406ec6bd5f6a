//! 积分账本与优惠券引擎
//!
//! 酒店会员计划的核心子系统：追加积分流水并推导余额与等级，
//! 按模板签发用户优惠券实例并核销，问卷完成后自动发券。
//!
//! ## 模块结构
//!
//! - `models`: 领域模型与纯计算逻辑（等级推导、有效期、折扣）
//! - `error`: 错误类型定义
//! - `repository`: 数据库仓储层
//! - `service`: 业务服务层
//!
//! ## 服务一览
//!
//! - `LedgerService`: 积分流水、余额、等级
//! - `CatalogService`: 优惠券模板管理
//! - `IssueService`: 优惠券签发、资格预检、钱包、撤回
//! - `RedemptionService`: 兑换码校验与核销
//! - `SurveyRewardBridge`: 问卷完成自动发券

pub mod error;
pub mod models;
pub mod repository;
pub mod service;

pub use error::{ErrorCategory, Result, RewardsError};
pub use models::*;
pub use repository::{
    AccountRepository, CouponInstanceRepository, CouponTemplateRepository,
    PointsTransactionRepository, RedemptionRecordRepository, SurveyAssignmentRepository,
    TierRepository,
};
pub use service::{
    AssignmentRewarder, CatalogService, IssueService, LedgerService, PgAssignmentRewarder,
    RedemptionService, SurveyRewardBridge, dto, generate_redemption_code,
};
