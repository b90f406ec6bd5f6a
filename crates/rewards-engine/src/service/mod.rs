//! 服务层
//!
//! 实现积分与优惠券业务逻辑，协调仓储层和缓存层。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `ledger_service`: 积分账本与会员等级
//! - `catalog_service`: 优惠券模板目录
//! - `issue_service`: 优惠券签发、钱包与撤回
//! - `redemption_service`: 兑换码校验与核销
//! - `survey_bridge`: 问卷完成发券

pub mod catalog_service;
pub mod dto;
pub mod issue_service;
pub mod ledger_service;
pub mod redemption_service;
pub mod survey_bridge;

pub use catalog_service::CatalogService;
pub use issue_service::{IssueService, generate_redemption_code};
pub use ledger_service::LedgerService;
pub use redemption_service::RedemptionService;
pub use survey_bridge::{AssignmentRewarder, PgAssignmentRewarder, SurveyRewardBridge};
