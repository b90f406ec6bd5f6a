//! 数据库仓储层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 事务控制由调用方（服务层）决定，事务内操作以 `*_in_tx` / `*_for_update` 关联函数提供
//! - 数据库唯一约束冲突在仓储层映射为具体的业务错误
//! - 定义 trait 接口以支持 mock 测试

mod account_repo;
mod instance_repo;
mod redemption_repo;
mod survey_repo;
mod template_repo;
mod tier_repo;
mod traits;
mod transaction_repo;

pub use account_repo::AccountRepository;
pub use instance_repo::CouponInstanceRepository;
pub use redemption_repo::RedemptionRecordRepository;
pub use survey_repo::SurveyAssignmentRepository;
pub use template_repo::CouponTemplateRepository;
pub use tier_repo::TierRepository;
pub use traits::*;
pub use transaction_repo::PointsTransactionRepository;
