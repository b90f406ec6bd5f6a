//! API DTO 模块
//!
//! 包含所有请求和响应的数据传输对象

pub mod request;
pub mod response;

pub use request::{
    AwardPointsBody, BulkIssueBody, CreateAssignmentBody, CreateTemplateBody, CreateTierBody,
    InstanceQuery, IssueCouponBody, PageQuery, RedeemBody, RevokeBody, SurveyCompletedBody,
    TemplateQuery, TransactionQuery, UpdateAssignmentBody, UpdateTemplateBody, WalletQuery,
};
pub use response::{ApiResponse, PageResponse};
