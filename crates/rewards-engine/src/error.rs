//! 积分与优惠券引擎错误类型
//!
//! 定义服务层的业务错误和系统错误，并按错误分类映射到调用方的处理策略

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{CapScope, InstanceStatus, TemplateStatus};

/// PostgreSQL 唯一约束冲突
const PG_UNIQUE_VIOLATION: &str = "23505";
/// 可串行化失败
const PG_SERIALIZATION_FAILURE: &str = "40001";
/// 死锁
const PG_DEADLOCK_DETECTED: &str = "40P01";

/// 引擎错误类型
#[derive(Debug, Error)]
pub enum RewardsError {
    // === 资源不存在 ===
    #[error("积分账户不存在: user_id={0}")]
    AccountNotFound(Uuid),

    #[error("会员等级不存在: {0}")]
    TierNotFound(Uuid),

    #[error("没有启用中的会员等级")]
    NoActiveTier,

    #[error("优惠券模板不存在: {0}")]
    TemplateNotFound(Uuid),

    #[error("优惠券实例不存在: {0}")]
    InstanceNotFound(Uuid),

    #[error("兑换码不存在: {0}")]
    CodeNotFound(String),

    #[error("问卷发券配置不存在: {0}")]
    AssignmentNotFound(Uuid),

    // === 参数校验 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("优惠券模板编码已存在: {0}")]
    DuplicateTemplateCode(String),

    #[error("启用中的等级门槛重复: min_balance={0}")]
    DuplicateTierThreshold(i64),

    #[error("问卷已配置该优惠券模板: survey_id={survey_id}, template_id={template_id}")]
    DuplicateAssignment { survey_id: Uuid, template_id: Uuid },

    #[error("未达到最低消费: 需要 {required}, 实际 {actual:?}")]
    MinSpendNotMet {
        required: Decimal,
        actual: Option<Decimal>,
    },

    // === 状态冲突 ===
    #[error("优惠券模板不可用: template_id={template_id}, status={status}")]
    TemplateNotActive {
        template_id: Uuid,
        status: TemplateStatus,
    },

    #[error("模板状态不允许此操作: template_id={template_id}, from={from}, to={to}")]
    InvalidTemplateTransition {
        template_id: Uuid,
        from: TemplateStatus,
        to: TemplateStatus,
    },

    #[error("模板当前状态不允许修改: template_id={template_id}, status={status}")]
    TemplateNotEditable {
        template_id: Uuid,
        status: TemplateStatus,
    },

    #[error("优惠券模板仍被引用，不能删除: {0}")]
    TemplateInUse(Uuid),

    #[error("超出领取上限: template_id={template_id}, scope={scope}")]
    CapExceeded { template_id: Uuid, scope: CapScope },

    #[error("优惠券已使用: {0}")]
    AlreadyUsed(String),

    #[error("优惠券已过期: {0}")]
    Expired(String),

    #[error("优惠券尚未生效: {0}")]
    NotYetValid(String),

    #[error("优惠券已撤回: {0}")]
    Revoked(String),

    #[error("优惠券实例状态不允许此操作: instance_id={instance_id}, status={status}")]
    InstanceNotRevocable {
        instance_id: Uuid,
        status: InstanceStatus,
    },

    #[error("问卷发券已达上限: assignment_id={0}")]
    AwardLimitReached(Uuid),

    // === 资源耗尽 ===
    #[error("兑换码生成失败: 已尝试 {attempts} 次")]
    CodeGenerationExhausted { attempts: u32 },

    // === 存储冲突 ===
    #[error("并发写入冲突，请重试")]
    StorageConflict,

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, RewardsError>;

/// 错误分类
///
/// 调用方（HTTP、消费者）只依据分类决定响应码或重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    ValidationFailed,
    StateConflict,
    ResourceExhausted,
    StorageConflict,
    Internal,
}

impl From<sqlx::Error> for RewardsError {
    fn from(err: sqlx::Error) -> Self {
        if is_serialization_failure(&err) {
            return Self::StorageConflict;
        }
        Self::Database(err)
    }
}

impl From<loyalty_shared::error::LoyaltyError> for RewardsError {
    fn from(err: loyalty_shared::error::LoyaltyError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl RewardsError {
    /// 错误分类
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AccountNotFound(_)
            | Self::TierNotFound(_)
            | Self::NoActiveTier
            | Self::TemplateNotFound(_)
            | Self::InstanceNotFound(_)
            | Self::CodeNotFound(_)
            | Self::AssignmentNotFound(_) => ErrorCategory::NotFound,
            Self::Validation(_)
            | Self::DuplicateTemplateCode(_)
            | Self::DuplicateTierThreshold(_)
            | Self::DuplicateAssignment { .. }
            | Self::MinSpendNotMet { .. } => ErrorCategory::ValidationFailed,
            Self::TemplateNotActive { .. }
            | Self::InvalidTemplateTransition { .. }
            | Self::TemplateNotEditable { .. }
            | Self::TemplateInUse(_)
            | Self::CapExceeded { .. }
            | Self::AlreadyUsed(_)
            | Self::Expired(_)
            | Self::NotYetValid(_)
            | Self::Revoked(_)
            | Self::InstanceNotRevocable { .. }
            | Self::AwardLimitReached(_) => ErrorCategory::StateConflict,
            Self::CodeGenerationExhausted { .. } => ErrorCategory::ResourceExhausted,
            Self::StorageConflict => ErrorCategory::StorageConflict,
            Self::Database(_) | Self::Serialization(_) | Self::Cache(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageConflict | Self::Database(_))
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::NotFound | ErrorCategory::ValidationFailed | ErrorCategory::StateConflict
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::TierNotFound(_) => "TIER_NOT_FOUND",
            Self::NoActiveTier => "NO_ACTIVE_TIER",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::CodeNotFound(_) => "CODE_NOT_FOUND",
            Self::AssignmentNotFound(_) => "ASSIGNMENT_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DuplicateTemplateCode(_) => "DUPLICATE_TEMPLATE_CODE",
            Self::DuplicateTierThreshold(_) => "DUPLICATE_TIER_THRESHOLD",
            Self::DuplicateAssignment { .. } => "DUPLICATE_ASSIGNMENT",
            Self::MinSpendNotMet { .. } => "MIN_SPEND_NOT_MET",
            Self::TemplateNotActive { .. } => "TEMPLATE_NOT_ACTIVE",
            Self::InvalidTemplateTransition { .. } => "INVALID_TEMPLATE_TRANSITION",
            Self::TemplateNotEditable { .. } => "TEMPLATE_NOT_EDITABLE",
            Self::TemplateInUse(_) => "TEMPLATE_IN_USE",
            Self::CapExceeded { .. } => "CAP_EXCEEDED",
            Self::AlreadyUsed(_) => "ALREADY_USED",
            Self::Expired(_) => "EXPIRED",
            Self::NotYetValid(_) => "NOT_YET_VALID",
            Self::Revoked(_) => "REVOKED",
            Self::InstanceNotRevocable { .. } => "INSTANCE_NOT_REVOCABLE",
            Self::AwardLimitReached(_) => "AWARD_LIMIT_REACHED",
            Self::CodeGenerationExhausted { .. } => "CODE_GENERATION_EXHAUSTED",
            Self::StorageConflict => "STORAGE_CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// 是否为唯一约束冲突，`constraint` 指定时要求约束名一致
pub fn is_unique_violation(err: &sqlx::Error, constraint: Option<&str>) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let unique = db_err.is_unique_violation()
                || db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION);
            unique && constraint.is_none_or(|name| db_err.constraint() == Some(name))
        }
        _ => false,
    }
}

/// 是否为外键约束冲突
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_foreign_key_violation(),
        _ => false,
    }
}

/// 可串行化失败或死锁，调用方应基于最新状态重试
pub fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(PG_SERIALIZATION_FAILURE) | Some(PG_DEADLOCK_DETECTED)
        ),
        _ => false,
    }
}
