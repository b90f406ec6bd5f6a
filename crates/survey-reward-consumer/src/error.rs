//! 消费服务错误类型
//!
//! 发券失败在消费流程内部转入死信队列，不会以错误形式传出。

use loyalty_shared::error::LoyaltyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Shared(#[from] LoyaltyError),

    #[error("事件负载无效: {0}")]
    InvalidPayload(String),
}

impl ConsumerError {
    /// 重投同一条消息可能成功（死信队列、数据库暂时不可用）
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Shared(e) => e.is_retryable(),
            Self::InvalidPayload(_) => false,
        }
    }
}
