//! 问卷完成事件消费服务
//!
//! 消费问卷系统投递的 `survey.completed` 事件，按问卷发券配置签发优惠券。
//! 事件至少投递一次，重复到达由 Redis 标记快速拦截，最终由数据库奖励记录兜底。

pub mod consumer;
pub mod error;
pub mod processor;

pub use consumer::{MessageOutcome, SurveyRewardConsumer, handle_message};
pub use error::ConsumerError;
pub use processor::{
    BridgeEventProcessor, DeadLetterSink, KafkaDeadLetterSink, SurveyEventProcessor,
};
