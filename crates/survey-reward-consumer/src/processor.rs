//! 问卷事件处理器
//!
//! `SurveyEventProcessor` 把发券桥接与 Redis 去重标记组合在一起，
//! `DeadLetterSink` 负责投递无法处理的消息。两者都是 trait，消费流程可脱离外部依赖测试。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loyalty_shared::cache::{Cache, CacheKey};
use loyalty_shared::error::LoyaltyError;
use loyalty_shared::events::{DeadLetter, SurveyCompletedEvent};
use loyalty_shared::kafka::{KafkaProducer, topics};
use loyalty_shared::observability::tracing;
use rewards_engine::SurveyRewardBridge;
use rewards_engine::error::RewardsError;
use rewards_engine::models::SurveyRewardSummary;
use ::tracing::{Span, debug};

/// 问卷完成事件处理
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SurveyEventProcessor: Send + Sync {
    /// 该回答是否已确认发过奖（快速路径，不作为最终依据）
    async fn is_rewarded(&self, response_id: &str) -> Result<bool, LoyaltyError>;

    /// 执行发券
    async fn process(
        &self,
        event: &SurveyCompletedEvent,
    ) -> Result<SurveyRewardSummary, RewardsError>;

    /// 记录该回答已处理完毕
    async fn mark_rewarded(&self, response_id: &str) -> Result<(), LoyaltyError>;
}

/// 死信投递
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, letter: &DeadLetter) -> Result<(), LoyaltyError>;
}

/// 基于发券桥接与 Redis 标记的处理器
pub struct BridgeEventProcessor {
    bridge: Arc<SurveyRewardBridge>,
    cache: Option<Arc<Cache>>,
    marker_ttl: Duration,
}

impl BridgeEventProcessor {
    pub fn new(
        bridge: Arc<SurveyRewardBridge>,
        cache: Option<Arc<Cache>>,
        marker_ttl: Duration,
    ) -> Self {
        Self {
            bridge,
            cache,
            marker_ttl,
        }
    }
}

#[async_trait]
impl SurveyEventProcessor for BridgeEventProcessor {
    async fn is_rewarded(&self, response_id: &str) -> Result<bool, LoyaltyError> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };

        let exists = cache.exists(&CacheKey::survey_rewarded(response_id)).await?;
        if exists {
            debug!(response_id, "回答已有发奖标记");
        }
        Ok(exists)
    }

    async fn process(
        &self,
        event: &SurveyCompletedEvent,
    ) -> Result<SurveyRewardSummary, RewardsError> {
        self.bridge
            .on_survey_completed(event.response_id, event.survey_id, event.user_id)
            .await
    }

    async fn mark_rewarded(&self, response_id: &str) -> Result<(), LoyaltyError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };

        // 值本身无意义，只看键是否存在
        cache
            .set_nx(&CacheKey::survey_rewarded(response_id), &"1", self.marker_ttl)
            .await?;
        debug!(response_id, "回答已标记为已发奖");
        Ok(())
    }
}

/// 投递到 `survey.completed.dlq` 的死信出口
pub struct KafkaDeadLetterSink {
    producer: KafkaProducer,
}

impl KafkaDeadLetterSink {
    pub fn new(producer: KafkaProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn send(&self, letter: &DeadLetter) -> Result<(), LoyaltyError> {
        let key = format!("{}-{}", letter.partition, letter.offset);
        // 死信沿用原消息的追踪上下文，排查时可关联到上游
        let mut headers = HashMap::new();
        tracing::inject_into_headers(&Span::current(), &mut headers);

        let (partition, offset) = self
            .producer
            .send_json(topics::SURVEY_COMPLETED_DLQ, &key, letter, &headers)
            .await?;
        debug!(partition, offset, "死信已投递");
        Ok(())
    }
}
