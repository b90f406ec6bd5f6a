//! Kafka 消费者与事件分发
//!
//! 将 `survey.completed` 消息解码为问卷完成事件并交给发券处理器。
//! 负载无法解析或重试耗尽的消息投递到死信队列，不阻塞后续消费。

use std::sync::Arc;

use loyalty_shared::config::AppConfig;
use loyalty_shared::events::{DeadLetter, SurveyCompletedEvent};
use loyalty_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use loyalty_shared::observability::{metrics, tracing};
use loyalty_shared::retry::{RetryPolicy, retry_with_policy};
use rewards_engine::error::RewardsError;
use tokio::sync::watch;
use ::tracing::{Instrument, error, info, info_span, warn};

use crate::error::ConsumerError;
use crate::processor::{DeadLetterSink, SurveyEventProcessor};

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// 发券流程已完成，issued 为本次新发放张数
    Rewarded { issued: usize },
    /// Redis 标记显示该回答已处理过
    Duplicate,
    /// 已转入死信队列
    DeadLettered,
}

/// 问卷完成事件消费者
pub struct SurveyRewardConsumer {
    consumer: KafkaConsumer,
    processor: Arc<dyn SurveyEventProcessor>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry_policy: RetryPolicy,
}

impl SurveyRewardConsumer {
    pub fn new(
        config: &AppConfig,
        processor: Arc<dyn SurveyEventProcessor>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self, ConsumerError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("survey-rewards"))?;
        Ok(Self {
            consumer,
            processor,
            dead_letters,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        self.consumer.subscribe(&[topics::SURVEY_COMPLETED])?;

        info!(topic = topics::SURVEY_COMPLETED, "问卷发券消费者已启动");

        let processor = self.processor;
        let dead_letters = self.dead_letters;
        let policy = self.retry_policy;

        self.consumer
            .start(shutdown, |msg| {
                let processor = processor.as_ref();
                let dead_letters = dead_letters.as_ref();
                let policy = &policy;
                let span = info_span!(
                    "survey_event",
                    partition = msg.partition,
                    offset = msg.offset,
                );
                tracing::set_parent_from_headers(&span, &msg.headers);
                async move { deliver(processor, dead_letters, policy, &msg).await }
                    .instrument(span)
            })
            .await;

        info!("问卷发券消费者已停止");
        Ok(())
    }
}

/// 处理一条消息并决定能否存储位点
///
/// 可重试的错误（死信投递失败）原样返回，消费循环保留位点并重投；
/// 不可重试的错误重投也无法恢复，记录后放行。
pub async fn deliver(
    processor: &dyn SurveyEventProcessor,
    dead_letters: &dyn DeadLetterSink,
    policy: &RetryPolicy,
    msg: &ConsumerMessage,
) -> Result<(), ConsumerError> {
    match handle_message(processor, dead_letters, policy, msg).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_retryable() => Err(e),
        Err(e) => {
            error!(
                error = %e,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "问卷完成事件无法处理，放弃该消息"
            );
            metrics::record_survey_reward("abandoned");
            Ok(())
        }
    }
}

/// 处理单条 Kafka 消息
///
/// 流程：反序列化 -> Redis 标记检查 -> 有界重试发券 -> 写入标记。
/// 只有死信本身投递失败时才返回错误。
pub async fn handle_message(
    processor: &dyn SurveyEventProcessor,
    dead_letters: &dyn DeadLetterSink,
    policy: &RetryPolicy,
    msg: &ConsumerMessage,
) -> Result<MessageOutcome, ConsumerError> {
    let event: SurveyCompletedEvent = match msg.deserialize_payload() {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, offset = msg.offset, "问卷事件反序列化失败，转入死信队列");
            metrics::record_survey_reward("invalid");
            let reason = ConsumerError::InvalidPayload(e.to_string());
            send_to_dlq(dead_letters, msg, &reason.to_string()).await?;
            return Ok(MessageOutcome::DeadLettered);
        }
    };

    let response_id = event.response_id.to_string();
    info!(
        event_id = %event.event_id,
        response_id = %response_id,
        survey_id = %event.survey_id,
        user_id = %event.user_id,
        "收到问卷完成事件"
    );

    // Redis 不可用时退回数据库奖励记录去重
    match processor.is_rewarded(&response_id).await {
        Ok(true) => {
            info!(response_id = %response_id, "回答已处理过，跳过");
            metrics::record_survey_reward("duplicate_event");
            return Ok(MessageOutcome::Duplicate);
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "读取发奖标记失败，继续由数据库去重"),
    }

    let result = retry_with_policy(
        policy,
        "survey_reward",
        RewardsError::is_retryable,
        || processor.process(&event),
    )
    .await;

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!(
                event_id = %event.event_id,
                response_id = %response_id,
                error = %e,
                "问卷发券重试耗尽，转入死信队列"
            );
            metrics::record_survey_reward("dead_lettered");
            send_to_dlq(dead_letters, msg, &e.to_string()).await?;
            return Ok(MessageOutcome::DeadLettered);
        }
    };

    if let Err(e) = processor.mark_rewarded(&response_id).await {
        // 标记缺失只会让重复事件多走一次数据库去重
        warn!(response_id = %response_id, error = %e, "写入发奖标记失败");
    }

    let issued = summary.issued_count();
    info!(
        response_id = %response_id,
        assignments = summary.results.len(),
        issued,
        "问卷完成事件处理完成"
    );

    Ok(MessageOutcome::Rewarded { issued })
}

/// 保留原始负载写入死信队列
async fn send_to_dlq(
    dead_letters: &dyn DeadLetterSink,
    msg: &ConsumerMessage,
    reason: &str,
) -> Result<(), ConsumerError> {
    let letter = DeadLetter::new(&msg.topic, msg.partition, msg.offset, &msg.payload, reason);
    metrics::record_dead_letter(&msg.topic);
    dead_letters.send(&letter).await.map_err(|e| {
        error!(
            partition = msg.partition,
            offset = msg.offset,
            error = %e,
            "发送到死信队列失败，消息可能丢失"
        );
        ConsumerError::Shared(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{MockDeadLetterSink, MockSurveyEventProcessor};
    use chrono::Utc;
    use loyalty_shared::error::LoyaltyError;
    use rewards_engine::models::{AssignmentOutcome, AssignmentResult, SurveyRewardSummary};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn make_message(payload: Vec<u8>) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::SURVEY_COMPLETED.to_string(),
            partition: 3,
            offset: 42,
            key: None,
            payload,
            timestamp: Some(Utc::now().timestamp_millis()),
            headers: HashMap::new(),
        }
    }

    fn event_message(event: &SurveyCompletedEvent) -> ConsumerMessage {
        make_message(serde_json::to_vec(event).expect("序列化测试事件失败"))
    }

    fn issued_summary(event: &SurveyCompletedEvent) -> SurveyRewardSummary {
        SurveyRewardSummary {
            response_id: event.response_id,
            survey_id: event.survey_id,
            user_id: event.user_id,
            results: vec![AssignmentResult {
                assignment_id: Uuid::now_v7(),
                template_id: Uuid::now_v7(),
                outcome: AssignmentOutcome::Issued {
                    instance_id: Uuid::now_v7(),
                    redemption_code: "CPN-ABCDEFGHJKLM".to_string(),
                },
            }],
        }
    }

    fn new_event() -> SurveyCompletedEvent {
        SurveyCompletedEvent::new(Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7())
    }

    #[tokio::test]
    async fn test_invalid_payload_goes_to_dlq() {
        let processor = MockSurveyEventProcessor::new();
        let mut sink = MockDeadLetterSink::new();
        sink.expect_send()
            .withf(|letter| {
                letter.source_topic == topics::SURVEY_COMPLETED
                    && letter.offset == 42
                    && letter.payload == "not-json"
            })
            .times(1)
            .returning(|_| Ok(()));

        let outcome = handle_message(
            &processor,
            &sink,
            &RetryPolicy::immediate(2),
            &make_message(b"not-json".to_vec()),
        )
        .await
        .unwrap();

        assert_eq!(outcome, MessageOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn test_marked_response_is_skipped() {
        let event = new_event();
        let mut processor = MockSurveyEventProcessor::new();
        processor.expect_is_rewarded().returning(|_| Ok(true));
        processor.expect_process().never();
        let sink = MockDeadLetterSink::new();

        let outcome = handle_message(
            &processor,
            &sink,
            &RetryPolicy::immediate(2),
            &event_message(&event),
        )
        .await
        .unwrap();

        assert_eq!(outcome, MessageOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_success_marks_response() {
        let event = new_event();
        let summary = issued_summary(&event);
        let expected_key = event.response_id.to_string();

        let mut processor = MockSurveyEventProcessor::new();
        processor.expect_is_rewarded().returning(|_| Ok(false));
        processor
            .expect_process()
            .times(1)
            .returning(move |_| Ok(summary.clone()));
        processor
            .expect_mark_rewarded()
            .withf(move |id| id.to_string() == expected_key)
            .times(1)
            .returning(|_| Ok(()));
        let sink = MockDeadLetterSink::new();

        let outcome = handle_message(
            &processor,
            &sink,
            &RetryPolicy::immediate(2),
            &event_message(&event),
        )
        .await
        .unwrap();

        assert_eq!(outcome, MessageOutcome::Rewarded { issued: 1 });
    }

    #[tokio::test]
    async fn test_marker_read_failure_falls_through() {
        let event = new_event();
        let summary = issued_summary(&event);

        let mut processor = MockSurveyEventProcessor::new();
        processor
            .expect_is_rewarded()
            .returning(|_| Err(LoyaltyError::Internal("redis down".to_string())));
        processor
            .expect_process()
            .times(1)
            .returning(move |_| Ok(summary.clone()));
        processor
            .expect_mark_rewarded()
            .returning(|_| Err(LoyaltyError::Internal("redis down".to_string())));
        let sink = MockDeadLetterSink::new();

        let outcome = handle_message(
            &processor,
            &sink,
            &RetryPolicy::immediate(2),
            &event_message(&event),
        )
        .await
        .unwrap();

        assert_eq!(outcome, MessageOutcome::Rewarded { issued: 1 });
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let event = new_event();
        let summary = issued_summary(&event);

        let mut seq = mockall::Sequence::new();
        let mut processor = MockSurveyEventProcessor::new();
        processor.expect_is_rewarded().returning(|_| Ok(false));
        processor
            .expect_process()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(RewardsError::StorageConflict));
        processor
            .expect_process()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(summary.clone()));
        processor.expect_mark_rewarded().returning(|_| Ok(()));
        let sink = MockDeadLetterSink::new();

        let outcome = handle_message(
            &processor,
            &sink,
            &RetryPolicy::immediate(2),
            &event_message(&event),
        )
        .await
        .unwrap();

        assert_eq!(outcome, MessageOutcome::Rewarded { issued: 1 });
    }

    #[tokio::test]
    async fn test_exhausted_retries_go_to_dlq() {
        let event = new_event();
        let mut processor = MockSurveyEventProcessor::new();
        processor.expect_is_rewarded().returning(|_| Ok(false));
        // 首次执行加 2 次重试
        processor
            .expect_process()
            .times(3)
            .returning(|_| Err(RewardsError::StorageConflict));
        processor.expect_mark_rewarded().never();

        let mut sink = MockDeadLetterSink::new();
        sink.expect_send()
            .withf(|letter| letter.partition == 3 && letter.payload.contains("responseId"))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = handle_message(
            &processor,
            &sink,
            &RetryPolicy::immediate(2),
            &event_message(&event),
        )
        .await
        .unwrap();

        assert_eq!(outcome, MessageOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn test_dlq_failure_is_reported() {
        let processor = MockSurveyEventProcessor::new();
        let mut sink = MockDeadLetterSink::new();
        sink.expect_send()
            .returning(|_| Err(LoyaltyError::Kafka("broker down".to_string())));

        let result = handle_message(
            &processor,
            &sink,
            &RetryPolicy::immediate(0),
            &make_message(b"{}".to_vec()),
        )
        .await;

        assert!(matches!(result, Err(ConsumerError::Shared(LoyaltyError::Kafka(_)))));
    }

    #[tokio::test]
    async fn test_dlq_outage_holds_the_message() {
        let mut processor = MockSurveyEventProcessor::new();
        processor.expect_is_rewarded().returning(|_| Ok(false));
        processor
            .expect_process()
            .times(1)
            .returning(|_| Err(RewardsError::NoActiveTier));
        processor.expect_mark_rewarded().never();
        let mut sink = MockDeadLetterSink::new();
        sink.expect_send()
            .times(1)
            .returning(|_| Err(LoyaltyError::Kafka("broker down".to_string())));

        let result = deliver(
            &processor,
            &sink,
            &RetryPolicy::immediate(0),
            &event_message(&new_event()),
        )
        .await;

        assert!(matches!(result, Err(ConsumerError::Shared(LoyaltyError::Kafka(_)))));
    }

    #[tokio::test]
    async fn test_unrecoverable_dlq_error_releases_the_message() {
        let processor = MockSurveyEventProcessor::new();
        let mut sink = MockDeadLetterSink::new();
        sink.expect_send().times(1).returning(|_| {
            let err = serde_json::from_str::<u32>("x").unwrap_err();
            Err(LoyaltyError::Serialization(err))
        });

        let result = deliver(
            &processor,
            &sink,
            &RetryPolicy::immediate(0),
            &make_message(b"not-json".to_vec()),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_delivered_message_releases_offset() {
        let event = new_event();
        let summary = issued_summary(&event);
        let mut processor = MockSurveyEventProcessor::new();
        processor.expect_is_rewarded().returning(|_| Ok(false));
        processor
            .expect_process()
            .times(1)
            .returning(move |_| Ok(summary.clone()));
        processor.expect_mark_rewarded().returning(|_| Ok(()));
        let sink = MockDeadLetterSink::new();

        let result = deliver(
            &processor,
            &sink,
            &RetryPolicy::immediate(0),
            &event_message(&event),
        )
        .await;

        assert!(result.is_ok());
    }
}
