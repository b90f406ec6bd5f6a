//! Kafka 收发
//!
//! 问卷系统以至少一次语义投递 `survey.completed`。消费端关闭自动存储位点，
//! 每条消息处理完（成功或已转入死信）才存储位点，由后台自动提交；
//! 处理失败的消息原地退避重投，进程在此期间退出时该消息会被重新投递。

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::LoyaltyError;
use crate::retry::RetryPolicy;

pub mod topics {
    /// 问卷回答完成事件
    pub const SURVEY_COMPLETED: &str = "survey.completed";
    /// 无法处理的问卷事件
    pub const SURVEY_COMPLETED_DLQ: &str = "survey.completed.dlq";
}

/// 单条消息投递超时
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// 退避指数的上限，之后一直按最大间隔重投
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// 拥有所有权的消费消息，可跨 await 传给处理函数
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let headers = msg
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|h| {
                        let value = std::str::from_utf8(h.value?).ok()?;
                        Some((h.key.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg
                .key()
                .and_then(|k| std::str::from_utf8(k).ok())
                .map(String::from),
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 按 JSON 解析负载，格式错误属于不可重试的序列化错误
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, LoyaltyError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Kafka 生产者，内部为 Arc 包装
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 死信不能丢：要求全部副本确认并开启幂等写入
    pub fn new(config: &KafkaConfig) -> Result<Self, LoyaltyError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", DELIVERY_TIMEOUT.as_millis().to_string())
            .create()
            .map_err(|e| LoyaltyError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已创建");
        Ok(Self { producer })
    }

    /// 发送字节负载，返回 (partition, offset)
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<(i32, i64), LoyaltyError> {
        let headers = headers.iter().fold(OwnedHeaders::new(), |acc, (name, value)| {
            acc.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            })
        });

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(headers);

        let delivery = self
            .producer
            .send(record, DELIVERY_TIMEOUT)
            .await
            .map_err(|(e, _)| LoyaltyError::Kafka(format!("投递到 {topic} 失败: {e}")))?;

        debug!(topic, key, partition = delivery.partition, offset = delivery.offset, "消息已投递");
        Ok((delivery.partition, delivery.offset))
    }

    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
        headers: &HashMap<String, String>,
    ) -> Result<(i32, i64), LoyaltyError> {
        let payload = serde_json::to_vec(value)?;
        self.send(topic, key, &payload, headers).await
    }
}

/// Kafka 消费者
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    redelivery: RetryPolicy,
}

/// 处理失败后的重投间隔：1 秒起步，每次翻倍，上限 30 秒，不限次数
pub fn default_redelivery_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: u32::MAX,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
    }
}

impl KafkaConsumer {
    /// `group_suffix` 追加在配置的消费组名之后
    pub fn new(config: &KafkaConfig, group_suffix: Option<&str>) -> Result<Self, LoyaltyError> {
        let group_id = consumer_group_id(&config.consumer_group, group_suffix);

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| LoyaltyError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已创建");
        Ok(Self {
            consumer,
            redelivery: default_redelivery_policy(),
        })
    }

    pub fn with_redelivery_policy(mut self, policy: RetryPolicy) -> Self {
        self.redelivery = policy;
        self
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<(), LoyaltyError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| LoyaltyError::Kafka(format!("订阅失败: {e}")))?;
        info!(?topics, "已订阅");
        Ok(())
    }

    /// 逐条消费直到关闭信号变为 `true`
    ///
    /// 同一时刻只处理一条消息；收到关闭信号时当前消息会先处理完。
    /// handler 返回错误时不存储位点，同一条消息按退避间隔重投，
    /// 直到处理成功或收到关闭信号。
    pub async fn start<F, Fut, E>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("消费循环已启动");

        loop {
            let next = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，消费循环退出");
                        break;
                    }
                    continue;
                }
                next = stream.next() => next,
            };

            let msg = match next {
                Some(Ok(borrowed)) => ConsumerMessage::from_borrowed(&borrowed),
                Some(Err(e)) => {
                    error!(error = %e, "拉取消息失败");
                    continue;
                }
                None => {
                    warn!("消息流意外结束");
                    break;
                }
            };

            let (topic, partition, offset) = (msg.topic.clone(), msg.partition, msg.offset);
            debug!(topic = %topic, partition, offset, "开始处理消息");

            if !handle_until_done(&handler, &msg, &mut shutdown, &self.redelivery).await {
                warn!(topic = %topic, partition, offset, "消息未处理完即关闭，位点不存储，重启后重新投递");
                break;
            }

            // 存储的是下一条待消费的位点
            if let Err(e) = self.consumer.store_offset(&topic, partition, offset + 1) {
                warn!(error = %e, topic = %topic, partition, offset, "存储消费位点失败");
            }
        }
    }
}

/// 反复把同一条消息交给 handler，直到成功
///
/// 返回 `false` 表示等待重投期间收到了关闭信号，消息没有处理完。
pub(crate) async fn handle_until_done<F, Fut, E>(
    handler: &F,
    msg: &ConsumerMessage,
    shutdown: &mut watch::Receiver<bool>,
    policy: &RetryPolicy,
) -> bool
where
    F: Fn(ConsumerMessage) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        let err = match handler(msg.clone()).await {
            Ok(()) => {
                if attempt > 0 {
                    info!(partition = msg.partition, offset = msg.offset, attempt, "重投后处理成功");
                }
                return true;
            }
            Err(err) => err,
        };

        let delay = policy.delay_for_attempt(attempt);
        error!(
            error = %err,
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "处理消息失败，位点保留，退避后重投"
        );
        attempt = (attempt + 1).min(MAX_BACKOFF_EXPONENT);

        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn consumer_group_id(base: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{base}.{suffix}"),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_payload(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::SURVEY_COMPLETED.to_string(),
            partition: 0,
            offset: 7,
            key: Some("resp-1".to_string()),
            payload: payload.to_vec(),
            timestamp: Some(1_760_000_000_000),
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_failed_message_is_redelivered_until_handled() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = AtomicU32::new(0);
        let handler = |msg: ConsumerMessage| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(msg.offset, 7);
                if n < 2 {
                    Err(LoyaltyError::Kafka("死信队列不可用".to_string()))
                } else {
                    Ok(())
                }
            }
        };
        let (_tx, mut rx) = watch::channel(false);

        let handled = handle_until_done(
            &handler,
            &message_with_payload(b"{}"),
            &mut rx,
            &RetryPolicy::immediate(0),
        )
        .await;

        assert!(handled);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_redelivery_without_success() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let (tx, mut rx) = watch::channel(false);
        let calls = AtomicU32::new(0);
        let handler = |_msg: ConsumerMessage| {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                let _ = tx.send(true);
            }
            async { Err::<(), _>(LoyaltyError::Kafka("死信队列不可用".to_string())) }
        };

        let handled = handle_until_done(
            &handler,
            &message_with_payload(b"{}"),
            &mut rx,
            &RetryPolicy::immediate(0),
        )
        .await;

        assert!(!handled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_redelivery_backoff_is_capped() {
        let policy = default_redelivery_policy();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(
            policy.delay_for_attempt(MAX_BACKOFF_EXPONENT),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_topic_constants() {
        assert_eq!(topics::SURVEY_COMPLETED, "survey.completed");
        assert_eq!(topics::SURVEY_COMPLETED_DLQ, "survey.completed.dlq");
    }

    #[test]
    fn test_consumer_group_id() {
        assert_eq!(consumer_group_id("loyalty", None), "loyalty");
        assert_eq!(
            consumer_group_id("loyalty", Some("survey-rewards")),
            "loyalty.survey-rewards"
        );
    }

    #[test]
    fn test_deserialize_payload() {
        #[derive(Debug, serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Completion {
            response_id: String,
        }

        let msg = message_with_payload(br#"{"responseId":"resp-1"}"#);
        let completion: Completion = msg.deserialize_payload().unwrap();
        assert_eq!(completion.response_id, "resp-1");
    }

    #[test]
    fn test_invalid_payload_is_not_retryable() {
        let err = message_with_payload(b"not json")
            .deserialize_payload::<serde_json::Value>()
            .unwrap_err();
        assert!(matches!(err, LoyaltyError::Serialization(_)));
        assert!(!err.is_retryable());
    }
}
