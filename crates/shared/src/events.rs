//! 事件模型
//!
//! 定义跨服务流转的事件信封：问卷完成事件（问卷系统 -> 奖励触发桥）
//! 以及无法处理的消息进入死信队列时的包装格式。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 问卷回答完成事件
///
/// 问卷系统只在回答从"进行中"变为"已完成"的那一次状态迁移时投递，
/// 但投递语义是至少一次，同一 `response_id` 可能到达多次。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyCompletedEvent {
    /// 事件唯一标识（UUID v7），仅用于日志关联
    pub event_id: String,
    /// 问卷回答 ID，奖励幂等键的一部分
    pub response_id: Uuid,
    pub survey_id: Uuid,
    pub user_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

impl SurveyCompletedEvent {
    /// 构建新事件，自动生成 UUID v7 作为 event_id 并记录当前时间
    pub fn new(response_id: Uuid, survey_id: Uuid, user_id: Uuid) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            response_id,
            survey_id,
            user_id,
            completed_at: Utc::now(),
        }
    }

    /// Kafka 消息 key，同一回答的重复投递落在同一分区
    pub fn partition_key(&self) -> String {
        self.response_id.to_string()
    }
}

/// 死信消息
///
/// 保留原始负载（可能不是合法 JSON）与失败原因，便于人工排查后重放。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        source_topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: &[u8],
        error: impl Into<String>,
    ) -> Self {
        Self {
            source_topic: source_topic.into(),
            partition,
            offset,
            payload: String::from_utf8_lossy(payload).into_owned(),
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}
