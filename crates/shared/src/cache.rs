//! Redis 缓存
//!
//! 缓存只承载可丢失的数据（等级列表快照、问卷事件快速去重标记），权威状态始终在数据库。
//! 因此 `get_or_set` 在 Redis 故障时直接回源，不把缓存错误暴露给业务。
//! 其余方法如实返回错误，由调用方决定是否降级。

use std::future::Future;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, instrument, warn};

use crate::config::RedisConfig;
use crate::error::{LoyaltyError, Result};

/// Redis 客户端
///
/// 每次操作取一条多路复用连接，Redis 重启后下一次调用即可恢复。
#[derive(Clone)]
pub struct Cache {
    client: Client,
    connect_timeout: Duration,
}

impl Cache {
    /// 解析连接串，不发起连接
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis 客户端已创建");
        Ok(Self {
            client,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        let connect = self.client.get_multiplexed_async_connection();
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(LoyaltyError::Internal(format!(
                "Redis 连接超时（{}ms）",
                self.connect_timeout.as_millis()
            ))),
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(LoyaltyError::from)
    }

    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let serialized = serde_json::to_string(value)?;
        let _: () = conn.set_ex(key, serialized, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(key).await?)
    }

    /// 仅在键不存在时写入，返回是否由本次写入
    pub async fn set_nx<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let serialized = serde_json::to_string(value)?;
        let written: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(written.is_some())
    }

    /// 读缓存，未命中或 Redis 不可用时回源
    ///
    /// 回源结果写回失败只记日志。loader 的错误原样返回。
    #[instrument(skip(self, loader))]
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(cached)) => {
                debug!(key, "缓存命中");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "读取缓存失败，直接回源"),
        }

        let value = loader().await?;

        if let Err(e) = self.set(key, &value, ttl).await {
            warn!(key, error = %e, "写回缓存失败");
        }

        Ok(value)
    }
}

/// 缓存键
pub struct CacheKey;

impl CacheKey {
    /// 等级列表快照
    pub fn tier_list() -> String {
        "loyalty:tiers".to_string()
    }

    /// 问卷回答已发奖标记
    pub fn survey_rewarded(response_id: &str) -> String {
        format!("survey:rewarded:{response_id}")
    }
}
