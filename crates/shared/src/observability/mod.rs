//! 可观测性
//!
//! - `tracing`: 日志输出与 OTLP 追踪导出
//! - `metrics`: Prometheus 指标端口与业务指标记录函数
//! - `middleware`: axum 请求 ID 与请求追踪中间件
//!
//! 两个服务在 `main` 中调用 [`init`] 并持有返回的守卫直到退出。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 追踪资源名与指标标签，加载配置时默认取服务名
    pub service_name: String,
    /// OTLP gRPC 端点，未配置时不导出追踪
    pub otlp_endpoint: Option<String>,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    /// EnvFilter 语法，RUST_LOG 优先
    pub log_level: String,
    pub json_logs: bool,
    /// 根 span 采样比例，0.0 ~ 1.0
    pub trace_sample_ratio: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            otlp_endpoint: None,
            metrics_enabled: true,
            metrics_port: 9090,
            log_level: "info".to_string(),
            json_logs: false,
            trace_sample_ratio: 1.0,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 追踪 provider 在守卫 drop 时刷新并关闭
pub struct ObservabilityGuard {
    _tracing: tracing::TracingGuard,
    _metrics: Option<metrics::MetricsHandle>,
}

/// 先装日志与追踪，保证指标端口启动失败也能被记录下来
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    let metrics_handle = match config.metrics_enabled {
        true => Some(metrics::init(config).await?),
        false => None,
    };

    info!(
        service = %config.service_name,
        otlp = config.otlp_endpoint.is_some(),
        metrics_port = ?config.metrics_enabled.then_some(config.metrics_port),
        "可观测性已初始化"
    );

    Ok(ObservabilityGuard {
        _tracing: tracing_guard,
        _metrics: metrics_handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(config.metrics_enabled);
        assert!(!config.json_logs);
        assert_eq!(config.trace_sample_ratio, 1.0);
    }

    #[test]
    fn test_with_service_name() {
        let config = ObservabilityConfig::default().with_service_name("rewards-api");
        assert_eq!(config.service_name, "rewards-api");
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: ObservabilityConfig =
            serde_json::from_value(serde_json::json!({ "json_logs": true })).unwrap();
        assert!(config.json_logs);
        assert_eq!(config.metrics_port, 9090);
        assert!(config.otlp_endpoint.is_none());
    }
}
