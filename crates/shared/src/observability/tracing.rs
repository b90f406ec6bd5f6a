//! 日志与分布式追踪
//!
//! 配置了 OTLP 端点时，span 通过 gRPC 导出；否则只输出日志。
//! 跨服务的追踪上下文使用 W3C Trace Context，问卷系统投递的 Kafka 消息头里可携带 traceparent。

use std::collections::HashMap;

use anyhow::Result;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

const TRACEPARENT: &str = "traceparent";

/// drop 时刷新并关闭 TracerProvider
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("关闭 TracerProvider 失败: {e:?}");
        }
    }
}

pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    // RUST_LOG 优先于配置
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => Some(tracer_provider(config, endpoint)?),
        None => None,
    };
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(log_layer(config.json_logs))
        .with(otel_layer)
        .try_init()?;

    Ok(TracingGuard { provider })
}

/// 生产环境输出 JSON 并在 span 关闭时记录耗时，本地开发输出彩色文本
fn log_layer<S>(json: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: ::tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer().with_target(true).compact().boxed()
    }
}

fn tracer_provider(config: &ObservabilityConfig, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(sampler(config.trace_sample_ratio))
        .with_resource(
            Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(provider)
}

/// 上游已采样的请求始终跟随上游决定
fn sampler(ratio: f64) -> Sampler {
    let root = if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    };
    Sampler::ParentBased(Box::new(root))
}

struct HeaderExtractor<'a>(&'a HashMap<String, String>);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HashMap<String, String>);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

pub fn extract_from_headers(headers: &HashMap<String, String>) -> opentelemetry::Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

/// 将 span 的上下文写入消息头，下游可据此续接追踪
pub fn inject_into_headers(span: &::tracing::Span, headers: &mut HashMap<String, String>) {
    TraceContextPropagator::new().inject_context(&span.context(), &mut HeaderInjector(headers));
}

/// 以消息头中的上游上下文作为 span 的父上下文，上游未携带 traceparent 时不做处理
pub fn set_parent_from_headers(span: &::tracing::Span, headers: &HashMap<String, String>) {
    if headers.contains_key(TRACEPARENT) {
        let _ = span.set_parent(extract_from_headers(headers));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TraceContextExt;

    #[test]
    fn test_extract_from_empty_headers() {
        let context = extract_from_headers(&HashMap::new());
        assert!(!context.has_active_span());
    }

    #[test]
    fn test_extract_with_traceparent() {
        let headers = HashMap::from([(
            TRACEPARENT.to_string(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
        )]);

        let span_context = extract_from_headers(&headers).span().span_context().clone();
        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id().to_string(),
            "0af7651916cd43dd8448eb211c80319c"
        );
    }

    #[test]
    fn test_inject_without_active_trace_writes_nothing() {
        let mut headers = HashMap::new();
        inject_into_headers(&::tracing::Span::none(), &mut headers);
        assert!(!headers.contains_key(TRACEPARENT));
    }

    #[test]
    fn test_sampler_selection() {
        assert!(matches!(sampler(1.0), Sampler::ParentBased(_)));
        assert!(matches!(sampler(0.25), Sampler::ParentBased(_)));
        assert!(matches!(sampler(-1.0), Sampler::ParentBased(_)));
    }
}
