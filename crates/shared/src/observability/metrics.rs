//! Prometheus 指标
//!
//! 指标通过独立端口的 `/metrics` 暴露。记录函数在未安装 recorder 时是空操作，
//! 单元测试无需额外初始化。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

const HTTP_DURATION: &str = "http_request_duration_seconds";
const REDEMPTION_DISCOUNT: &str = "coupon_redemption_discount_amount";

/// HTTP 延迟分桶（秒）
const HTTP_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// 单笔核销折扣金额分桶（按主币种计）
const DISCOUNT_BUCKETS: &[f64] = &[50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0];

/// 持有指标端口任务，drop 时不会中止任务
pub struct MetricsHandle {
    _server: tokio::task::JoinHandle<()>,
}

pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(HTTP_DURATION.to_string()), HTTP_BUCKETS)?
        .set_buckets_for_metric(
            Matcher::Full(REDEMPTION_DISCOUNT.to_string()),
            DISCOUNT_BUCKETS,
        )?
        .install_recorder()?;

    describe_metrics();
    metrics::counter!("service_starts_total", "service" => config.service_name.clone())
        .increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server = serve(addr, handle).await?;

    Ok(MetricsHandle { _server: server })
}

fn describe_metrics() {
    metrics::describe_counter!("http_requests_total", "HTTP 请求数");
    metrics::describe_histogram!(HTTP_DURATION, metrics::Unit::Seconds, "HTTP 请求耗时");
    metrics::describe_counter!("points_transactions_total", "积分流水写入次数");
    metrics::describe_counter!("coupons_issued_total", "优惠券签发次数");
    metrics::describe_counter!("coupon_redemptions_total", "优惠券核销尝试次数");
    metrics::describe_histogram!(REDEMPTION_DISCOUNT, "单笔核销折扣金额");
    metrics::describe_counter!("survey_rewards_total", "问卷奖励处理结果");
    metrics::describe_counter!("dead_letters_total", "进入死信队列的消息数");
}

async fn serve(addr: SocketAddr, handle: PrometheusHandle) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new().route("/metrics", get(move || std::future::ready(handle.render())));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标端口已监听");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标服务异常退出");
        }
    }))
}

/// HTTP 请求，route 为路由模板
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!(HTTP_DURATION, &labels).record(duration_secs);
}

pub fn record_points_transaction(transaction_type: &str, status: &str) {
    metrics::counter!(
        "points_transactions_total",
        "type" => transaction_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// source: admin / survey
pub fn record_coupon_issue(source: &str, status: &str) {
    metrics::counter!(
        "coupons_issued_total",
        "source" => source.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// status 为 success 或业务错误码
pub fn record_coupon_redemption(channel: &str, status: &str) {
    metrics::counter!(
        "coupon_redemptions_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_redemption_discount(channel: &str, amount: f64) {
    metrics::histogram!(REDEMPTION_DISCOUNT, "channel" => channel.to_string()).record(amount);
}

/// outcome: issued / already_rewarded / skipped / failed / duplicate_event / invalid / dead_lettered
pub fn record_survey_reward(outcome: &str) {
    metrics::counter!("survey_rewards_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_dead_letter(source_topic: &str) {
    metrics::counter!("dead_letters_total", "topic" => source_topic.to_string()).increment(1);
}
