//! HTTP 中间件
//!
//! `request_id` 需要挂在 `http_tracing` 外层，追踪 span 才能带上请求 ID。

use std::fmt;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

use super::metrics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 上游传入的请求 ID 超过该长度时视为无效
const MAX_REQUEST_ID_LEN: usize = 128;

/// 请求 ID
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// 沿用合法的上游 ID，否则生成新的
    fn from_header(value: Option<&HeaderValue>) -> Self {
        value
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
            .map(|v| Self(v.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 请求 ID 中间件，写入请求扩展并回写到响应头
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId::from_header(request.headers().get(REQUEST_ID_HEADER));
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// 请求追踪与 HTTP 指标
///
/// 指标按路由模板（如 `/api/loyalty/{user_id}/balance`）聚合，
/// 路径里的用户 ID、兑换码不会变成标签值。
pub async fn http_tracing(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.to_string())
        .unwrap_or_default();

    let span = info_span!(
        "http_request",
        method = %method,
        route = %route,
        path = %request.uri().path(),
        request_id = %request_id,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let latency = start.elapsed();
    let status = response.status();

    span.record("status", status.as_u16());
    span.record("latency_ms", latency.as_millis() as u64);

    if status.is_server_error() {
        span.in_scope(|| warn!(status = status.as_u16(), "请求处理出现服务端错误"));
    }

    metrics::record_http_request(&method, &route, status.as_u16(), latency.as_secs_f64());

    response
}
