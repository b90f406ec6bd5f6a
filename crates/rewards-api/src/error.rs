//! HTTP 层错误类型
//!
//! 引擎错误按分类映射为 HTTP 状态码，认证与参数解析错误在本层产生

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use rewards_engine::{ErrorCategory, RewardsError};

/// API 错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("未授权: {0}")]
    Unauthorized(String),
    #[error("禁止访问: {0}")]
    Forbidden(String),
    #[error("参数验证失败: {0}")]
    Validation(String),
    #[error(transparent)]
    Rewards(#[from] RewardsError),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Rewards(e) => match e.category() {
                ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                ErrorCategory::ValidationFailed => StatusCode::BAD_REQUEST,
                ErrorCategory::StateConflict | ErrorCategory::StorageConflict => {
                    StatusCode::CONFLICT
                }
                ErrorCategory::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
                ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Rewards(e) => e.error_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Rewards(e) if e.category() == ErrorCategory::Internal => {
                tracing::error!(error = %e, "服务内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Rewards(e) if e.category() == ErrorCategory::ResourceExhausted => {
                tracing::error!(error = %e, "资源耗尽");
                e.to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// API 层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;
