//! 操作人认证中间件
//!
//! 身份由上游网关解析后通过 `x-actor-id` / `x-actor-role` 头传入。
//! 中间件校验角色并将 [`Actor`] 注入请求扩展，处理器通过 `Extension<Actor>` 获取。

use std::future::Future;
use std::pin::Pin;

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// 操作人角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Staff,
    Member,
}

impl Role {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "staff" => Self::Staff,
            _ => Self::Member,
        }
    }
}

/// 当前操作人
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    /// 从请求头解析，缺少或格式错误的 ID 视为未认证
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let id = headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("缺少操作人标识".to_string()))?;
        let id = Uuid::parse_str(id.trim())
            .map_err(|_| ApiError::Unauthorized("操作人标识格式错误".to_string()))?;

        let role = headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Role::parse)
            .unwrap_or(Role::Member);

        Ok(Self { id, role })
    }
}

/// 角色检查中间件工厂
///
/// ```ignore
/// Router::new()
///     .route("/redemptions", post(redeem))
///     .route_layer(axum::middleware::from_fn(require_role(&[Role::Staff, Role::Admin])))
/// ```
pub fn require_role(
    allowed: &'static [Role],
) -> impl Fn(Request<Body>, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone + Send
{
    move |request: Request<Body>, next: Next| Box::pin(check_role(request, next, allowed))
}

async fn check_role(mut request: Request<Body>, next: Next, allowed: &[Role]) -> Response {
    let actor = match Actor::from_headers(request.headers()) {
        Ok(actor) => actor,
        Err(e) => return e.into_response(),
    };

    if !allowed.contains(&actor.role) {
        return ApiError::Forbidden(format!("角色 {:?} 无权执行此操作", actor.role)).into_response();
    }

    request.extensions_mut().insert(actor);
    next.run(request).await
}

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const STAFF_OR_ADMIN: &[Role] = &[Role::Staff, Role::Admin];
