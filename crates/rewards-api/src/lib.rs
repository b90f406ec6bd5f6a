//! 积分与优惠券 REST API
//!
//! 将引擎服务以 JSON 接口暴露给后台、前台核销终端与会员端。
//!
//! ## 模块结构
//!
//! - `auth`: 操作人解析与角色校验
//! - `dto`: 请求和响应的数据传输对象
//! - `error`: 错误类型与 HTTP 状态码映射
//! - `handlers`: HTTP 请求处理器
//! - `routes`: 路由配置
//! - `state`: 应用状态
//!
//! 响应统一包装为 `{success, code, message, data}`，字段使用 camelCase。

pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use auth::{Actor, Role};
pub use error::{ApiError, Result};
pub use state::AppState;
