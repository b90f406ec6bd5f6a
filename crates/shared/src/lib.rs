//! 积分与优惠券服务的共享基础设施
//!
//! 配置加载、连接管理（PostgreSQL、Redis、Kafka）、事件契约、
//! 有界重试以及日志/追踪/指标。业务规则不放在这里。

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod test_utils;

pub use error::{LoyaltyError, Result};
