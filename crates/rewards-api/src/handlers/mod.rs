//! HTTP 请求处理器模块

pub mod coupon;
pub mod loyalty;
pub mod redemption;
pub mod survey;
