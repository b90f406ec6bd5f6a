//! 兑换码校验与核销 API 处理器
//!
//! 前台员工扫码后先调用校验接口展示券面信息，确认后再核销

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;
use validator::Validate;

use rewards_engine::RedemptionRecord;
use rewards_engine::dto::ValidationResultDto;

use crate::{
    auth::Actor,
    dto::{ApiResponse, RedeemBody},
    error::Result,
    state::AppState,
};

/// 校验兑换码（只读）
///
/// GET /api/redemptions/validate/{code}
pub async fn validate_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<ValidationResultDto>>> {
    let result = state.redemption.validate(&code).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// 核销
///
/// POST /api/redemptions
pub async fn redeem(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<RedeemBody>,
) -> Result<Json<ApiResponse<RedemptionRecord>>> {
    body.validate()?;
    let record = state.redemption.redeem(body.into_request(&actor)).await?;
    Ok(Json(ApiResponse::success_with_message(record, "核销成功")))
}

/// 查询实例的核销记录
///
/// GET /api/admin/coupon-instances/{id}/redemption
pub async fn get_redemption(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> Result<Json<ApiResponse<RedemptionRecord>>> {
    let record = state.redemption.get_redemption(instance_id).await?;
    Ok(Json(ApiResponse::success(record)))
}
