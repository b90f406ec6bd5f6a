//! 积分与等级 API 处理器

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use rewards_engine::dto::{
    AwardPointsRequest, AwardPointsResponse, BalanceDto, TierInfoDto, TransactionPage,
};
use rewards_engine::{LoyaltyAccount, Tier};

use crate::{
    auth::Actor,
    dto::{ApiResponse, AwardPointsBody, CreateTierBody, TransactionQuery},
    error::Result,
    state::AppState,
};

/// 写入积分流水
///
/// POST /api/admin/loyalty/{userId}/points
pub async fn award_points(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<AwardPointsBody>,
) -> Result<Json<ApiResponse<AwardPointsResponse>>> {
    body.validate()?;

    let mut request = AwardPointsRequest::new(user_id, body.delta, body.transaction_type);
    request.description = body.description;
    request.reference_id = body.reference_id;
    request.expires_at = body.expires_at;
    // 后台写入的流水统一记录操作人
    request = request.with_admin(actor.id, body.reason);

    let response = state.ledger.award_points(request).await?;

    info!(
        user_id = %user_id,
        actor = %actor.id,
        delta = body.delta,
        balance = response.balance,
        "后台写入积分"
    );
    Ok(Json(ApiResponse::success(response)))
}

/// 初始化积分账户（幂等）
///
/// POST /api/admin/loyalty/{userId}
pub async fn initialize_account(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoyaltyAccount>>> {
    let account = state.ledger.initialize_account(user_id).await?;
    Ok(Json(ApiResponse::success(account)))
}

/// 按流水重算余额与等级
///
/// POST /api/admin/loyalty/{userId}/recalculate
pub async fn recalculate_tier(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Tier>>> {
    let tier = state.ledger.recalculate_tier(user_id).await?;
    Ok(Json(ApiResponse::success(tier)))
}

/// GET /api/loyalty/{userId}/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<BalanceDto>>> {
    let balance = state.ledger.get_balance(user_id).await?;
    Ok(Json(ApiResponse::success(balance)))
}

/// GET /api/loyalty/{userId}/tier
pub async fn get_tier_info(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TierInfoDto>>> {
    let info = state.ledger.get_tier_info(user_id).await?;
    Ok(Json(ApiResponse::success(info)))
}

/// GET /api/loyalty/{userId}/transactions
pub async fn get_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<ApiResponse<TransactionPage>>> {
    let page = state
        .ledger
        .get_transactions(user_id, query.limit(), query.offset())
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /api/tiers
pub async fn list_tiers(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<Tier>>>> {
    let tiers = state.ledger.list_tiers().await?;
    Ok(Json(ApiResponse::success(tiers)))
}

/// POST /api/admin/tiers
pub async fn create_tier(
    State(state): State<AppState>,
    Json(body): Json<CreateTierBody>,
) -> Result<Json<ApiResponse<Tier>>> {
    body.validate()?;
    let tier = state.ledger.create_tier(body.into()).await?;
    Ok(Json(ApiResponse::success(tier)))
}
