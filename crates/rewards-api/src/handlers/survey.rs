//! 问卷发券配置与内部完成通知 API 处理器

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use rewards_engine::{SurveyCouponAssignment, SurveyRewardHistoryEntry, SurveyRewardSummary};

use crate::{
    auth::Actor,
    dto::{
        ApiResponse, CreateAssignmentBody, PageQuery, PageResponse, SurveyCompletedBody,
        UpdateAssignmentBody,
    },
    error::Result,
    state::AppState,
};

/// POST /api/admin/surveys/{surveyId}/coupon-assignments
pub async fn create_assignment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(survey_id): Path<Uuid>,
    Json(body): Json<CreateAssignmentBody>,
) -> Result<Json<ApiResponse<SurveyCouponAssignment>>> {
    body.validate()?;
    let assignment = state
        .bridge
        .create_assignment(body.into_request(survey_id, &actor))
        .await?;
    Ok(Json(ApiResponse::success(assignment)))
}

/// GET /api/admin/surveys/{surveyId}/coupon-assignments
pub async fn list_assignments(
    State(state): State<AppState>,
    Path(survey_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<SurveyCouponAssignment>>>> {
    let assignments = state.bridge.list_assignments(survey_id).await?;
    Ok(Json(ApiResponse::success(assignments)))
}

/// PUT /api/admin/survey-coupon-assignments/{id}
pub async fn update_assignment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAssignmentBody>,
) -> Result<Json<ApiResponse<SurveyCouponAssignment>>> {
    body.validate()?;
    let assignment = state.bridge.update_assignment(id, body.into()).await?;
    info!(assignment_id = %id, actor = %actor.id, "修改问卷发券配置");
    Ok(Json(ApiResponse::success(assignment)))
}

/// 问卷奖励历史
///
/// GET /api/admin/surveys/{surveyId}/reward-history
pub async fn reward_history(
    State(state): State<AppState>,
    Path(survey_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<PageResponse<SurveyRewardHistoryEntry>>>> {
    let page = state
        .bridge
        .list_reward_history(survey_id, query.page, query.page_size)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(
        page.items,
        page.total,
        page.page,
        page.page_size,
    ))))
}

/// DELETE /api/admin/survey-coupon-assignments/{id}
pub async fn deactivate_assignment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>> {
    state.bridge.deactivate_assignment(id).await?;
    info!(assignment_id = %id, actor = %actor.id, "停用问卷发券配置");
    Ok(Json(ApiResponse::success_empty()))
}

/// 问卷完成通知
///
/// POST /api/internal/survey-completed
///
/// 与 Kafka 消费路径共用同一幂等逻辑，重复调用不会重复发券
pub async fn survey_completed(
    State(state): State<AppState>,
    Json(body): Json<SurveyCompletedBody>,
) -> Result<Json<ApiResponse<SurveyRewardSummary>>> {
    let summary = state
        .bridge
        .on_survey_completed(body.response_id, body.survey_id, body.user_id)
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}
