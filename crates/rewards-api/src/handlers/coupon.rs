//! 优惠券模板、签发与钱包 API 处理器

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use rewards_engine::dto::{BulkIssueSummary, CouponTemplateDto, EligibilityDto, WalletCouponDto};
use rewards_engine::{CouponInstance, RedemptionRecord};

use crate::{
    auth::Actor,
    dto::{
        ApiResponse, BulkIssueBody, CreateTemplateBody, InstanceQuery, IssueCouponBody,
        PageQuery, PageResponse, RevokeBody, TemplateQuery, UpdateTemplateBody, WalletQuery,
    },
    error::Result,
    state::AppState,
};

/// 创建模板（草稿状态）
///
/// POST /api/admin/coupons
pub async fn create_template(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateTemplateBody>,
) -> Result<Json<ApiResponse<CouponTemplateDto>>> {
    body.validate()?;

    let template = state
        .catalog
        .create_template(body.into_request(&actor))
        .await?;

    info!(template_id = %template.id, code = %template.code, actor = %actor.id, "创建优惠券模板");
    Ok(Json(ApiResponse::success(template)))
}

/// GET /api/admin/coupons
pub async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Result<Json<ApiResponse<PageResponse<CouponTemplateDto>>>> {
    let page = state
        .catalog
        .list_templates(query.status, query.page, query.page_size)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(
        page.items,
        page.total,
        page.page,
        page.page_size,
    ))))
}

/// GET /api/admin/coupons/{id}
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CouponTemplateDto>>> {
    let template = state.catalog.get_template(id).await?;
    Ok(Json(ApiResponse::success(template)))
}

/// 修改模板（仅草稿或暂停中）
///
/// PUT /api/admin/coupons/{id}
pub async fn update_template(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTemplateBody>,
) -> Result<Json<ApiResponse<CouponTemplateDto>>> {
    body.validate()?;
    let template = state.catalog.update_template(id, body.into()).await?;
    info!(template_id = %id, actor = %actor.id, "修改优惠券模板");
    Ok(Json(ApiResponse::success(template)))
}

/// 删除从未签发过的模板
///
/// DELETE /api/admin/coupons/{id}
pub async fn delete_template(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>> {
    state.catalog.delete_template(id).await?;
    info!(template_id = %id, actor = %actor.id, "删除优惠券模板");
    Ok(Json(ApiResponse::success_empty()))
}

/// POST /api/admin/coupons/{id}/activate
pub async fn activate_template(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CouponTemplateDto>>> {
    let template = state.catalog.activate(id).await?;
    info!(template_id = %id, actor = %actor.id, "上线优惠券模板");
    Ok(Json(ApiResponse::success(template)))
}

/// POST /api/admin/coupons/{id}/pause
pub async fn pause_template(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CouponTemplateDto>>> {
    let template = state.catalog.pause(id).await?;
    info!(template_id = %id, actor = %actor.id, "暂停优惠券模板");
    Ok(Json(ApiResponse::success(template)))
}

/// 管理员手动签发
///
/// POST /api/admin/coupons/{id}/issue
pub async fn issue_coupon(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(body): Json<IssueCouponBody>,
) -> Result<Json<ApiResponse<CouponInstance>>> {
    body.validate()?;
    let instance = state.issuer.issue(body.into_request(id, &actor)).await?;
    Ok(Json(ApiResponse::success(instance)))
}

/// 批量签发，逐个用户返回结果
///
/// POST /api/admin/coupons/{id}/bulk-issue
pub async fn bulk_issue(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(body): Json<BulkIssueBody>,
) -> Result<Json<ApiResponse<BulkIssueSummary>>> {
    body.validate()?;
    let summary = state
        .issuer
        .bulk_issue(body.into_request(id, &actor))
        .await?;
    info!(
        template_id = %id,
        actor = %actor.id,
        issued = summary.issued,
        failed = summary.failed,
        "批量签发优惠券"
    );
    Ok(Json(ApiResponse::success(summary)))
}

/// GET /api/admin/coupons/{id}/instances
pub async fn list_template_instances(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<ApiResponse<PageResponse<CouponInstance>>>> {
    let page = state
        .issuer
        .list_instances_for_template(id, query.status, query.page, query.page_size)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(
        page.items,
        page.total,
        page.page,
        page.page_size,
    ))))
}

/// GET /api/admin/coupons/{id}/redemptions
pub async fn list_template_redemptions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<PageResponse<RedemptionRecord>>>> {
    let page = state
        .redemption
        .list_redemptions_for_template(id, query.page, query.page_size)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(
        page.items,
        page.total,
        page.page,
        page.page_size,
    ))))
}

/// GET /api/coupons/{id}/eligibility/{userId}
pub async fn check_eligibility(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<EligibilityDto>>> {
    let eligibility = state.issuer.check_eligibility(id, user_id).await?;
    Ok(Json(ApiResponse::success(eligibility)))
}

/// 用户钱包
///
/// GET /api/users/{userId}/coupons
pub async fn list_user_coupons(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<ApiResponse<Vec<WalletCouponDto>>>> {
    let wallet = state
        .issuer
        .list_instances_for_user(user_id, query.status)
        .await?;
    Ok(Json(ApiResponse::success(wallet)))
}

/// POST /api/admin/coupon-instances/{id}/revoke
pub async fn revoke_instance(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    body: Option<Json<RevokeBody>>,
) -> Result<Json<ApiResponse<CouponInstance>>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    body.validate()?;

    let instance = state.issuer.revoke(id, actor.id, body.reason).await?;
    Ok(Json(ApiResponse::success(instance)))
}
