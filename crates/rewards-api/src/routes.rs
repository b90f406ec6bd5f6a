//! 路由配置模块
//!
//! 按访问角色分组：会员只读接口不校验角色，核销接口要求 staff 或 admin，
//! 后台与内部接口要求 admin

use axum::{
    Json, Router,
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};

use loyalty_shared::observability::middleware as obs_middleware;

use crate::{
    auth::{ADMIN_ONLY, STAFF_OR_ADMIN, require_role},
    handlers,
    state::AppState,
};

/// 会员侧只读路由
fn member_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/loyalty/{user_id}/balance",
            get(handlers::loyalty::get_balance),
        )
        .route(
            "/loyalty/{user_id}/tier",
            get(handlers::loyalty::get_tier_info),
        )
        .route(
            "/loyalty/{user_id}/transactions",
            get(handlers::loyalty::get_transactions),
        )
        .route("/tiers", get(handlers::loyalty::list_tiers))
        .route(
            "/coupons/{id}/eligibility/{user_id}",
            get(handlers::coupon::check_eligibility),
        )
        .route(
            "/users/{user_id}/coupons",
            get(handlers::coupon::list_user_coupons),
        )
}

/// 前台核销路由
fn staff_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/redemptions/validate/{code}",
            get(handlers::redemption::validate_code),
        )
        .route("/redemptions", post(handlers::redemption::redeem))
        .route_layer(middleware::from_fn(require_role(STAFF_OR_ADMIN)))
}

/// 后台管理路由
fn admin_routes() -> Router<AppState> {
    Router::new()
        // 积分账户
        .route(
            "/admin/loyalty/{user_id}",
            post(handlers::loyalty::initialize_account),
        )
        .route(
            "/admin/loyalty/{user_id}/points",
            post(handlers::loyalty::award_points),
        )
        .route(
            "/admin/loyalty/{user_id}/recalculate",
            post(handlers::loyalty::recalculate_tier),
        )
        .route("/admin/tiers", post(handlers::loyalty::create_tier))
        // 优惠券模板
        .route(
            "/admin/coupons",
            post(handlers::coupon::create_template).get(handlers::coupon::list_templates),
        )
        .route(
            "/admin/coupons/{id}",
            get(handlers::coupon::get_template)
                .put(handlers::coupon::update_template)
                .delete(handlers::coupon::delete_template),
        )
        .route(
            "/admin/coupons/{id}/activate",
            post(handlers::coupon::activate_template),
        )
        .route(
            "/admin/coupons/{id}/pause",
            post(handlers::coupon::pause_template),
        )
        .route(
            "/admin/coupons/{id}/issue",
            post(handlers::coupon::issue_coupon),
        )
        .route(
            "/admin/coupons/{id}/bulk-issue",
            post(handlers::coupon::bulk_issue),
        )
        .route(
            "/admin/coupons/{id}/instances",
            get(handlers::coupon::list_template_instances),
        )
        .route(
            "/admin/coupons/{id}/redemptions",
            get(handlers::coupon::list_template_redemptions),
        )
        // 优惠券实例
        .route(
            "/admin/coupon-instances/{id}/revoke",
            post(handlers::coupon::revoke_instance),
        )
        .route(
            "/admin/coupon-instances/{id}/redemption",
            get(handlers::redemption::get_redemption),
        )
        // 问卷发券配置
        .route(
            "/admin/surveys/{survey_id}/coupon-assignments",
            post(handlers::survey::create_assignment).get(handlers::survey::list_assignments),
        )
        .route(
            "/admin/surveys/{survey_id}/reward-history",
            get(handlers::survey::reward_history),
        )
        .route(
            "/admin/survey-coupon-assignments/{id}",
            put(handlers::survey::update_assignment)
                .delete(handlers::survey::deactivate_assignment),
        )
        .route_layer(middleware::from_fn(require_role(ADMIN_ONLY)))
}

/// 内部系统回调路由
fn internal_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/internal/survey-completed",
            post(handlers::survey::survey_completed),
        )
        .route_layer(middleware::from_fn(require_role(ADMIN_ONLY)))
}

/// 全部业务 API 路由（挂载在 /api 下）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(member_routes())
        .merge(staff_routes())
        .merge(admin_routes())
        .merge(internal_routes())
}

/// 构建完整应用：业务路由、存活探针与可观测性中间件
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(health_check))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

/// 跨域策略，`allowed` 为逗号分隔的来源列表，`*` 表示放开全部来源
///
/// 无法解析的来源会被忽略。
pub fn cors_layer(allowed: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.trim() == "*" {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse().ok())
        .collect();
    layer.allow_origin(origins)
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "rewards-api"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn cors_app(allowed: &str) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .layer(cors_layer(allowed))
    }

    async fn allow_origin_for(allowed: &str, origin: &str) -> Option<String> {
        let response = cors_app(allowed)
            .oneshot(
                Request::get("/health")
                    .header("origin", origin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_cors_listed_origin_allowed() {
        let allowed = "http://localhost:3000, https://backoffice.example.com";
        assert_eq!(
            allow_origin_for(allowed, "https://backoffice.example.com").await,
            Some("https://backoffice.example.com".to_string())
        );
        assert_eq!(allow_origin_for(allowed, "https://evil.example.com").await, None);
    }

    #[tokio::test]
    async fn test_cors_wildcard() {
        assert_eq!(
            allow_origin_for("*", "https://any.example.com").await,
            Some("*".to_string())
        );
    }
}
