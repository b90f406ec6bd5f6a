//! 集成测试公共辅助
//!
//! 连接 `DATABASE_URL`（或 `TEST_DATABASE_URL`）指向的 PostgreSQL 并应用迁移。
//! 每个测试使用新生成的用户 ID 和模板编码，互不干扰。

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use loyalty_shared::database::Database;
use loyalty_shared::test_utils::{test_database_config, unique_code};
use rewards_engine::dto::CreateTemplateRequest;
use rewards_engine::{CatalogService, CouponType, LedgerService};

/// 连接测试库并应用迁移
pub async fn setup_pool() -> PgPool {
    let db = Database::connect(&test_database_config())
        .await
        .expect("连接测试数据库失败");
    db.run_migrations().await.expect("应用迁移失败");
    db.pool().clone()
}

/// 新建一个已初始化积分账户的用户
pub async fn new_account(pool: &PgPool) -> Uuid {
    let user_id = Uuid::now_v7();
    LedgerService::from_pool(pool.clone())
        .initialize_account(user_id)
        .await
        .expect("初始化账户失败");
    user_id
}

/// 模板参数
pub struct TemplateSpec {
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub min_spend: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub valid_until: Option<DateTime<Utc>>,
    pub total_usage_cap: Option<i32>,
    pub per_user_usage_cap: i32,
}

impl Default for TemplateSpec {
    fn default() -> Self {
        Self {
            coupon_type: CouponType::Percentage,
            value: Decimal::from(10),
            min_spend: None,
            max_discount: None,
            valid_until: Some(Utc::now() + Duration::days(30)),
            total_usage_cap: None,
            per_user_usage_cap: 1,
        }
    }
}

/// 创建并激活模板，返回模板 ID
pub async fn active_template(pool: &PgPool, spec: TemplateSpec) -> Uuid {
    let catalog = CatalogService::from_pool(pool.clone());

    let created = catalog
        .create_template(CreateTemplateRequest {
            code: unique_code("IT"),
            name: "集成测试券".to_string(),
            description: None,
            terms_and_conditions: None,
            coupon_type: spec.coupon_type,
            value: spec.value,
            currency: None,
            min_spend: spec.min_spend,
            max_discount: spec.max_discount,
            valid_from: Utc::now() - Duration::hours(1),
            valid_until: spec.valid_until,
            total_usage_cap: spec.total_usage_cap,
            per_user_usage_cap: Some(spec.per_user_usage_cap),
            created_by: None,
        })
        .await
        .expect("创建模板失败");

    catalog.activate(created.id).await.expect("激活模板失败");
    created.id
}
