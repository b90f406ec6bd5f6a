//! 积分与优惠券纯计算路径的性能基准
//!
//! 覆盖：
//! - 折扣计算（百分比封顶、固定金额）
//! - 不同等级数量下的等级解析
//! - 兑换码生成

use chrono::{Duration, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rust_decimal::Decimal;
use std::hint::black_box;
use uuid::Uuid;

use rewards_engine::{
    CouponTemplate, CouponType, TemplateStatus, Tier, compute_discount, generate_redemption_code,
    resolve_tier,
};

fn template(coupon_type: CouponType, value: i64, max_discount: Option<i64>) -> CouponTemplate {
    let now = Utc::now();
    CouponTemplate {
        id: Uuid::now_v7(),
        code: "BENCH".to_string(),
        name: "基准模板".to_string(),
        description: None,
        terms_and_conditions: None,
        coupon_type,
        value: Decimal::from(value),
        currency: "THB".to_string(),
        min_spend: Some(Decimal::from(500)),
        max_discount: max_discount.map(Decimal::from),
        valid_from: now - Duration::days(1),
        valid_until: None,
        total_usage_cap: None,
        per_user_usage_cap: 1,
        used_count: 0,
        status: TemplateStatus::Active,
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn tiers(count: usize) -> Vec<Tier> {
    let now = Utc::now();
    (0..count)
        .map(|i| Tier {
            id: Uuid::now_v7(),
            name: format!("Tier {i}"),
            min_balance: i as i64 * 1000,
            sort_order: i as i32,
            color: "#CD7F32".to_string(),
            benefits: serde_json::json!([]),
            is_active: i % 7 != 3,
            created_at: now,
            updated_at: now,
        })
        .collect()
}

fn bench_compute_discount(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_discount");
    let amount = Some(Decimal::new(1_234_550, 2));

    let percentage = template(CouponType::Percentage, 15, Some(1000));
    group.bench_function("percentage_capped", |b| {
        b.iter(|| compute_discount(black_box(&percentage), black_box(amount)))
    });

    let fixed = template(CouponType::FixedAmount, 300, None);
    group.bench_function("fixed_amount", |b| {
        b.iter(|| compute_discount(black_box(&fixed), black_box(amount)))
    });

    group.finish();
}

fn bench_resolve_tier(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_tier");

    for count in [4, 16, 64] {
        let tiers = tiers(count);
        let balance = (count as i64 / 2) * 1000 + 500;
        group.bench_with_input(BenchmarkId::from_parameter(count), &tiers, |b, tiers| {
            b.iter(|| resolve_tier(black_box(tiers), black_box(balance)).map(|t| t.min_balance))
        });
    }

    group.finish();
}

fn bench_generate_code(c: &mut Criterion) {
    c.bench_function("generate_redemption_code", |b| {
        b.iter(generate_redemption_code)
    });
}

criterion_group!(
    benches,
    bench_compute_discount,
    bench_resolve_tier,
    bench_generate_code
);
criterion_main!(benches);
