//! 优惠券核销服务
//!
//! 处理兑换码的校验与核销：
//! - `validate` 只读检查，不产生任何副作用
//! - `redeem` 在事务内锁定模板与实例后重新校验，再依次写入：
//!   实例标记已使用 -> 模板核销次数 +1 -> 核销记录
//!
//! 折扣计算失败（如未达最低消费）发生在任何写入之前。

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use loyalty_shared::observability::metrics;

use crate::error::{Result, RewardsError};
use crate::models::{InvalidReason, RedemptionRecord, check_redeemable, compute_discount};
use crate::repository::{
    CouponInstanceRepository, CouponInstanceRepositoryTrait, CouponTemplateRepository,
    CouponTemplateRepositoryTrait, RedemptionRecordRepository, RedemptionRecordRepositoryTrait,
};
use crate::service::dto::{
    CouponTemplateDto, PageWindow, Paged, RedeemCouponRequest, ValidationResultDto,
};

/// 核销失败原因到校验结果原因的映射
fn invalid_reason(err: &RewardsError) -> Option<InvalidReason> {
    match err {
        RewardsError::CodeNotFound(_) => Some(InvalidReason::NotFound),
        RewardsError::AlreadyUsed(_) => Some(InvalidReason::AlreadyUsed),
        RewardsError::Revoked(_) => Some(InvalidReason::Revoked),
        RewardsError::Expired(_) => Some(InvalidReason::Expired),
        RewardsError::NotYetValid(_) => Some(InvalidReason::NotYetValid),
        RewardsError::TemplateNotActive { .. } => Some(InvalidReason::TemplateNotActive),
        _ => None,
    }
}

/// 优惠券核销服务
pub struct RedemptionService {
    template_repo: Arc<dyn CouponTemplateRepositoryTrait>,
    instance_repo: Arc<dyn CouponInstanceRepositoryTrait>,
    redemption_repo: Arc<dyn RedemptionRecordRepositoryTrait>,
    pool: PgPool,
}

impl RedemptionService {
    pub fn new(
        template_repo: Arc<dyn CouponTemplateRepositoryTrait>,
        instance_repo: Arc<dyn CouponInstanceRepositoryTrait>,
        redemption_repo: Arc<dyn RedemptionRecordRepositoryTrait>,
        pool: PgPool,
    ) -> Self {
        Self {
            template_repo,
            instance_repo,
            redemption_repo,
            pool,
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(
            Arc::new(CouponTemplateRepository::new(pool.clone())),
            Arc::new(CouponInstanceRepository::new(pool.clone())),
            Arc::new(RedemptionRecordRepository::new(pool.clone())),
            pool,
        )
    }

    /// 校验兑换码（只读）
    #[instrument(skip(self))]
    pub async fn validate(&self, code: &str) -> Result<ValidationResultDto> {
        let Some(instance) = self.instance_repo.get_by_code(code.trim()).await? else {
            return Ok(ValidationResultDto {
                valid: false,
                instance: None,
                template: None,
                reason: Some(InvalidReason::NotFound),
            });
        };

        let template = self
            .template_repo
            .get(instance.template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(instance.template_id))?;

        let now = Utc::now();
        let reason = match check_redeemable(&instance, &template, now) {
            Ok(()) => None,
            Err(e) => match invalid_reason(&e) {
                Some(reason) => Some(reason),
                None => return Err(e),
            },
        };

        Ok(ValidationResultDto {
            valid: reason.is_none(),
            instance: Some(instance),
            template: Some(CouponTemplateDto::from_template(template, now)),
            reason,
        })
    }

    /// 核销兑换码
    #[instrument(skip(self, request), fields(code = %request.code, channel = %request.channel))]
    pub async fn redeem(&self, request: RedeemCouponRequest) -> Result<RedemptionRecord> {
        let result = self.execute_redeem(&request).await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) if e.is_business_error() => e.error_code(),
            Err(_) => "failed",
        };
        metrics::record_coupon_redemption(&request.channel, status);

        match &result {
            Ok(record) => {
                if let Some(discount) = record.discount_amount.and_then(|d| d.to_f64()) {
                    metrics::record_redemption_discount(&record.channel, discount);
                }
                info!(
                    instance_id = %record.instance_id,
                    record_id = %record.id,
                    discount = ?record.discount_amount,
                    "优惠券核销成功"
                );
            }
            Err(e) => warn!(code = %request.code, error = %e, "优惠券核销失败"),
        }

        result
    }

    /// 查询实例的核销记录
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn get_redemption(&self, instance_id: Uuid) -> Result<RedemptionRecord> {
        self.redemption_repo
            .get_by_instance(instance_id)
            .await?
            .ok_or(RewardsError::InstanceNotFound(instance_id))
    }

    /// 分页列出模板下的核销记录
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn list_redemptions_for_template(
        &self,
        template_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Paged<RedemptionRecord>> {
        if self.template_repo.get(template_id).await?.is_none() {
            return Err(RewardsError::TemplateNotFound(template_id));
        }

        let window = PageWindow::new(page, page_size);
        let items = self
            .redemption_repo
            .list_by_template(template_id, window.page_size, window.offset())
            .await?;
        let total = self.redemption_repo.count_by_template(template_id).await?;

        Ok(window.wrap(items, total))
    }

    // ==================== 私有方法 ====================

    async fn execute_redeem(&self, request: &RedeemCouponRequest) -> Result<RedemptionRecord> {
        request.validate()?;
        let code = request.code.trim();

        // 无锁读取拿到模板 ID，随后按 模板 -> 实例 的顺序加锁并重新校验
        let snapshot = self
            .instance_repo
            .get_by_code(code)
            .await?
            .ok_or_else(|| RewardsError::CodeNotFound(code.to_string()))?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let template = CouponTemplateRepository::get_for_update(&mut tx, snapshot.template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(snapshot.template_id))?;
        let instance = CouponInstanceRepository::get_for_update(&mut tx, snapshot.id)
            .await?
            .ok_or_else(|| RewardsError::CodeNotFound(code.to_string()))?;

        check_redeemable(&instance, &template, now)?;
        let breakdown = compute_discount(&template, request.original_amount)?;

        CouponInstanceRepository::mark_used_in_tx(&mut tx, instance.id, request.actor_id, now)
            .await?;
        CouponTemplateRepository::increment_used_count_in_tx(&mut tx, template.id, now).await?;

        let record = RedemptionRecord {
            id: Uuid::now_v7(),
            instance_id: instance.id,
            original_amount: breakdown.original_amount,
            discount_amount: breakdown.discount_amount,
            final_amount: breakdown.final_amount,
            reference: request.reference.trim().to_string(),
            channel: request.channel.trim().to_string(),
            staff_actor_id: request.actor_id,
            location: request.location.clone(),
            created_at: now,
        };
        RedemptionRecordRepository::create_in_tx(&mut tx, &record, &instance.redemption_code)
            .await?;

        tx.commit().await?;

        Ok(record)
    }
}
