//! 优惠券模板目录服务
//!
//! 模板创建后为草稿，由管理员显式激活或暂停。
//! expired/exhausted 由有效期和核销次数在读取时推导，不会被主动写入。

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{Result, RewardsError};
use crate::models::{CouponTemplate, TemplateStatus};
use crate::repository::{
    CouponInstanceRepository, CouponTemplateRepository, CouponTemplateRepositoryTrait,
    SurveyAssignmentRepository,
};
use crate::service::dto::{
    CouponTemplateDto, CreateTemplateRequest, PageWindow, TemplatePage, UpdateTemplateRequest,
};

const DEFAULT_CURRENCY: &str = "THB";

/// 只有草稿和暂停中的模板可以修改
pub(crate) fn ensure_editable(template: &CouponTemplate) -> Result<()> {
    match template.status {
        TemplateStatus::Draft | TemplateStatus::Paused => Ok(()),
        status => Err(RewardsError::TemplateNotEditable {
            template_id: template.id,
            status,
        }),
    }
}

/// 优惠券模板目录服务
pub struct CatalogService {
    template_repo: Arc<dyn CouponTemplateRepositoryTrait>,
    pool: PgPool,
    default_currency: String,
}

impl CatalogService {
    pub fn new(template_repo: Arc<dyn CouponTemplateRepositoryTrait>, pool: PgPool) -> Self {
        Self {
            template_repo,
            pool,
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(Arc::new(CouponTemplateRepository::new(pool.clone())), pool)
    }

    /// 未指定币种时使用的默认币种
    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    /// 创建模板（草稿状态）
    #[instrument(skip(self, request), fields(code = %request.code, coupon_type = %request.coupon_type))]
    pub async fn create_template(
        &self,
        request: CreateTemplateRequest,
    ) -> Result<CouponTemplateDto> {
        request.validate()?;

        let now = Utc::now();
        let template = CouponTemplate {
            id: Uuid::now_v7(),
            code: request.code.trim().to_uppercase(),
            name: request.name.trim().to_string(),
            description: request.description,
            terms_and_conditions: request.terms_and_conditions,
            coupon_type: request.coupon_type,
            value: request.value,
            currency: request
                .currency
                .unwrap_or_else(|| self.default_currency.clone()),
            min_spend: request.min_spend,
            max_discount: request.max_discount,
            valid_from: request.valid_from,
            valid_until: request.valid_until,
            total_usage_cap: request.total_usage_cap,
            per_user_usage_cap: request.per_user_usage_cap.unwrap_or(1),
            used_count: 0,
            status: TemplateStatus::Draft,
            created_by: request.created_by,
            created_at: now,
            updated_at: now,
        };

        self.template_repo.create(&template).await?;

        info!(template_id = %template.id, code = %template.code, "优惠券模板已创建");
        Ok(CouponTemplateDto::from_template(template, now))
    }

    /// 激活模板
    ///
    /// 仅草稿或暂停中的模板可以激活；要求当前时间在有效期内且未用尽。
    /// 已是 active 时原样返回。
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn activate(&self, template_id: Uuid) -> Result<CouponTemplateDto> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let template = CouponTemplateRepository::get_for_update(&mut tx, template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(template_id))?;

        let current = template.resolved_status(now);
        if current == TemplateStatus::Active {
            tx.commit().await?;
            return Ok(CouponTemplateDto::from_template(template, now));
        }

        let transition_error = RewardsError::InvalidTemplateTransition {
            template_id,
            from: current,
            to: TemplateStatus::Active,
        };
        if !matches!(current, TemplateStatus::Draft | TemplateStatus::Paused)
            || !template.is_within_validity(now)
            || template.is_exhausted()
        {
            return Err(transition_error);
        }

        let updated = CouponTemplateRepository::update_status_in_tx(
            &mut tx,
            template_id,
            TemplateStatus::Active,
            now,
        )
        .await?;
        tx.commit().await?;

        info!(template_id = %template_id, from = %current, "优惠券模板已激活");
        Ok(CouponTemplateDto::from_template(updated, now))
    }

    /// 暂停模板
    ///
    /// 仅读取状态为 active 的模板可以暂停
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn pause(&self, template_id: Uuid) -> Result<CouponTemplateDto> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let template = CouponTemplateRepository::get_for_update(&mut tx, template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(template_id))?;

        let current = template.resolved_status(now);
        if current != TemplateStatus::Active {
            return Err(RewardsError::InvalidTemplateTransition {
                template_id,
                from: current,
                to: TemplateStatus::Paused,
            });
        }

        let updated = CouponTemplateRepository::update_status_in_tx(
            &mut tx,
            template_id,
            TemplateStatus::Paused,
            now,
        )
        .await?;
        tx.commit().await?;

        info!(template_id = %template_id, "优惠券模板已暂停");
        Ok(CouponTemplateDto::from_template(updated, now))
    }

    /// 修改模板
    ///
    /// 仅草稿或暂停中的模板可以修改，合并后的字段按创建规则重新校验
    #[instrument(skip(self, request), fields(template_id = %template_id))]
    pub async fn update_template(
        &self,
        template_id: Uuid,
        request: UpdateTemplateRequest,
    ) -> Result<CouponTemplateDto> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let template = CouponTemplateRepository::get_for_update(&mut tx, template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(template_id))?;
        ensure_editable(&template)?;

        let merged = request.merge_into(&template)?;
        let updated = CouponTemplateRepository::update_in_tx(&mut tx, &merged, now).await?;
        tx.commit().await?;

        info!(template_id = %template_id, status = %updated.status, "优惠券模板已修改");
        Ok(CouponTemplateDto::from_template(updated, now))
    }

    /// 删除模板
    ///
    /// 已签发过实例或被问卷发券配置引用的模板不能删除
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn delete_template(&self, template_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // 签发同样先锁模板行，持锁期间不会有新实例写入
        CouponTemplateRepository::get_for_update(&mut tx, template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(template_id))?;

        let instances =
            CouponInstanceRepository::count_by_template_in_tx(&mut tx, template_id).await?;
        let assignments =
            SurveyAssignmentRepository::count_by_template_in_tx(&mut tx, template_id).await?;
        if instances > 0 || assignments > 0 {
            return Err(RewardsError::TemplateInUse(template_id));
        }

        if !CouponTemplateRepository::delete_in_tx(&mut tx, template_id).await? {
            return Err(RewardsError::TemplateNotFound(template_id));
        }
        tx.commit().await?;

        info!(template_id = %template_id, "优惠券模板已删除");
        Ok(())
    }

    /// 获取模板
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn get_template(&self, template_id: Uuid) -> Result<CouponTemplateDto> {
        let template = self
            .template_repo
            .get(template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(template_id))?;

        Ok(CouponTemplateDto::from_template(template, Utc::now()))
    }

    /// 分页列出模板
    ///
    /// 状态筛选作用于读取时推导的状态
    #[instrument(skip(self))]
    pub async fn list_templates(
        &self,
        status: Option<TemplateStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<TemplatePage> {
        let window = PageWindow::new(page, page_size);

        let templates = self
            .template_repo
            .list(status, window.page_size, window.offset())
            .await?;
        let total = self.template_repo.count(status).await?;

        let now = Utc::now();
        let items = templates
            .into_iter()
            .map(|t| CouponTemplateDto::from_template(t, now))
            .collect();

        Ok(window.wrap(items, total))
    }
}
