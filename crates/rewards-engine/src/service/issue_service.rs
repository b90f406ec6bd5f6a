//! 优惠券签发服务
//!
//! 签发在单个事务内完成：
//! 1. 锁定模板行（`FOR UPDATE`），同一模板上的签发串行执行
//! 2. 校验模板为 active、单用户上限、总上限
//! 3. 生成兑换码并在保存点内写入，冲突时重新生成（有上限）
//!
//! 总上限统计已核销次数加上未过期的 available 实例，签发量不会超过可核销量。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::{PgConnection, PgPool};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use loyalty_shared::config::RewardsConfig;
use loyalty_shared::observability::metrics;

use crate::error::{Result, RewardsError};
use crate::models::{
    CapScope, CouponInstance, CouponTemplate, InstanceStatus, WalletRow, effective_expiry,
};
use crate::repository::{
    CouponInstanceRepository, CouponInstanceRepositoryTrait, CouponTemplateRepository,
    CouponTemplateRepositoryTrait,
};
use crate::service::dto::{
    BulkIssueOutcome, BulkIssueRequest, BulkIssueResult, BulkIssueSummary, EligibilityDto,
    IssueCouponRequest, PageWindow, Paged, WalletCouponDto,
};

/// 兑换码前缀
const CODE_PREFIX: &str = "CPN-";
/// 兑换码随机部分长度
const CODE_LENGTH: usize = 12;
/// 去掉 0/O、1/I 等易混字符
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// 生成兑换码：`CPN-` + 12 位大写字母数字
pub fn generate_redemption_code() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{CODE_PREFIX}{suffix}")
}

/// 校验领取上限
///
/// - 单用户：已占用（available + used）< per_user_usage_cap
/// - 总量：used_count + 未过期 available < total_usage_cap
pub(crate) fn ensure_within_caps(
    template: &CouponTemplate,
    user_claims: i64,
    outstanding: Option<i64>,
) -> Result<()> {
    if user_claims >= i64::from(template.per_user_usage_cap) {
        return Err(RewardsError::CapExceeded {
            template_id: template.id,
            scope: CapScope::PerUser,
        });
    }

    if let (Some(cap), Some(outstanding)) = (template.total_usage_cap, outstanding)
        && i64::from(template.used_count) + outstanding >= i64::from(cap)
    {
        return Err(RewardsError::CapExceeded {
            template_id: template.id,
            scope: CapScope::Global,
        });
    }

    Ok(())
}

/// 自定义有效天数对应的实例到期时间
pub(crate) fn instance_expiry_at(
    now: DateTime<Utc>,
    custom_expiry_days: Option<i32>,
) -> Result<Option<DateTime<Utc>>> {
    let Some(days) = custom_expiry_days else {
        return Ok(None);
    };
    Duration::try_days(i64::from(days))
        .and_then(|delta| now.checked_add_signed(delta))
        .map(Some)
        .ok_or_else(|| RewardsError::Validation(format!("自定义有效天数超出范围: {days}")))
}

/// 优惠券签发服务
pub struct IssueService {
    template_repo: Arc<dyn CouponTemplateRepositoryTrait>,
    instance_repo: Arc<dyn CouponInstanceRepositoryTrait>,
    pool: PgPool,
    max_code_attempts: u32,
    expiring_soon_days: i64,
}

impl IssueService {
    pub fn new(
        template_repo: Arc<dyn CouponTemplateRepositoryTrait>,
        instance_repo: Arc<dyn CouponInstanceRepositoryTrait>,
        pool: PgPool,
    ) -> Self {
        let defaults = RewardsConfig::default();
        Self {
            template_repo,
            instance_repo,
            pool,
            max_code_attempts: defaults.code_generation_max_attempts,
            expiring_soon_days: defaults.expiring_soon_days,
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(
            Arc::new(CouponTemplateRepository::new(pool.clone())),
            Arc::new(CouponInstanceRepository::new(pool.clone())),
            pool,
        )
    }

    pub fn with_config(mut self, config: &RewardsConfig) -> Self {
        self.max_code_attempts = config.code_generation_max_attempts;
        self.expiring_soon_days = config.expiring_soon_days;
        self
    }

    pub fn max_code_attempts(&self) -> u32 {
        self.max_code_attempts
    }

    /// 签发优惠券
    #[instrument(
        skip(self, request),
        fields(template_id = %request.template_id, user_id = %request.user_id)
    )]
    pub async fn issue(&self, request: IssueCouponRequest) -> Result<CouponInstance> {
        let source = if request.assigned_by_actor.is_some() {
            "admin"
        } else {
            "api"
        };

        let result = self.execute_issue(&request).await;
        let status = match &result {
            Ok(_) => "success",
            Err(RewardsError::CapExceeded { .. }) => "cap_exceeded",
            Err(_) => "failed",
        };
        metrics::record_coupon_issue(source, status);

        let instance = result?;
        info!(
            instance_id = %instance.id,
            template_id = %instance.template_id,
            user_id = %instance.user_id,
            "优惠券签发成功"
        );

        Ok(instance)
    }

    /// 在调用方事务中签发
    ///
    /// 问卷发券与奖励记录共用同一事务
    pub async fn issue_in_tx(
        conn: &mut PgConnection,
        request: &IssueCouponRequest,
        max_code_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<CouponInstance> {
        request.validate()?;
        let instance_expiry = instance_expiry_at(now, request.custom_expiry_days)?;

        let template = CouponTemplateRepository::get_for_update(conn, request.template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(request.template_id))?;

        template.ensure_active(now)?;

        let user_claims =
            CouponInstanceRepository::count_user_claims_in_tx(conn, request.user_id, template.id)
                .await?;
        let outstanding = match template.total_usage_cap {
            Some(_) => Some(
                CouponInstanceRepository::count_outstanding_in_tx(conn, template.id, now).await?,
            ),
            None => None,
        };
        ensure_within_caps(&template, user_claims, outstanding)?;

        for attempt in 1..=max_code_attempts {
            let instance = CouponInstance {
                id: Uuid::now_v7(),
                user_id: request.user_id,
                template_id: template.id,
                redemption_code: generate_redemption_code(),
                status: InstanceStatus::Available,
                issued_at: now,
                instance_expiry,
                used_at: None,
                used_by_actor: None,
                assigned_by_actor: request.assigned_by_actor,
                assign_reason: request.reason.clone(),
                revoked_at: None,
                revoked_by: None,
                revoke_reason: None,
            };

            if CouponInstanceRepository::try_insert_in_tx(conn, &instance).await? {
                return Ok(instance);
            }

            warn!(attempt, template_id = %template.id, "兑换码冲突，重新生成");
        }

        Err(RewardsError::CodeGenerationExhausted {
            attempts: max_code_attempts,
        })
    }

    /// 批量签发
    ///
    /// 每个用户独立事务签发，单个用户失败不影响其他用户，失败原因以错误码记录在结果中
    #[instrument(
        skip(self, request),
        fields(template_id = %request.template_id, users = request.user_ids.len())
    )]
    pub async fn bulk_issue(&self, request: BulkIssueRequest) -> Result<BulkIssueSummary> {
        request.validate()?;

        let mut results = Vec::with_capacity(request.user_ids.len());
        for single in request.split() {
            let user_id = single.user_id;
            let outcome = match self.issue(single).await {
                Ok(instance) => BulkIssueOutcome::Issued {
                    instance_id: instance.id,
                    redemption_code: instance.redemption_code,
                },
                Err(e) => {
                    if e.is_business_error() {
                        warn!(user_id = %user_id, error = %e, "批量签发跳过用户");
                    } else {
                        error!(user_id = %user_id, error = %e, "批量签发失败");
                    }
                    BulkIssueOutcome::Failed {
                        reason: e.error_code().to_string(),
                    }
                }
            };
            results.push(BulkIssueResult { user_id, outcome });
        }

        let issued = results
            .iter()
            .filter(|r| matches!(r.outcome, BulkIssueOutcome::Issued { .. }))
            .count();
        let summary = BulkIssueSummary {
            template_id: request.template_id,
            issued,
            failed: results.len() - issued,
            results,
        };
        info!(issued = summary.issued, failed = summary.failed, "批量签发完成");

        Ok(summary)
    }

    /// 分页列出模板下的实例
    ///
    /// 状态为读取时状态
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn list_instances_for_template(
        &self,
        template_id: Uuid,
        status: Option<InstanceStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<Paged<CouponInstance>> {
        if self.template_repo.get(template_id).await?.is_none() {
            return Err(RewardsError::TemplateNotFound(template_id));
        }

        let window = PageWindow::new(page, page_size);
        let items = self
            .instance_repo
            .list_by_template(template_id, status, window.page_size, window.offset())
            .await?;
        let total = self
            .instance_repo
            .count_by_template(template_id, status)
            .await?;

        Ok(window.wrap(items, total))
    }

    /// 领取资格预检（只读，不加锁）
    #[instrument(skip(self), fields(template_id = %template_id, user_id = %user_id))]
    pub async fn check_eligibility(
        &self,
        template_id: Uuid,
        user_id: Uuid,
    ) -> Result<EligibilityDto> {
        let template = self
            .template_repo
            .get(template_id)
            .await?
            .ok_or(RewardsError::TemplateNotFound(template_id))?;

        if let Err(e) = template.ensure_active(Utc::now()) {
            return Ok(EligibilityDto::rejected(&e));
        }

        let user_claims = self
            .instance_repo
            .count_user_claims(user_id, template_id)
            .await?;
        let outstanding = match template.total_usage_cap {
            Some(_) => Some(self.instance_repo.count_outstanding(template_id).await?),
            None => None,
        };

        Ok(match ensure_within_caps(&template, user_claims, outstanding) {
            Ok(()) => EligibilityDto::eligible(),
            Err(e) => EligibilityDto::rejected(&e),
        })
    }

    /// 用户钱包
    ///
    /// 状态筛选作用于读取时呈现的状态
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_instances_for_user(
        &self,
        user_id: Uuid,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WalletCouponDto>> {
        let rows = self.instance_repo.list_wallet(user_id).await?;
        let now = Utc::now();
        let window = Duration::days(self.expiring_soon_days);

        Ok(rows
            .into_iter()
            .map(|row| wallet_entry(row, now, window))
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .collect())
    }

    /// 撤回 available 实例
    #[instrument(skip(self, reason), fields(instance_id = %instance_id, actor = %actor))]
    pub async fn revoke(
        &self,
        instance_id: Uuid,
        actor: Uuid,
        reason: Option<String>,
    ) -> Result<CouponInstance> {
        // 先无锁读取拿到模板 ID，再按 模板 -> 实例 的顺序加锁
        let snapshot = self
            .instance_repo
            .get(instance_id)
            .await?
            .ok_or(RewardsError::InstanceNotFound(instance_id))?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        CouponTemplateRepository::get_for_update(&mut tx, snapshot.template_id).await?;
        let instance = CouponInstanceRepository::get_for_update(&mut tx, instance_id)
            .await?
            .ok_or(RewardsError::InstanceNotFound(instance_id))?;

        if instance.status != InstanceStatus::Available {
            return Err(RewardsError::InstanceNotRevocable {
                instance_id,
                status: instance.status,
            });
        }

        let revoked = CouponInstanceRepository::revoke_in_tx(
            &mut tx,
            instance_id,
            actor,
            reason.as_deref(),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(instance_id = %instance_id, actor = %actor, "优惠券已撤回");
        Ok(revoked)
    }

    // ==================== 私有方法 ====================

    async fn execute_issue(&self, request: &IssueCouponRequest) -> Result<CouponInstance> {
        let mut tx = self.pool.begin().await?;
        let instance =
            Self::issue_in_tx(&mut tx, request, self.max_code_attempts, Utc::now()).await?;
        tx.commit().await?;
        Ok(instance)
    }
}

fn wallet_entry(row: WalletRow, now: DateTime<Utc>, window: Duration) -> WalletCouponDto {
    let expiry = effective_expiry(row.instance_expiry, row.template_valid_until);

    let status = match (row.status, expiry) {
        (InstanceStatus::Available, Some(at)) if now >= at => InstanceStatus::Expired,
        (status, _) => status,
    };
    let expiring_soon = status == InstanceStatus::Available
        && expiry.is_some_and(|at| at - now <= window);

    WalletCouponDto {
        instance_id: row.id,
        template_id: row.template_id,
        redemption_code: row.redemption_code,
        status,
        issued_at: row.issued_at,
        used_at: row.used_at,
        effective_expiry: expiry,
        expiring_soon,
        template_code: row.template_code,
        name: row.name,
        description: row.description,
        terms_and_conditions: row.terms_and_conditions,
        coupon_type: row.coupon_type,
        value: row.value,
        currency: row.currency,
        min_spend: row.min_spend,
        max_discount: row.max_discount,
    }
}
