use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::enrollment_repository::AutopayEnrollment;
use crate::database::repository::{EnrollmentStore, PaymentMethodStore, TenantReader};
use crate::error::{AppError, DomainError, ValidationError};
use crate::payments::money::round_major;

/// Enrollment lifecycle: one row per tenant, re-activated on re-enroll.
pub struct AutopayService {
    enrollments: Arc<dyn EnrollmentStore>,
    tenants: Arc<dyn TenantReader>,
    methods: Arc<dyn PaymentMethodStore>,
}

impl AutopayService {
    pub fn new(
        enrollments: Arc<dyn EnrollmentStore>,
        tenants: Arc<dyn TenantReader>,
        methods: Arc<dyn PaymentMethodStore>,
    ) -> Self {
        Self {
            enrollments,
            tenants,
            methods,
        }
    }

    pub async fn enroll(
        &self,
        tenant_id: Uuid,
        payment_method_id: Uuid,
        discount: Option<BigDecimal>,
    ) -> Result<AutopayEnrollment, AppError> {
        let discount = round_major(&discount.unwrap_or_else(BigDecimal::zero));
        if discount < BigDecimal::zero() {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: discount.to_string(),
                reason: "discount cannot be negative".to_string(),
            }));
        }

        let profile = self
            .tenants
            .billing_profile(tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::TenantNotFound {
                    tenant_id: tenant_id.to_string(),
                })
            })?;

        // Another user's instrument is reported as missing.
        let method = self
            .methods
            .find_by_id(payment_method_id)
            .await?
            .filter(|m| m.user_id == profile.user_id)
            .ok_or_else(|| {
                AppError::domain(DomainError::PaymentMethodNotFound {
                    payment_method_id: payment_method_id.to_string(),
                })
            })?;
        method.kind()?;

        let enrollment = self
            .enrollments
            .upsert_active(tenant_id, payment_method_id, &discount)
            .await?;
        info!(tenant_id = %tenant_id, enrollment_id = %enrollment.id, discount = %discount, "autopay enrolled");
        Ok(enrollment)
    }

    pub async fn cancel(&self, tenant_id: Uuid) -> Result<AutopayEnrollment, AppError> {
        let enrollment = self.enrollments.cancel(tenant_id).await?.ok_or_else(|| {
            AppError::domain(DomainError::EnrollmentNotFound {
                tenant_id: tenant_id.to_string(),
            })
        })?;
        info!(tenant_id = %tenant_id, enrollment_id = %enrollment.id, "autopay cancelled");
        Ok(enrollment)
    }

    pub async fn find(&self, tenant_id: Uuid) -> Result<Option<AutopayEnrollment>, AppError> {
        Ok(self.enrollments.find_by_tenant(tenant_id).await?)
    }
}
