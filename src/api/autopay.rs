use axum::{extract::State, Json};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::database::enrollment_repository::AutopayEnrollment;
use crate::error::{AppError, DomainError};
use crate::middleware::auth::TenantIdentity;

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub payment_method_id: Uuid,
    pub discount_amount: Option<BigDecimal>,
}

/// GET /api/autopay
pub async fn get_enrollment(
    State(state): State<AppState>,
    TenantIdentity(tenant_id): TenantIdentity,
) -> Result<Json<AutopayEnrollment>, AppError> {
    let enrollment = state.autopay.find(tenant_id).await?.ok_or_else(|| {
        AppError::domain(DomainError::EnrollmentNotFound {
            tenant_id: tenant_id.to_string(),
        })
    })?;
    Ok(Json(enrollment))
}

/// POST /api/autopay/enroll
pub async fn enroll(
    State(state): State<AppState>,
    TenantIdentity(tenant_id): TenantIdentity,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<AutopayEnrollment>, AppError> {
    let enrollment = state
        .autopay
        .enroll(tenant_id, request.payment_method_id, request.discount_amount)
        .await?;
    Ok(Json(enrollment))
}

/// POST /api/autopay/cancel
pub async fn cancel(
    State(state): State<AppState>,
    TenantIdentity(tenant_id): TenantIdentity,
) -> Result<Json<AutopayEnrollment>, AppError> {
    Ok(Json(state.autopay.cancel(tenant_id).await?))
}
