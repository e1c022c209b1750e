use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::database::payment_repository::Payment;
use crate::error::{AppError, DomainError, ErrorCode};
use crate::middleware::auth::{AdminIdentity, TenantIdentity};
use crate::middleware::error::success_response;
use crate::payments::types::{BillingPeriod, PaymentMethodType, PaymentType};
use crate::services::{CheckoutCommand, CheckoutSession, ManualPaymentCommand, RefundCommand, RefundOutcome};

fn payment_not_found(id: Uuid) -> AppError {
    AppError::domain(DomainError::PaymentNotFound {
        payment_id: id.to_string(),
    })
}

/// GET /api/payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .payments
        .find_by_id(id)
        .await?
        .ok_or_else(|| payment_not_found(id))?;
    Ok(Json(payment))
}

#[derive(Debug, Deserialize)]
pub struct RefundPaymentRequest {
    pub payment_id: Uuid,
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

/// POST /api/admin/payments/refund
///
/// 207 when the processor refunded but the ledger could not be updated.
pub async fn refund_payment(
    State(state): State<AppState>,
    AdminIdentity(admin_id): AdminIdentity,
    Json(request): Json<RefundPaymentRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .refunds
        .refund(RefundCommand {
            payment_id: request.payment_id,
            amount: request.amount,
            reason: request.reason,
            admin_id,
        })
        .await?;

    let response = match outcome {
        RefundOutcome::Refunded {
            refund_id,
            amount,
            payment,
        } => (
            StatusCode::OK,
            Json(json!({
                "refund_id": refund_id,
                "amount": amount,
                "payment": payment,
            })),
        )
            .into_response(),
        RefundOutcome::RefundedButUnpersisted {
            refund_id,
            payment_id,
            amount,
            error,
        } => (
            StatusCode::MULTI_STATUS,
            Json(json!({
                "status": "partial_success",
                "warning": format!(
                    "Refund {} was issued by the processor but the payment record was not updated ({}). Reconcile payment {} manually.",
                    refund_id, error, payment_id
                ),
                "error_code": ErrorCode::LedgerInconsistency,
                "refund_id": refund_id,
                "payment_id": payment_id,
                "amount": amount,
            })),
        )
            .into_response(),
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct ManualPaymentRequest {
    pub tenant_id: Uuid,
    pub amount: BigDecimal,
    #[serde(default = "default_payment_type")]
    pub payment_type: PaymentType,
    pub payment_method: PaymentMethodType,
    pub payment_date: NaiveDate,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub notes: Option<String>,
}

fn default_payment_type() -> PaymentType {
    PaymentType::Rent
}

/// POST /api/admin/payments/manual
pub async fn record_manual_payment(
    State(state): State<AppState>,
    AdminIdentity(admin_id): AdminIdentity,
    Json(request): Json<ManualPaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let payment = state
        .manual_payments
        .record(ManualPaymentCommand {
            tenant_id: request.tenant_id,
            amount: request.amount,
            payment_type: request.payment_type,
            payment_method: request.payment_method,
            payment_date: request.payment_date,
            period_start: request.period_start,
            period_end: request.period_end,
            notes: request.notes,
            admin_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// DELETE /api/admin/payments/{id}
///
/// Irreversible. Nothing at the processor is touched.
pub async fn delete_payment(
    State(state): State<AppState>,
    AdminIdentity(admin_id): AdminIdentity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.payments.delete(id).await? {
        return Err(payment_not_found(id));
    }
    warn!(payment_id = %id, admin_id = %admin_id, "payment deleted");
    Ok(success_response(json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub payment_method_id: Uuid,
    pub amount: Option<BigDecimal>,
    #[serde(default = "default_payment_type")]
    pub payment_type: PaymentType,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

/// POST /api/payments/checkout
pub async fn checkout(
    State(state): State<AppState>,
    TenantIdentity(tenant_id): TenantIdentity,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutSession>), AppError> {
    let period = match (request.period_start, request.period_end) {
        (None, None) => None,
        (Some(start), Some(end)) => Some(BillingPeriod::new(start, end)?),
        _ => {
            return Err(AppError::invalid_field(
                "period_start",
                "period_start and period_end must be supplied together",
            ))
        }
    };

    let session = state
        .checkout
        .start(CheckoutCommand {
            tenant_id,
            amount: request.amount,
            payment_type: request.payment_type,
            payment_method_id: request.payment_method_id,
            period,
        })
        .await?;
    info!(payment_id = %session.payment.id, "checkout session created");
    Ok((StatusCode::CREATED, Json(session)))
}
