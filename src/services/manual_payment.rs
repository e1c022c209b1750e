//! Admin-recorded offline payments (check, cash, money order).

use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::database::payment_repository::{NewPayment, Payment};
use crate::database::repository::{InsertOutcome, PaymentStore, TenantReader};
use crate::error::{AppError, DomainError, ValidationError};
use crate::payments::money::round_major;
use crate::payments::types::{BillingPeriod, PaymentMethodType, PaymentStatus, PaymentType};

#[derive(Debug, Clone)]
pub struct ManualPaymentCommand {
    pub tenant_id: Uuid,
    pub amount: BigDecimal,
    pub payment_type: PaymentType,
    pub payment_method: PaymentMethodType,
    pub payment_date: NaiveDate,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub notes: Option<String>,
    pub admin_id: Uuid,
}

pub struct ManualPaymentService {
    payments: Arc<dyn PaymentStore>,
    tenants: Arc<dyn TenantReader>,
}

impl ManualPaymentService {
    pub fn new(payments: Arc<dyn PaymentStore>, tenants: Arc<dyn TenantReader>) -> Self {
        Self { payments, tenants }
    }

    /// Inserts the payment directly as completed.
    #[instrument(skip(self, command), fields(tenant_id = %command.tenant_id, admin_id = %command.admin_id))]
    pub async fn record(&self, command: ManualPaymentCommand) -> Result<Payment, AppError> {
        if !command.payment_method.is_manual() {
            return Err(AppError::invalid_field(
                "payment_method",
                format!(
                    "{} payments are recorded by the processor, not manually",
                    command.payment_method
                ),
            ));
        }

        let amount = round_major(&command.amount);
        if amount <= BigDecimal::zero() {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: command.amount.to_string(),
                reason: "amount must be greater than zero".to_string(),
            }));
        }

        let period = match (command.period_start, command.period_end) {
            (None, None) => None,
            (Some(start), Some(end)) => Some(
                BillingPeriod::new(start, end)
                    .map_err(|_| AppError::invalid_field("period_start", "must be on or before period_end"))?,
            ),
            _ => {
                return Err(AppError::invalid_field(
                    "period_start",
                    "period_start and period_end must be supplied together",
                ))
            }
        };

        let profile = self
            .tenants
            .billing_profile(command.tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::TenantNotFound {
                    tenant_id: command.tenant_id.to_string(),
                })
            })?;

        let note = match command.notes.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                format!("Recorded by admin {}: {}", command.admin_id, text)
            }
            _ => format!("Recorded by admin {}", command.admin_id),
        };

        let outcome = self
            .payments
            .insert(NewPayment {
                tenant_id: command.tenant_id,
                property_id: profile.property_id,
                amount,
                payment_type: command.payment_type,
                payment_method: command.payment_method,
                status: PaymentStatus::Completed,
                period,
                due_date: period.map_or(command.payment_date, |p| p.start),
                is_autopay: false,
                recorded_by: Some(command.admin_id),
                payment_date: Some(command.payment_date.and_time(NaiveTime::MIN).and_utc()),
                notes: Some(note),
            })
            .await?;

        match outcome {
            InsertOutcome::Inserted(payment) => {
                info!(payment_id = %payment.id, method = %payment.payment_method, amount = %payment.amount, "manual payment recorded");
                Ok(payment)
            }
            InsertOutcome::Duplicate => Err(AppError::domain(DomainError::DuplicatePayment {
                tenant_id: command.tenant_id.to_string(),
                period: period.map(|p| p.to_string()).unwrap_or_default(),
            })),
        }
    }
}
