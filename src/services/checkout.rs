//! Tenant-initiated checkout. The intent is created unconfirmed; the client
//! confirms it with the returned secret.

use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::database::payment_repository::{NewPayment, Payment};
use crate::database::repository::{InsertOutcome, PaymentStore, TenantReader};
use crate::error::{AppError, DomainError, ValidationError};
use crate::payments::gateway::{IntentParams, ProcessorGateway};
use crate::payments::money::{estimate_fee, round_major};
use crate::payments::types::{
    BillingPeriod, IntentMetadata, PaymentMethodType, PaymentStatus, PaymentType,
};

#[derive(Debug, Clone)]
pub struct CheckoutCommand {
    pub tenant_id: Uuid,
    /// Defaults to the tenant's base rent.
    pub amount: Option<BigDecimal>,
    pub payment_type: PaymentType,
    pub payment_method_id: Uuid,
    pub period: Option<BillingPeriod>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub payment: Payment,
    pub intent_id: String,
    pub client_secret: Option<String>,
    /// Processor fee estimate shown before the tenant confirms.
    pub estimated_fee: BigDecimal,
}

pub struct CheckoutService {
    payments: Arc<dyn PaymentStore>,
    tenants: Arc<dyn TenantReader>,
    gateway: ProcessorGateway,
}

impl CheckoutService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        tenants: Arc<dyn TenantReader>,
        gateway: ProcessorGateway,
    ) -> Self {
        Self {
            payments,
            tenants,
            gateway,
        }
    }

    #[instrument(skip(self, command), fields(tenant_id = %command.tenant_id))]
    pub async fn start(&self, command: CheckoutCommand) -> Result<CheckoutSession, AppError> {
        let profile = self
            .tenants
            .billing_profile(command.tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::TenantNotFound {
                    tenant_id: command.tenant_id.to_string(),
                })
            })?;

        let method_not_found = || {
            AppError::domain(DomainError::PaymentMethodNotFound {
                payment_method_id: command.payment_method_id.to_string(),
            })
        };
        let method = self
            .gateway
            .find_payment_method(command.payment_method_id)
            .await?
            .filter(|m| m.user_id == profile.user_id)
            .ok_or_else(method_not_found)?;
        let kind = method.kind()?;

        let requested = command.amount.as_ref().unwrap_or(&profile.base_rent);
        let amount = round_major(requested);
        if amount <= BigDecimal::zero() {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: requested.to_string(),
                reason: "amount must be greater than zero".to_string(),
            }));
        }

        let inserted = self
            .payments
            .insert(NewPayment {
                tenant_id: command.tenant_id,
                property_id: profile.property_id,
                amount: amount.clone(),
                payment_type: command.payment_type,
                payment_method: PaymentMethodType::from(kind),
                status: PaymentStatus::Pending,
                period: command.period,
                due_date: command
                    .period
                    .map_or_else(|| Utc::now().date_naive(), |p| p.start),
                is_autopay: false,
                recorded_by: None,
                payment_date: None,
                notes: None,
            })
            .await?;

        let payment = match inserted {
            InsertOutcome::Inserted(payment) => payment,
            InsertOutcome::Duplicate => {
                return Err(AppError::domain(DomainError::DuplicatePayment {
                    tenant_id: command.tenant_id.to_string(),
                    period: command.period.map(|p| p.to_string()).unwrap_or_default(),
                }))
            }
        };

        let customer_id = if method.processor_customer_id.is_empty() {
            match self
                .gateway
                .get_or_create_customer(profile.user_id, &profile.email, &profile.full_name)
                .await
            {
                Ok(customer_id) => customer_id,
                Err(e) => {
                    self.fail(&payment, &e.to_string()).await;
                    return Err(e.into());
                }
            }
        } else {
            method.processor_customer_id.clone()
        };

        let mut metadata = IntentMetadata::new();
        metadata.insert("payment_id".to_string(), payment.id.to_string());
        metadata.insert("tenant_id".to_string(), payment.tenant_id.to_string());
        if let Some(period) = command.period {
            metadata.insert("period_start".to_string(), period.start.to_string());
            metadata.insert("period_end".to_string(), period.end.to_string());
        }

        let intent = self
            .gateway
            .create_intent(IntentParams {
                customer_id: &customer_id,
                amount: &amount,
                payment_method_token: Some(&method.processor_method_token),
                metadata,
                off_session: false,
                idempotency_key: Some(format!("checkout-{}", payment.id)),
                description: Some(format!("{} payment", payment.payment_type)),
            })
            .await;

        let intent = match intent {
            Ok(intent) => intent,
            Err(e) => {
                self.fail(&payment, e.processor_message()).await;
                return Err(e.into());
            }
        };

        let outcome = self.payments.mark_processing(payment.id, &intent.id).await?;
        let payment = outcome.payment().cloned().unwrap_or(payment);

        info!(payment_id = %payment.id, intent_id = %intent.id, amount = %amount, "checkout started");
        Ok(CheckoutSession {
            estimated_fee: estimate_fee(kind, &payment.amount),
            payment,
            intent_id: intent.id,
            client_secret: intent.client_secret,
        })
    }

    async fn fail(&self, payment: &Payment, reason: &str) {
        warn!(payment_id = %payment.id, reason = %reason, "checkout failed at processor");
        let note = format!("Checkout failed: {}", reason);
        if let Err(e) = self.payments.mark_failed(payment.id, None, &note).await {
            warn!(payment_id = %payment.id, error = %e, "failed to mark payment failed");
        }
    }
}
