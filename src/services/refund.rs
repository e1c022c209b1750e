//! Admin refunds of processor-collected payments.

use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::database::payment_repository::Payment;
use crate::database::repository::{PaymentStore, TransitionOutcome};
use crate::error::{AppError, DomainError};
use crate::payments::gateway::ProcessorGateway;
use crate::payments::money::{from_minor_units, round_major, to_minor_units};
use crate::payments::types::{IntentMetadata, PaymentStatus};

#[derive(Debug, Clone)]
pub struct RefundCommand {
    pub payment_id: Uuid,
    /// Defaults to the full payment amount.
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
    pub admin_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefundOutcome {
    Refunded {
        refund_id: String,
        amount: BigDecimal,
        payment: Payment,
    },
    /// Money moved at the processor but the ledger still says completed.
    RefundedButUnpersisted {
        refund_id: String,
        payment_id: Uuid,
        amount: BigDecimal,
        error: String,
    },
}

pub struct RefundService {
    payments: Arc<dyn PaymentStore>,
    gateway: ProcessorGateway,
}

impl RefundService {
    pub fn new(payments: Arc<dyn PaymentStore>, gateway: ProcessorGateway) -> Self {
        Self { payments, gateway }
    }

    /// Every precondition is checked before the processor is contacted.
    #[instrument(skip(self, command), fields(payment_id = %command.payment_id, admin_id = %command.admin_id))]
    pub async fn refund(&self, command: RefundCommand) -> Result<RefundOutcome, AppError> {
        let payment = self
            .payments
            .find_by_id(command.payment_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::PaymentNotFound {
                    payment_id: command.payment_id.to_string(),
                })
            })?;

        match payment.status {
            PaymentStatus::Completed => {}
            PaymentStatus::Refunded => {
                return Err(AppError::domain(DomainError::AlreadyRefunded {
                    payment_id: payment.id.to_string(),
                }))
            }
            status => {
                return Err(AppError::domain(DomainError::RefundNotAllowed {
                    payment_id: payment.id.to_string(),
                    status: status.to_string(),
                }))
            }
        }

        let intent_id = match (&payment.processor_intent_id, payment.has_processor_linkage()) {
            (Some(intent_id), true) => intent_id.clone(),
            _ => {
                return Err(AppError::domain(DomainError::ManualRefundRequired {
                    payment_id: payment.id.to_string(),
                    method: payment.payment_method.to_string(),
                }))
            }
        };

        let amount = refund_amount(&payment, command.amount.as_ref())?;
        let amount_minor = to_minor_units(&amount)?;

        let mut metadata = IntentMetadata::new();
        metadata.insert("payment_id".to_string(), payment.id.to_string());
        metadata.insert("refunded_by".to_string(), command.admin_id.to_string());

        let refund = self
            .gateway
            .refund(
                &intent_id,
                Some(&amount),
                command.reason.as_deref(),
                metadata,
                Some(format!("refund-{}-{}", payment.id, amount_minor)),
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "processor refused refund");
                AppError::from(e)
            })?;

        let refunded_amount = from_minor_units(refund.amount_minor);
        info!(refund_id = %refund.id, amount = %refunded_amount, "processor refund issued");

        let note = format!(
            "Refunded {} by admin {} (refund {}): {}",
            refunded_amount,
            command.admin_id,
            refund.id,
            command.reason.as_deref().unwrap_or("no reason given")
        );

        let unpersisted = |error: String| {
            error!(
                refund_id = %refund.id,
                payment_id = %payment.id,
                error = %error,
                "refund issued but ledger not updated"
            );
            RefundOutcome::RefundedButUnpersisted {
                refund_id: refund.id.clone(),
                payment_id: payment.id,
                amount: refunded_amount.clone(),
                error,
            }
        };

        let outcome = match self.payments.mark_refunded(payment.id, &note).await {
            Ok(TransitionOutcome::Applied { payment, .. }) => RefundOutcome::Refunded {
                refund_id: refund.id.clone(),
                amount: refunded_amount.clone(),
                payment,
            },
            // The processor's refund webhook got there first.
            Ok(TransitionOutcome::Rejected { payment })
                if payment.status == PaymentStatus::Refunded =>
            {
                RefundOutcome::Refunded {
                    refund_id: refund.id.clone(),
                    amount: refunded_amount.clone(),
                    payment,
                }
            }
            Ok(TransitionOutcome::Rejected { payment }) => unpersisted(format!(
                "payment moved to {} during refund",
                payment.status
            )),
            Ok(TransitionOutcome::NotFound) => {
                unpersisted("payment deleted during refund".to_string())
            }
            Err(e) => unpersisted(e.to_string()),
        };
        Ok(outcome)
    }
}

fn refund_amount(payment: &Payment, requested: Option<&BigDecimal>) -> Result<BigDecimal, AppError> {
    let Some(requested) = requested else {
        return Ok(payment.amount.clone());
    };

    if requested > &payment.amount {
        return Err(AppError::domain(DomainError::InvalidAmount {
            amount: requested.to_string(),
            reason: format!("refund amount exceeds original payment of {}", payment.amount),
        }));
    }

    let amount = round_major(requested);
    if amount <= BigDecimal::zero() {
        return Err(AppError::domain(DomainError::InvalidAmount {
            amount: requested.to_string(),
            reason: "refund amount must be greater than zero".to_string(),
        }));
    }
    Ok(amount)
}
