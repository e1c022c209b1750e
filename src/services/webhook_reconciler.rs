use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::payment_repository::Payment;
use crate::database::repository::{CompletionDetails, PaymentStore, TransitionOutcome};
use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::gateway::ProcessorGateway;
use crate::payments::money::from_minor_units;
use crate::payments::types::{PaymentStatus, ProcessorEvent, ProcessorEventKind};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// Transient; the processor should redeliver.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<PaymentError> for ReconcileError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::WebhookVerificationError { message } => {
                ReconcileError::InvalidSignature(message)
            }
            other => ReconcileError::InvalidPayload(other.to_string()),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::InvalidSignature(message) => {
                AppError::new(AppErrorKind::External(ExternalError::SignatureInvalid {
                    message,
                }))
            }
            ReconcileError::InvalidPayload(reason) => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason,
                }))
            }
            ReconcileError::Database(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    /// Duplicate delivery or an event for a payment already past it.
    NoOp {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    /// The processor collected money for a payment the ledger holds as
    /// failed. The row is left unchanged and needs manual resolution.
    LedgerConflict {
        payment_id: Uuid,
        intent_id: String,
    },
    PaymentNotFound {
        reference: String,
    },
    Ignored {
        event_type: String,
    },
}

/// Applies processor webhooks to the ledger. Stateless between calls; every
/// write is conditional, so at-least-once delivery in any order is safe.
pub struct WebhookReconciler {
    payments: Arc<dyn PaymentStore>,
    gateway: ProcessorGateway,
}

impl WebhookReconciler {
    pub fn new(payments: Arc<dyn PaymentStore>, gateway: ProcessorGateway) -> Self {
        Self { payments, gateway }
    }

    /// Verifies the signature over the raw body, then decodes and applies.
    pub async fn handle(
        &self,
        raw: &[u8],
        signature_header: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let event = self
            .gateway
            .verify_and_decode_webhook(raw, signature_header)
            .map_err(|e| {
                warn!(error = %e, "rejected processor webhook");
                ReconcileError::from(e)
            })?;
        self.reconcile(event).await
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type()))]
    pub async fn reconcile(
        &self,
        event: ProcessorEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match event.kind {
            ProcessorEventKind::IntentSucceeded {
                intent_id,
                charge_id,
                fee_minor,
                payment_id,
            } => {
                let Some(payment) = self.locate(&intent_id, payment_id.as_deref()).await? else {
                    return Ok(not_found(&intent_id));
                };
                let details = CompletionDetails {
                    intent_id: Some(intent_id.clone()),
                    charge_id,
                    fee_amount: fee_minor.map(from_minor_units),
                    paid_at: Utc::now(),
                };
                let outcome = self.payments.mark_completed(payment.id, details).await?;
                if let TransitionOutcome::Rejected { payment } = &outcome {
                    if payment.status == PaymentStatus::Failed {
                        error!(
                            payment_id = %payment.id,
                            intent_id = %intent_id,
                            "processor collected payment recorded as failed"
                        );
                        return Ok(ReconcileOutcome::LedgerConflict {
                            payment_id: payment.id,
                            intent_id,
                        });
                    }
                }
                Ok(settle(payment.id, PaymentStatus::Completed, outcome))
            }
            ProcessorEventKind::IntentFailed {
                intent_id,
                failure_message,
                payment_id,
            } => {
                let Some(payment) = self.locate(&intent_id, payment_id.as_deref()).await? else {
                    return Ok(not_found(&intent_id));
                };
                let note = format!(
                    "Processor reported failure: {}",
                    failure_message.as_deref().unwrap_or("no reason given")
                );
                let outcome = self
                    .payments
                    .mark_failed(payment.id, Some(&intent_id), &note)
                    .await?;
                Ok(settle(payment.id, PaymentStatus::Failed, outcome))
            }
            ProcessorEventKind::IntentProcessing {
                intent_id,
                payment_id,
            } => {
                let Some(payment) = self.locate(&intent_id, payment_id.as_deref()).await? else {
                    return Ok(not_found(&intent_id));
                };
                let outcome = self.payments.mark_processing(payment.id, &intent_id).await?;
                Ok(settle(payment.id, PaymentStatus::Processing, outcome))
            }
            ProcessorEventKind::ChargeRefunded {
                charge_id,
                intent_id,
                reason,
            } => {
                let mut found = self.payments.find_by_charge_id(&charge_id).await?;
                if found.is_none() {
                    if let Some(intent_id) = intent_id.as_deref() {
                        found = self.payments.find_by_intent_id(intent_id).await?;
                    }
                }
                let Some(payment) = found else {
                    return Ok(not_found(&charge_id));
                };
                let note = format!(
                    "Refunded at processor: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                let outcome = self.payments.mark_refunded(payment.id, &note).await?;
                Ok(settle(payment.id, PaymentStatus::Refunded, outcome))
            }
            ProcessorEventKind::Unknown(event_type) => {
                debug!(event_type = %event_type, "ignoring unhandled processor event");
                Ok(ReconcileOutcome::Ignored { event_type })
            }
        }
    }

    /// By intent id first, then by the `payment_id` the intent carried in its
    /// metadata. A row already linked to a different intent is never matched.
    async fn locate(
        &self,
        intent_id: &str,
        payment_id: Option<&str>,
    ) -> Result<Option<Payment>, DatabaseError> {
        if let Some(payment) = self.payments.find_by_intent_id(intent_id).await? {
            return Ok(Some(payment));
        }

        let Some(id) = payment_id.and_then(|v| Uuid::parse_str(v).ok()) else {
            return Ok(None);
        };
        let payment = self.payments.find_by_id(id).await?;
        Ok(payment.filter(|p| {
            p.processor_intent_id
                .as_deref()
                .map_or(true, |linked| linked == intent_id)
        }))
    }
}

fn not_found(reference: &str) -> ReconcileOutcome {
    warn!(reference = %reference, "webhook references no known payment");
    ReconcileOutcome::PaymentNotFound {
        reference: reference.to_string(),
    }
}

fn settle(payment_id: Uuid, target: PaymentStatus, outcome: TransitionOutcome) -> ReconcileOutcome {
    match outcome {
        TransitionOutcome::Applied { payment, previous } if previous == target => {
            debug!(payment_id = %payment_id, status = %payment.status, "status already current");
            ReconcileOutcome::NoOp {
                payment_id,
                status: payment.status,
            }
        }
        TransitionOutcome::Applied { payment, previous } => {
            info!(
                payment_id = %payment_id,
                from = %previous,
                to = %payment.status,
                "payment reconciled"
            );
            ReconcileOutcome::Applied {
                payment_id,
                status: payment.status,
            }
        }
        TransitionOutcome::Rejected { payment } => {
            info!(
                payment_id = %payment_id,
                status = %payment.status,
                requested = %target,
                "stale or duplicate event, leaving payment unchanged"
            );
            ReconcileOutcome::NoOp {
                payment_id,
                status: payment.status,
            }
        }
        TransitionOutcome::NotFound => not_found(&payment_id.to_string()),
    }
}
