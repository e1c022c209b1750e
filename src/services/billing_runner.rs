//! Monthly autopay batch.
//!
//! Every active enrollment is billed in its own future; the runner folds the
//! per-enrollment results into a [`BillingRunSummary`]. Re-running a period is
//! safe: an occupied period is skipped, and the ledger's partial unique index
//! settles races between concurrent runners.

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::database::enrollment_repository::AutopayEnrollment;
use crate::database::payment_repository::{NewPayment, Payment};
use crate::database::repository::{
    EnrollmentStore, InsertOutcome, PaymentStore, TenantReader, TransitionOutcome,
};
use crate::error::AppError;
use crate::payments::gateway::{IntentParams, ProcessorGateway};
use crate::payments::money::round_major;
use crate::payments::types::{
    BillingPeriod, IntentMetadata, PaymentMethodKind, PaymentMethodType, PaymentStatus,
    PaymentType,
};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Discount meets or exceeds the base rent.
    NonPositiveAmount,
    /// An active payment already occupies the period.
    AlreadyBilled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EnrollmentOutcome {
    Charged {
        enrollment_id: Uuid,
        tenant_id: Uuid,
        payment_id: Uuid,
        intent_id: String,
        amount: BigDecimal,
    },
    Skipped {
        enrollment_id: Uuid,
        tenant_id: Uuid,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentFailure {
    pub enrollment_id: Uuid,
    pub tenant_id: Uuid,
    /// Set when a ledger row was created (and marked failed).
    pub payment_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingRunSummary {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<EnrollmentFailure>,
    pub outcomes: Vec<EnrollmentOutcome>,
}

impl BillingRunSummary {
    fn new(period: BillingPeriod) -> Self {
        Self {
            period_start: period.start,
            period_end: period.end,
            total: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, result: Result<EnrollmentOutcome, EnrollmentFailure>) {
        self.total += 1;
        match result {
            Ok(outcome) => {
                match outcome {
                    EnrollmentOutcome::Charged { .. } => self.successful += 1,
                    EnrollmentOutcome::Skipped { .. } => self.skipped += 1,
                }
                self.outcomes.push(outcome);
            }
            Err(failure) => {
                self.failed += 1;
                self.errors.push(failure);
            }
        }
    }
}

pub struct BillingRunner {
    payments: Arc<dyn PaymentStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    tenants: Arc<dyn TenantReader>,
    gateway: ProcessorGateway,
    max_concurrency: usize,
}

impl BillingRunner {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        enrollments: Arc<dyn EnrollmentStore>,
        tenants: Arc<dyn TenantReader>,
        gateway: ProcessorGateway,
    ) -> Self {
        Self {
            payments,
            enrollments,
            tenants,
            gateway,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Bills every active enrollment for `period`. Only a failure to list the
    /// enrollments fails the run; everything else is reported per enrollment.
    #[instrument(skip(self), fields(period = %period))]
    pub async fn run(&self, period: BillingPeriod) -> Result<BillingRunSummary, AppError> {
        let enrollments: Vec<AutopayEnrollment> = self
            .enrollments
            .list_active()
            .await?
            .into_iter()
            .filter(AutopayEnrollment::is_billable)
            .collect();

        info!(enrollments = enrollments.len(), "starting billing run");

        let results: Vec<Result<EnrollmentOutcome, EnrollmentFailure>> =
            stream::iter(enrollments)
                .map(|enrollment| self.bill_enrollment(enrollment, period))
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

        let mut summary = BillingRunSummary::new(period);
        for result in results {
            summary.record(result);
        }

        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            "billing run finished"
        );
        Ok(summary)
    }

    async fn bill_enrollment(
        &self,
        enrollment: AutopayEnrollment,
        period: BillingPeriod,
    ) -> Result<EnrollmentOutcome, EnrollmentFailure> {
        let failure = |payment_id: Option<Uuid>, message: String| EnrollmentFailure {
            enrollment_id: enrollment.id,
            tenant_id: enrollment.tenant_id,
            payment_id,
            message,
        };
        let skipped = |reason: SkipReason| EnrollmentOutcome::Skipped {
            enrollment_id: enrollment.id,
            tenant_id: enrollment.tenant_id,
            reason,
        };

        let profile = self
            .tenants
            .billing_profile(enrollment.tenant_id)
            .await
            .map_err(|e| failure(None, e.to_string()))?
            .ok_or_else(|| failure(None, "Tenant billing profile not found".to_string()))?;

        let amount = round_major(&(&profile.base_rent - &enrollment.discount_amount));
        if amount <= BigDecimal::zero() {
            warn!(
                tenant_id = %enrollment.tenant_id,
                base_rent = %profile.base_rent,
                discount = %enrollment.discount_amount,
                "skipping enrollment with non-positive charge"
            );
            return Ok(skipped(SkipReason::NonPositiveAmount));
        }

        let existing = self
            .payments
            .find_active_for_period(enrollment.tenant_id, &period)
            .await
            .map_err(|e| failure(None, e.to_string()))?;
        if let Some(existing) = existing {
            info!(
                tenant_id = %enrollment.tenant_id,
                payment_id = %existing.id,
                "period already billed"
            );
            return Ok(skipped(SkipReason::AlreadyBilled));
        }

        let method = self
            .gateway
            .find_payment_method(enrollment.payment_method_id)
            .await
            .map_err(|e| failure(None, e.to_string()))?;
        let kind = match &method {
            Some(method) => method.kind().map_err(|e| failure(None, e.to_string()))?,
            None => PaymentMethodKind::Bank,
        };

        let inserted = self
            .payments
            .insert(NewPayment {
                tenant_id: enrollment.tenant_id,
                property_id: profile.property_id,
                amount: amount.clone(),
                payment_type: PaymentType::Rent,
                payment_method: PaymentMethodType::from(kind),
                status: PaymentStatus::Pending,
                period: Some(period),
                due_date: period.start,
                is_autopay: true,
                recorded_by: None,
                payment_date: None,
                notes: Some("Autopay charge".to_string()),
            })
            .await
            .map_err(|e| failure(None, e.to_string()))?;

        let payment = match inserted {
            InsertOutcome::Inserted(payment) => payment,
            InsertOutcome::Duplicate => {
                info!(tenant_id = %enrollment.tenant_id, "lost insert race, period already billed");
                return Ok(skipped(SkipReason::AlreadyBilled));
            }
        };

        let Some(method) = method else {
            let message = format!(
                "Saved payment method {} not found",
                enrollment.payment_method_id
            );
            return Err(failure(
                Some(payment.id),
                self.fail_payment(&payment, &message).await,
            ));
        };

        let customer_id = if method.processor_customer_id.is_empty() {
            match self
                .gateway
                .get_or_create_customer(profile.user_id, &profile.email, &profile.full_name)
                .await
            {
                Ok(customer_id) => customer_id,
                Err(e) => {
                    let message = format!("Customer lookup failed: {}", e);
                    return Err(failure(
                        Some(payment.id),
                        self.fail_payment(&payment, &message).await,
                    ));
                }
            }
        } else {
            method.processor_customer_id.clone()
        };

        let intent = self
            .gateway
            .create_intent(IntentParams {
                customer_id: &customer_id,
                amount: &amount,
                payment_method_token: Some(&method.processor_method_token),
                metadata: intent_metadata(&payment, &period),
                off_session: true,
                idempotency_key: Some(format!("autopay-{}", payment.id)),
                description: Some(format!("Rent {}", period)),
            })
            .await;

        let intent = match intent {
            Ok(intent) => intent,
            Err(e) => {
                let message = format!("Autopay charge failed: {}", e.processor_message());
                return Err(failure(
                    Some(payment.id),
                    self.fail_payment(&payment, &message).await,
                ));
            }
        };

        match self.payments.mark_processing(payment.id, &intent.id).await {
            Ok(TransitionOutcome::Applied { .. }) | Ok(TransitionOutcome::Rejected { .. }) => {}
            Ok(TransitionOutcome::NotFound) => {
                warn!(payment_id = %payment.id, intent_id = %intent.id, "payment vanished after intent creation");
            }
            // The charge exists remotely; the webhook carries payment_id and
            // will settle the row.
            Err(e) => {
                error!(payment_id = %payment.id, intent_id = %intent.id, error = %e, "failed to record intent");
            }
        }

        info!(
            tenant_id = %enrollment.tenant_id,
            payment_id = %payment.id,
            intent_id = %intent.id,
            amount = %amount,
            "autopay charge created"
        );
        Ok(EnrollmentOutcome::Charged {
            enrollment_id: enrollment.id,
            tenant_id: enrollment.tenant_id,
            payment_id: payment.id,
            intent_id: intent.id,
            amount,
        })
    }

    /// Marks the row failed and returns the message to report.
    async fn fail_payment(&self, payment: &Payment, message: &str) -> String {
        warn!(payment_id = %payment.id, tenant_id = %payment.tenant_id, reason = %message, "autopay charge failed");
        match self.payments.mark_failed(payment.id, None, message).await {
            Ok(_) => message.to_string(),
            Err(e) => {
                error!(payment_id = %payment.id, error = %e, "failed to mark payment failed");
                format!("{} (could not mark payment failed: {})", message, e)
            }
        }
    }
}

fn intent_metadata(payment: &Payment, period: &BillingPeriod) -> IntentMetadata {
    let mut metadata = IntentMetadata::new();
    metadata.insert("payment_id".to_string(), payment.id.to_string());
    metadata.insert("tenant_id".to_string(), payment.tenant_id.to_string());
    metadata.insert("period_start".to_string(), period.start.to_string());
    metadata.insert("period_end".to_string(), period.end.to_string());
    metadata.insert("autopay".to_string(), "true".to_string());
    metadata
}
