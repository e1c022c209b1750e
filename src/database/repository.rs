//! Store traits the services depend on.
//!
//! Postgres implementations live beside each entity; `memory` provides
//! in-process implementations with the same invariants.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::enrollment_repository::AutopayEnrollment;
use crate::database::error::DatabaseError;
use crate::database::payment_method_repository::SavedPaymentMethod;
use crate::database::payment_repository::{NewPayment, Payment};
use crate::database::tenant_repository::TenantBillingProfile;
use crate::payments::types::{BillingPeriod, PaymentStatus};

/// Result of a constrained insert into the ledger.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Payment),
    /// Another active row already holds the tenant's period.
    Duplicate,
}

/// Result of a conditional status write.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The write matched; `previous` is the status it moved from.
    Applied {
        payment: Payment,
        previous: PaymentStatus,
    },
    /// The row exists but its status is not an allowed source.
    Rejected { payment: Payment },
    NotFound,
}

impl TransitionOutcome {
    pub fn payment(&self) -> Option<&Payment> {
        match self {
            TransitionOutcome::Applied { payment, .. } | TransitionOutcome::Rejected { payment } => {
                Some(payment)
            }
            TransitionOutcome::NotFound => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionDetails {
    /// Recorded only if the row has no intent id yet.
    pub intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub fee_amount: Option<BigDecimal>,
    pub paid_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: NewPayment) -> Result<InsertOutcome, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_charge_id(&self, charge_id: &str) -> Result<Option<Payment>, DatabaseError>;

    /// The row occupying the tenant's period, if any.
    async fn find_active_for_period(
        &self,
        tenant_id: Uuid,
        period: &BillingPeriod,
    ) -> Result<Option<Payment>, DatabaseError>;

    async fn mark_processing(
        &self,
        id: Uuid,
        intent_id: &str,
    ) -> Result<TransitionOutcome, DatabaseError>;

    async fn mark_completed(
        &self,
        id: Uuid,
        details: CompletionDetails,
    ) -> Result<TransitionOutcome, DatabaseError>;

    async fn mark_failed(
        &self,
        id: Uuid,
        intent_id: Option<&str>,
        note: &str,
    ) -> Result<TransitionOutcome, DatabaseError>;

    async fn mark_refunded(&self, id: Uuid, note: &str)
        -> Result<TransitionOutcome, DatabaseError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Enrollments that are active and not cancelled.
    async fn list_active(&self) -> Result<Vec<AutopayEnrollment>, DatabaseError>;

    async fn find_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<AutopayEnrollment>, DatabaseError>;

    /// Creates the tenant's enrollment or re-activates the existing row.
    async fn upsert_active(
        &self,
        tenant_id: Uuid,
        payment_method_id: Uuid,
        discount_amount: &BigDecimal,
    ) -> Result<AutopayEnrollment, DatabaseError>;

    /// Returns `None` when the tenant has no active enrollment.
    async fn cancel(&self, tenant_id: Uuid) -> Result<Option<AutopayEnrollment>, DatabaseError>;
}

#[async_trait]
pub trait TenantReader: Send + Sync {
    async fn billing_profile(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantBillingProfile>, DatabaseError>;
}

#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<SavedPaymentMethod>, DatabaseError>;

    /// Processor customer id from any saved method of the user.
    async fn find_customer_id(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError>;
}
