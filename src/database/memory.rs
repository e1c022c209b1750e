//! In-memory store implementations.
//!
//! Used when the service runs with `SKIP_EXTERNALS=true` and by tests. They
//! enforce the same duplicate-period and transition rules as Postgres: each
//! operation holds the map lock for its whole check-and-write.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::database::enrollment_repository::AutopayEnrollment;
use crate::database::error::DatabaseError;
use crate::database::payment_method_repository::SavedPaymentMethod;
use crate::database::payment_repository::{NewPayment, Payment};
use crate::database::repository::{
    CompletionDetails, EnrollmentStore, InsertOutcome, PaymentMethodStore, PaymentStore,
    TenantReader, TransitionOutcome,
};
use crate::database::tenant_repository::TenantBillingProfile;
use crate::payments::types::{BillingPeriod, PaymentStatus};

fn append_note(notes: &mut Option<String>, note: &str) {
    match notes {
        Some(existing) if !existing.is_empty() => {
            existing.push('\n');
            existing.push_str(note);
        }
        _ => *notes = Some(note.to_string()),
    }
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Default)]
pub struct InMemoryPaymentStore {
    payments: Mutex<HashMap<Uuid, Payment>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self.payments.lock().await.values().cloned().collect();
        payments.sort_by_key(|p| p.created_at);
        payments
    }

    async fn transition<F>(
        &self,
        id: Uuid,
        target: PaymentStatus,
        apply: F,
    ) -> Result<TransitionOutcome, DatabaseError>
    where
        F: FnOnce(&mut Payment) + Send,
    {
        let mut payments = self.payments.lock().await;
        let Some(payment) = payments.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        let previous = payment.status;
        if !previous.can_transition_to(target) {
            return Ok(TransitionOutcome::Rejected {
                payment: payment.clone(),
            });
        }
        apply(payment);
        payment.status = target;
        payment.updated_at = Utc::now();
        Ok(TransitionOutcome::Applied {
            payment: payment.clone(),
            previous,
        })
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, new_payment: NewPayment) -> Result<InsertOutcome, DatabaseError> {
        if new_payment.amount <= BigDecimal::from(0) {
            return Err(DatabaseError::new(
                crate::database::error::DatabaseErrorKind::CheckViolation {
                    constraint: Some("payments_amount_positive".to_string()),
                },
            ));
        }

        let mut payments = self.payments.lock().await;
        if let Some(period) = new_payment.period {
            let taken = new_payment.status.is_active()
                && payments.values().any(|p| {
                    p.tenant_id == new_payment.tenant_id
                        && p.period() == Some(period)
                        && p.status.is_active()
                });
            if taken {
                return Ok(InsertOutcome::Duplicate);
            }
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            tenant_id: new_payment.tenant_id,
            property_id: new_payment.property_id,
            amount: new_payment.amount,
            payment_type: new_payment.payment_type,
            payment_method: new_payment.payment_method,
            status: new_payment.status,
            period_start: new_payment.period.map(|p| p.start),
            period_end: new_payment.period.map(|p| p.end),
            due_date: new_payment.due_date,
            processor_intent_id: None,
            processor_charge_id: None,
            processor_fee_amount: None,
            is_autopay: new_payment.is_autopay,
            recorded_by: new_payment.recorded_by,
            payment_date: new_payment.payment_date,
            notes: new_payment.notes,
            created_at: now,
            updated_at: now,
        };
        payments.insert(payment.id, payment.clone());
        Ok(InsertOutcome::Inserted(payment))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.payments.lock().await.get(&id).cloned())
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .payments
            .lock()
            .await
            .values()
            .find(|p| p.processor_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn find_by_charge_id(&self, charge_id: &str) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .payments
            .lock()
            .await
            .values()
            .find(|p| p.processor_charge_id.as_deref() == Some(charge_id))
            .cloned())
    }

    async fn find_active_for_period(
        &self,
        tenant_id: Uuid,
        period: &BillingPeriod,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .payments
            .lock()
            .await
            .values()
            .find(|p| {
                p.tenant_id == tenant_id && p.period() == Some(*period) && p.status.is_active()
            })
            .cloned())
    }

    async fn mark_processing(
        &self,
        id: Uuid,
        intent_id: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let intent_id = intent_id.to_string();
        self.transition(id, PaymentStatus::Processing, move |p| {
            p.processor_intent_id.get_or_insert(intent_id);
        })
        .await
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        details: CompletionDetails,
    ) -> Result<TransitionOutcome, DatabaseError> {
        self.transition(id, PaymentStatus::Completed, move |p| {
            if p.processor_intent_id.is_none() {
                p.processor_intent_id = details.intent_id;
            }
            if details.charge_id.is_some() {
                p.processor_charge_id = details.charge_id;
            }
            if details.fee_amount.is_some() {
                p.processor_fee_amount = details.fee_amount;
            }
            p.payment_date = Some(details.paid_at);
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        intent_id: Option<&str>,
        note: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let intent_id = intent_id.map(str::to_string);
        let note = note.to_string();
        self.transition(id, PaymentStatus::Failed, move |p| {
            if p.processor_intent_id.is_none() {
                p.processor_intent_id = intent_id;
            }
            append_note(&mut p.notes, &note);
        })
        .await
    }

    async fn mark_refunded(
        &self,
        id: Uuid,
        note: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let note = note.to_string();
        self.transition(id, PaymentStatus::Refunded, move |p| {
            append_note(&mut p.notes, &note);
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.payments.lock().await.remove(&id).is_some())
    }
}

// ============================================================================
// Autopay enrollments
// ============================================================================

#[derive(Default)]
pub struct InMemoryEnrollmentStore {
    enrollments: Mutex<HashMap<Uuid, AutopayEnrollment>>,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enrollments(enrollments: Vec<AutopayEnrollment>) -> Self {
        Self {
            enrollments: Mutex::new(
                enrollments
                    .into_iter()
                    .map(|e| (e.tenant_id, e))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn list_active(&self) -> Result<Vec<AutopayEnrollment>, DatabaseError> {
        let mut active: Vec<AutopayEnrollment> = self
            .enrollments
            .lock()
            .await
            .values()
            .filter(|e| e.is_billable())
            .cloned()
            .collect();
        active.sort_by_key(|e| e.enrolled_at);
        Ok(active)
    }

    async fn find_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<AutopayEnrollment>, DatabaseError> {
        Ok(self.enrollments.lock().await.get(&tenant_id).cloned())
    }

    async fn upsert_active(
        &self,
        tenant_id: Uuid,
        payment_method_id: Uuid,
        discount_amount: &BigDecimal,
    ) -> Result<AutopayEnrollment, DatabaseError> {
        let now = Utc::now();
        let mut enrollments = self.enrollments.lock().await;
        let enrollment = enrollments
            .entry(tenant_id)
            .and_modify(|e| {
                e.payment_method_id = payment_method_id;
                e.discount_amount = discount_amount.clone();
                e.is_active = true;
                e.cancelled_at = None;
                e.updated_at = now;
            })
            .or_insert_with(|| AutopayEnrollment {
                id: Uuid::new_v4(),
                tenant_id,
                payment_method_id,
                is_active: true,
                discount_amount: discount_amount.clone(),
                enrolled_at: now,
                cancelled_at: None,
                updated_at: now,
            });
        Ok(enrollment.clone())
    }

    async fn cancel(&self, tenant_id: Uuid) -> Result<Option<AutopayEnrollment>, DatabaseError> {
        let mut enrollments = self.enrollments.lock().await;
        match enrollments.get_mut(&tenant_id) {
            Some(enrollment) if enrollment.is_billable() => {
                let now: DateTime<Utc> = Utc::now();
                enrollment.is_active = false;
                enrollment.cancelled_at = Some(now);
                enrollment.updated_at = now;
                Ok(Some(enrollment.clone()))
            }
            _ => Ok(None),
        }
    }
}

// ============================================================================
// Read-only collaborators
// ============================================================================

#[derive(Default)]
pub struct InMemoryTenantReader {
    profiles: Mutex<HashMap<Uuid, TenantBillingProfile>>,
}

impl InMemoryTenantReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<TenantBillingProfile>) -> Self {
        Self {
            profiles: Mutex::new(profiles.into_iter().map(|p| (p.tenant_id, p)).collect()),
        }
    }

    pub async fn upsert(&self, profile: TenantBillingProfile) {
        self.profiles.lock().await.insert(profile.tenant_id, profile);
    }
}

#[async_trait]
impl TenantReader for InMemoryTenantReader {
    async fn billing_profile(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantBillingProfile>, DatabaseError> {
        Ok(self.profiles.lock().await.get(&tenant_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentMethodStore {
    methods: Mutex<HashMap<Uuid, SavedPaymentMethod>>,
}

impl InMemoryPaymentMethodStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_methods(methods: Vec<SavedPaymentMethod>) -> Self {
        Self {
            methods: Mutex::new(methods.into_iter().map(|m| (m.id, m)).collect()),
        }
    }

    pub async fn upsert(&self, method: SavedPaymentMethod) {
        self.methods.lock().await.insert(method.id, method);
    }
}

#[async_trait]
impl PaymentMethodStore for InMemoryPaymentMethodStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<SavedPaymentMethod>, DatabaseError> {
        Ok(self.methods.lock().await.get(&id).cloned())
    }

    async fn find_customer_id(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .methods
            .lock()
            .await
            .values()
            .filter(|m| m.user_id == user_id && !m.processor_customer_id.is_empty())
            .max_by_key(|m| m.created_at)
            .map(|m| m.processor_customer_id.clone()))
    }
}
