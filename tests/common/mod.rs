//! Shared fixtures: in-memory stores, a scripted processor and signed webhook
//! payloads.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use rentledger_backend::config::ProcessorConfig;
use rentledger_backend::database::error::DatabaseError;
use rentledger_backend::database::memory::{
    InMemoryEnrollmentStore, InMemoryPaymentMethodStore, InMemoryPaymentStore,
    InMemoryTenantReader,
};
use rentledger_backend::database::payment_method_repository::SavedPaymentMethod;
use rentledger_backend::database::payment_repository::{NewPayment, Payment};
use rentledger_backend::database::repository::{
    CompletionDetails, InsertOutcome, PaymentStore, TransitionOutcome,
};
use rentledger_backend::database::tenant_repository::TenantBillingProfile;
use rentledger_backend::payments::error::{PaymentError, PaymentResult};
use rentledger_backend::payments::provider::PaymentProcessor;
use rentledger_backend::payments::types::{
    BillingPeriod, CreateCustomerRequest, CreateIntentRequest, IntentStatus, PaymentIntent,
    ProcessorEvent, ProcessorRefund, RefundRequest,
};
use rentledger_backend::payments::utils::signature_header;
use rentledger_backend::payments::{ProcessorGateway, StripeProcessor};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn march_2025() -> BillingPeriod {
    BillingPeriod::month_of(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
}

/// Records every call; intents for customers in `failing_customers` fail.
pub struct ScriptedProcessor {
    pub intents: Mutex<Vec<CreateIntentRequest>>,
    pub refunds: Mutex<Vec<RefundRequest>>,
    pub customers_created: AtomicUsize,
    failing_customers: Mutex<HashSet<String>>,
    fail_refunds: Mutex<bool>,
    counter: AtomicUsize,
    webhooks: StripeProcessor,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        let webhooks = StripeProcessor::new(ProcessorConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            ..ProcessorConfig::default()
        })
        .unwrap();
        Self {
            intents: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
            customers_created: AtomicUsize::new(0),
            failing_customers: Mutex::new(HashSet::new()),
            fail_refunds: Mutex::new(false),
            counter: AtomicUsize::new(0),
            webhooks,
        }
    }

    pub fn fail_intents_for(&self, customer_id: &str) {
        self.failing_customers
            .lock()
            .unwrap()
            .insert(customer_id.to_string());
    }

    pub fn fail_refunds(&self) {
        *self.fail_refunds.lock().unwrap() = true;
    }

    pub fn intent_count(&self) -> usize {
        self.intents.lock().unwrap().len()
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn create_customer(&self, request: CreateCustomerRequest) -> PaymentResult<String> {
        self.customers_created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("cus_{}", request.user_id))
    }

    async fn create_intent(&self, request: CreateIntentRequest) -> PaymentResult<PaymentIntent> {
        if self
            .failing_customers
            .lock()
            .unwrap()
            .contains(&request.customer_id)
        {
            return Err(PaymentError::PaymentDeclinedError {
                message: "Your card was declined.".to_string(),
                provider_code: Some("card_declined".to_string()),
            });
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let intent = PaymentIntent {
            id: format!("pi_{}", n),
            status: if request.off_session {
                IntentStatus::Processing
            } else {
                IntentStatus::RequiresConfirmation
            },
            amount_minor: request.amount_minor,
            client_secret: Some(format!("pi_{}_secret", n)),
            latest_charge: None,
        };
        self.intents.lock().unwrap().push(request);
        Ok(intent)
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<ProcessorRefund> {
        if *self.fail_refunds.lock().unwrap() {
            return Err(PaymentError::processor("refund unavailable", true));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let refund = ProcessorRefund {
            id: format!("re_{}", n),
            amount_minor: request.amount_minor.unwrap_or(0),
            status: "succeeded".to_string(),
        };
        self.refunds.lock().unwrap().push(request);
        Ok(refund)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> PaymentResult<()> {
        self.webhooks.verify_webhook(payload, signature)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<ProcessorEvent> {
        self.webhooks.parse_webhook_event(payload)
    }
}

pub struct TenantFixture {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub method_id: Uuid,
    pub customer_id: String,
}

pub struct Harness {
    pub payments: Arc<InMemoryPaymentStore>,
    pub enrollments: Arc<InMemoryEnrollmentStore>,
    pub tenants: Arc<InMemoryTenantReader>,
    pub methods: Arc<InMemoryPaymentMethodStore>,
    pub processor: Arc<ScriptedProcessor>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentStore::new()),
            enrollments: Arc::new(InMemoryEnrollmentStore::new()),
            tenants: Arc::new(InMemoryTenantReader::new()),
            methods: Arc::new(InMemoryPaymentMethodStore::new()),
            processor: Arc::new(ScriptedProcessor::new()),
        }
    }

    pub fn gateway(&self) -> ProcessorGateway {
        ProcessorGateway::new(self.processor.clone(), self.methods.clone(), "usd")
    }

    /// Tenant with a saved bank account.
    pub async fn add_tenant(&self, base_rent: &str) -> TenantFixture {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let property_id = Uuid::new_v4();
        let method_id = Uuid::new_v4();
        let customer_id = format!("cus_saved_{}", &tenant_id.simple().to_string()[..8]);

        self.tenants
            .upsert(TenantBillingProfile {
                tenant_id,
                user_id,
                property_id,
                base_rent: dec(base_rent),
                email: format!("{}@example.com", tenant_id),
                full_name: "Test Tenant".to_string(),
            })
            .await;
        self.methods
            .upsert(SavedPaymentMethod {
                id: method_id,
                user_id,
                processor_customer_id: customer_id.clone(),
                processor_method_token: format!("pm_{}", &method_id.simple().to_string()[..8]),
                method_type: "bank".to_string(),
                last4: Some("6789".to_string()),
                created_at: Utc::now(),
            })
            .await;

        TenantFixture {
            tenant_id,
            user_id,
            property_id,
            method_id,
            customer_id,
        }
    }

    /// Tenant enrolled in autopay with `discount`.
    pub async fn add_enrolled_tenant(&self, base_rent: &str, discount: &str) -> TenantFixture {
        use rentledger_backend::database::repository::EnrollmentStore;

        let tenant = self.add_tenant(base_rent).await;
        self.enrollments
            .upsert_active(tenant.tenant_id, tenant.method_id, &dec(discount))
            .await
            .unwrap();
        tenant
    }

    /// Inserts a processor-collected payment already in `completed`.
    pub async fn completed_payment(&self, tenant: &TenantFixture, amount: &str) -> Payment {
        let payment = self.pending_payment(tenant, amount, Some(march_2025())).await;
        self.payments
            .mark_processing(payment.id, &format!("pi_done_{}", payment.id.simple()))
            .await
            .unwrap();
        match self
            .payments
            .mark_completed(
                payment.id,
                CompletionDetails {
                    intent_id: None,
                    charge_id: Some(format!("ch_{}", payment.id.simple())),
                    fee_amount: None,
                    paid_at: Utc::now(),
                },
            )
            .await
            .unwrap()
        {
            TransitionOutcome::Applied { payment, .. } => payment,
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    pub async fn pending_payment(
        &self,
        tenant: &TenantFixture,
        amount: &str,
        period: Option<BillingPeriod>,
    ) -> Payment {
        use rentledger_backend::payments::types::{PaymentMethodType, PaymentStatus, PaymentType};

        let outcome = self
            .payments
            .insert(NewPayment {
                tenant_id: tenant.tenant_id,
                property_id: tenant.property_id,
                amount: dec(amount),
                payment_type: PaymentType::Rent,
                payment_method: PaymentMethodType::ProcessorBank,
                status: PaymentStatus::Pending,
                period,
                due_date: period.map_or_else(|| Utc::now().date_naive(), |p| p.start),
                is_autopay: false,
                recorded_by: None,
                payment_date: None,
                notes: None,
            })
            .await
            .unwrap();
        match outcome {
            InsertOutcome::Inserted(payment) => payment,
            InsertOutcome::Duplicate => panic!("period already occupied"),
        }
    }
}

/// Builds a processor event body.
pub fn event_body(event_type: &str, object: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": object }
    }))
    .unwrap()
}

pub fn sign(body: &[u8]) -> String {
    signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), body)
}

/// Delegates to the in-memory store but fails every `mark_refunded`.
pub struct RefundWriteFailingStore {
    pub inner: Arc<InMemoryPaymentStore>,
}

#[async_trait]
impl PaymentStore for RefundWriteFailingStore {
    async fn insert(&self, payment: NewPayment) -> Result<InsertOutcome, DatabaseError> {
        self.inner.insert(payment).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>, DatabaseError> {
        self.inner.find_by_intent_id(intent_id).await
    }

    async fn find_by_charge_id(&self, charge_id: &str) -> Result<Option<Payment>, DatabaseError> {
        self.inner.find_by_charge_id(charge_id).await
    }

    async fn find_active_for_period(
        &self,
        tenant_id: Uuid,
        period: &BillingPeriod,
    ) -> Result<Option<Payment>, DatabaseError> {
        self.inner.find_active_for_period(tenant_id, period).await
    }

    async fn mark_processing(
        &self,
        id: Uuid,
        intent_id: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        self.inner.mark_processing(id, intent_id).await
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        details: CompletionDetails,
    ) -> Result<TransitionOutcome, DatabaseError> {
        self.inner.mark_completed(id, details).await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        intent_id: Option<&str>,
        note: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        self.inner.mark_failed(id, intent_id, note).await
    }

    async fn mark_refunded(
        &self,
        _id: Uuid,
        _note: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        Err(DatabaseError::unknown("connection reset by peer"))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.inner.delete(id).await
    }
}
