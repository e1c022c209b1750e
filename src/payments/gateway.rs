//! Processor Gateway: the only path from services to the remote processor.
//!
//! Converts ledger amounts to minor units, resolves processor customers from
//! saved payment methods and verifies webhooks before decoding them.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::payment_method_repository::SavedPaymentMethod;
use crate::database::repository::PaymentMethodStore;
use crate::error::AppError;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::money::to_minor_units;
use crate::payments::provider::PaymentProcessor;
use crate::payments::types::{
    CreateCustomerRequest, CreateIntentRequest, IntentMetadata, PaymentIntent, ProcessorEvent,
    ProcessorRefund, RefundRequest,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("processor error: {0}")]
    Processor(#[from] PaymentError),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Database(e) => e.into(),
            GatewayError::Processor(e) => e.into(),
        }
    }
}

/// Parameters for a charge intent, in ledger (major) units.
#[derive(Debug, Clone)]
pub struct IntentParams<'a> {
    pub customer_id: &'a str,
    pub amount: &'a BigDecimal,
    pub payment_method_token: Option<&'a str>,
    pub metadata: IntentMetadata,
    pub off_session: bool,
    pub idempotency_key: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct ProcessorGateway {
    processor: Arc<dyn PaymentProcessor>,
    methods: Arc<dyn PaymentMethodStore>,
    currency: String,
}

impl ProcessorGateway {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        methods: Arc<dyn PaymentMethodStore>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            processor,
            methods,
            currency: currency.into(),
        }
    }

    pub fn processor_name(&self) -> &'static str {
        self.processor.name()
    }

    pub async fn find_payment_method(
        &self,
        id: Uuid,
    ) -> Result<Option<SavedPaymentMethod>, DatabaseError> {
        self.methods.find_by_id(id).await
    }

    /// Reuses the customer id on any saved method of the user, otherwise
    /// creates a remote customer.
    #[instrument(skip(self, email, name), fields(user_id = %user_id))]
    pub async fn get_or_create_customer(
        &self,
        user_id: Uuid,
        email: &str,
        name: &str,
    ) -> Result<String, GatewayError> {
        if let Some(customer_id) = self.methods.find_customer_id(user_id).await? {
            return Ok(customer_id);
        }

        let customer_id = self
            .processor
            .create_customer(CreateCustomerRequest {
                user_id: user_id.to_string(),
                email: email.to_string(),
                name: name.to_string(),
            })
            .await?;
        info!(customer_id = %customer_id, "created processor customer");
        Ok(customer_id)
    }

    /// Only `off_session` intents are confirmed server-side; supplying a
    /// method token alone does not confirm.
    pub async fn create_intent(&self, params: IntentParams<'_>) -> PaymentResult<PaymentIntent> {
        let amount_minor = to_minor_units(params.amount)?;
        if amount_minor <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        self.processor
            .create_intent(CreateIntentRequest {
                customer_id: params.customer_id.to_string(),
                amount_minor,
                currency: self.currency.clone(),
                payment_method_token: params.payment_method_token.map(str::to_string),
                metadata: params.metadata,
                off_session: params.off_session,
                idempotency_key: params.idempotency_key,
                description: params.description,
            })
            .await
    }

    /// Full refund when `amount` is `None`.
    pub async fn refund(
        &self,
        intent_id: &str,
        amount: Option<&BigDecimal>,
        reason: Option<&str>,
        metadata: IntentMetadata,
        idempotency_key: Option<String>,
    ) -> PaymentResult<ProcessorRefund> {
        let amount_minor = amount.map(to_minor_units).transpose()?;
        self.processor
            .refund(RefundRequest {
                intent_id: intent_id.to_string(),
                amount_minor,
                reason: reason.map(str::to_string),
                metadata,
                idempotency_key,
            })
            .await
    }

    pub fn verify_and_decode_webhook(
        &self,
        raw: &[u8],
        signature_header: &str,
    ) -> PaymentResult<ProcessorEvent> {
        self.processor.verify_webhook(raw, signature_header)?;
        self.processor.parse_webhook_event(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryPaymentMethodStore;
    use crate::payments::types::{IntentStatus, ProcessorEventKind};
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProcessor {
        customers_created: AtomicUsize,
        intents: Mutex<Vec<CreateIntentRequest>>,
        parsed: AtomicUsize,
    }

    #[async_trait]
    impl PaymentProcessor for RecordingProcessor {
        async fn create_customer(&self, _request: CreateCustomerRequest) -> PaymentResult<String> {
            self.customers_created.fetch_add(1, Ordering::SeqCst);
            Ok("cus_new".to_string())
        }

        async fn create_intent(
            &self,
            request: CreateIntentRequest,
        ) -> PaymentResult<PaymentIntent> {
            let amount_minor = request.amount_minor;
            self.intents.lock().unwrap().push(request);
            Ok(PaymentIntent {
                id: "pi_1".to_string(),
                status: IntentStatus::Processing,
                amount_minor,
                client_secret: None,
                latest_charge: None,
            })
        }

        async fn refund(&self, request: RefundRequest) -> PaymentResult<ProcessorRefund> {
            Ok(ProcessorRefund {
                id: "re_1".to_string(),
                amount_minor: request.amount_minor.unwrap_or(-1),
                status: "succeeded".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "recording"
        }

        fn verify_webhook(&self, _payload: &[u8], signature: &str) -> PaymentResult<()> {
            if signature == "good" {
                Ok(())
            } else {
                Err(PaymentError::WebhookVerificationError {
                    message: "mismatch".to_string(),
                })
            }
        }

        fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<ProcessorEvent> {
            self.parsed.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessorEvent {
                id: "evt_1".to_string(),
                kind: ProcessorEventKind::Unknown("ping".to_string()),
            })
        }
    }

    fn saved_method(user_id: Uuid) -> SavedPaymentMethod {
        SavedPaymentMethod {
            id: Uuid::new_v4(),
            user_id,
            processor_customer_id: "cus_saved".to_string(),
            processor_method_token: "pm_saved".to_string(),
            method_type: "bank".to_string(),
            last4: Some("6789".to_string()),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn reuses_customer_from_saved_method() {
        let user_id = Uuid::new_v4();
        let processor = Arc::new(RecordingProcessor::default());
        let methods = Arc::new(InMemoryPaymentMethodStore::with_methods(vec![saved_method(
            user_id,
        )]));
        let gateway = ProcessorGateway::new(processor.clone(), methods, "usd");

        let customer = gateway
            .get_or_create_customer(user_id, "t@example.com", "Tenant")
            .await
            .unwrap();
        assert_eq!(customer, "cus_saved");
        assert_eq!(processor.customers_created.load(Ordering::SeqCst), 0);

        let other = gateway
            .get_or_create_customer(Uuid::new_v4(), "o@example.com", "Other")
            .await
            .unwrap();
        assert_eq!(other, "cus_new");
        assert_eq!(processor.customers_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn converts_amount_to_minor_units() {
        let processor = Arc::new(RecordingProcessor::default());
        let gateway = ProcessorGateway::new(
            processor.clone(),
            Arc::new(InMemoryPaymentMethodStore::new()),
            "usd",
        );

        let amount = BigDecimal::from_str("1175.00").unwrap();
        gateway
            .create_intent(IntentParams {
                customer_id: "cus_1",
                amount: &amount,
                payment_method_token: Some("pm_1"),
                metadata: IntentMetadata::new(),
                off_session: true,
                idempotency_key: Some("autopay-x".to_string()),
                description: None,
            })
            .await
            .unwrap();

        let intents = processor.intents.lock().unwrap();
        assert_eq!(intents[0].amount_minor, 117_500);
        assert_eq!(intents[0].currency, "usd");
    }

    #[tokio::test]
    async fn partial_refund_amount_is_converted() {
        let gateway = ProcessorGateway::new(
            Arc::new(RecordingProcessor::default()),
            Arc::new(InMemoryPaymentMethodStore::new()),
            "usd",
        );
        let amount = BigDecimal::from_str("100.50").unwrap();
        let refund = gateway
            .refund("pi_1", Some(&amount), None, IntentMetadata::new(), None)
            .await
            .unwrap();
        assert_eq!(refund.amount_minor, 10_050);
    }

    #[test]
    fn invalid_signature_stops_before_parsing() {
        let processor = Arc::new(RecordingProcessor::default());
        let gateway = ProcessorGateway::new(
            processor.clone(),
            Arc::new(InMemoryPaymentMethodStore::new()),
            "usd",
        );

        assert!(gateway.verify_and_decode_webhook(b"{}", "bad").is_err());
        assert_eq!(processor.parsed.load(Ordering::SeqCst), 0);

        assert!(gateway.verify_and_decode_webhook(b"{}", "good").is_ok());
        assert_eq!(processor.parsed.load(Ordering::SeqCst), 1);
    }
}
