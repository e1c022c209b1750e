use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CreateCustomerRequest, CreateIntentRequest, PaymentIntent, ProcessorEvent, ProcessorRefund,
    RefundRequest,
};
use async_trait::async_trait;

/// Remote payment processor. Implementations own transport, auth and wire
/// formats; callers see only domain types.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Returns the new customer id.
    async fn create_customer(&self, request: CreateCustomerRequest) -> PaymentResult<String>;

    async fn create_intent(&self, request: CreateIntentRequest) -> PaymentResult<PaymentIntent>;

    async fn refund(&self, request: RefundRequest) -> PaymentResult<ProcessorRefund>;

    fn name(&self) -> &'static str;

    /// Must run before any parsing of `payload`.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> PaymentResult<()>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<ProcessorEvent>;
}
