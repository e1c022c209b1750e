use crate::config::ProcessorConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProcessor;
use crate::payments::types::{
    CreateCustomerRequest, CreateIntentRequest, IntentStatus, PaymentIntent, ProcessorEvent,
    ProcessorEventKind, ProcessorRefund, RefundRequest,
};
use crate::payments::utils::{verify_timestamped_signature, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info};

/// Refund reasons the processor accepts as a first-class field. Anything else
/// travels in metadata only.
const NATIVE_REFUND_REASONS: &[&str] = &["duplicate", "fraudulent", "requested_by_customer"];

pub struct StripeProcessor {
    config: ProcessorConfig,
    http: PaymentHttpClient,
}

impl StripeProcessor {
    pub fn new(config: ProcessorConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: Vec<(String, String)>,
        idempotency_key: Option<&str>,
    ) -> PaymentResult<T> {
        let headers: Vec<(&str, &str)> = idempotency_key
            .map(|key| vec![("Idempotency-Key", key)])
            .unwrap_or_default();
        self.http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint(path),
                Some(&self.config.secret_key),
                Some(&form),
                &headers,
            )
            .await
    }
}

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn metadata_params(metadata: &crate::payments::types::IntentMetadata) -> Vec<(String, String)> {
    metadata
        .iter()
        .map(|(k, v)| (format!("metadata[{}]", k), v.clone()))
        .collect()
}

pub(crate) fn intent_form(request: &CreateIntentRequest) -> Vec<(String, String)> {
    let mut form = vec![
        param("amount", request.amount_minor),
        param("currency", request.currency.to_lowercase()),
        param("customer", &request.customer_id),
    ];
    if let Some(token) = &request.payment_method_token {
        form.push(param("payment_method", token));
    }
    if let Some(description) = &request.description {
        form.push(param("description", description));
    }
    if request.off_session {
        form.push(param("confirm", "true"));
        form.push(param("off_session", "true"));
    } else {
        form.push(param("automatic_payment_methods[enabled]", "true"));
    }
    form.extend(metadata_params(&request.metadata));
    form
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_customer(&self, request: CreateCustomerRequest) -> PaymentResult<String> {
        if request.email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "customer email is required".to_string(),
                field: Some("email".to_string()),
            });
        }

        let form = vec![
            param("email", &request.email),
            param("name", &request.name),
            param("metadata[user_id]", &request.user_id),
        ];
        let idempotency_key = format!("customer-{}", request.user_id);
        let customer: StripeObject = self
            .post("/v1/customers", form, Some(&idempotency_key))
            .await?;

        info!(user_id = %request.user_id, customer_id = %customer.id, "processor customer created");
        Ok(customer.id)
    }

    async fn create_intent(&self, request: CreateIntentRequest) -> PaymentResult<PaymentIntent> {
        if request.amount_minor <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let intent: StripeIntent = self
            .post(
                "/v1/payment_intents",
                intent_form(&request),
                request.idempotency_key.as_deref(),
            )
            .await?;

        debug!(intent_id = %intent.id, status = ?intent.status, "payment intent created");
        Ok(PaymentIntent {
            latest_charge: intent.latest_charge.as_ref().and_then(object_id),
            id: intent.id,
            status: intent.status,
            amount_minor: intent.amount,
            client_secret: intent.client_secret,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<ProcessorRefund> {
        let mut form = vec![param("payment_intent", &request.intent_id)];
        if let Some(amount) = request.amount_minor {
            form.push(param("amount", amount));
        }
        if let Some(reason) = &request.reason {
            if NATIVE_REFUND_REASONS.contains(&reason.as_str()) {
                form.push(param("reason", reason));
            }
            form.push(param("metadata[reason]", reason));
        }
        form.extend(metadata_params(&request.metadata));

        let refund: StripeRefund = self
            .post("/v1/refunds", form, request.idempotency_key.as_deref())
            .await?;

        Ok(ProcessorRefund {
            id: refund.id,
            amount_minor: refund.amount,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "stripe"
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> PaymentResult<()> {
        if self.config.webhook_secret.is_empty() {
            return Err(PaymentError::WebhookVerificationError {
                message: "webhook secret is not configured".to_string(),
            });
        }
        verify_timestamped_signature(
            payload,
            signature,
            &self.config.webhook_secret,
            self.config.webhook_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<ProcessorEvent> {
        decode_event(payload)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: IntentStatus,
    amount: i64,
    client_secret: Option<String>,
    latest_charge: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    amount: i64,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: JsonValue,
}

/// An expandable field is either an id string or an object with `id`.
fn object_id(value: &JsonValue) -> Option<String> {
    value
        .as_str()
        .or_else(|| value.get("id").and_then(JsonValue::as_str))
        .map(str::to_string)
}

fn string_field(object: &JsonValue, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(JsonValue::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn metadata_payment_id(object: &JsonValue) -> Option<String> {
    object
        .get("metadata")
        .and_then(|m| string_field(m, "payment_id"))
}

/// `charges.data[0]` on intents that still carry the charge list.
fn first_listed_charge(object: &JsonValue) -> Option<&JsonValue> {
    object
        .get("charges")
        .and_then(|c| c.get("data"))
        .and_then(JsonValue::as_array)
        .and_then(|charges| charges.first())
}

/// Only present when `balance_transaction` is expanded.
fn charge_fee(charge: &JsonValue) -> Option<i64> {
    charge
        .get("balance_transaction")
        .and_then(|bt| bt.get("fee"))
        .and_then(JsonValue::as_i64)
}

fn required_id(object: &JsonValue, event_type: &str) -> PaymentResult<String> {
    string_field(object, "id").ok_or_else(|| PaymentError::WebhookPayloadError {
        message: format!("{} object has no id", event_type),
    })
}

/// Decodes a verified payload into the closed event set.
pub(crate) fn decode_event(payload: &[u8]) -> PaymentResult<ProcessorEvent> {
    let event: StripeEvent =
        serde_json::from_slice(payload).map_err(|e| PaymentError::WebhookPayloadError {
            message: format!("invalid event JSON: {}", e),
        })?;
    let object = &event.data.object;

    let kind = match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            let latest = object.get("latest_charge");
            let listed = first_listed_charge(object);
            ProcessorEventKind::IntentSucceeded {
                intent_id: required_id(object, &event.event_type)?,
                charge_id: latest
                    .and_then(object_id)
                    .or_else(|| listed.and_then(object_id)),
                fee_minor: latest
                    .and_then(charge_fee)
                    .or_else(|| listed.and_then(charge_fee)),
                payment_id: metadata_payment_id(object),
            }
        }
        "payment_intent.payment_failed" => ProcessorEventKind::IntentFailed {
            intent_id: required_id(object, &event.event_type)?,
            failure_message: object
                .get("last_payment_error")
                .and_then(|e| string_field(e, "message")),
            payment_id: metadata_payment_id(object),
        },
        "payment_intent.processing" => ProcessorEventKind::IntentProcessing {
            intent_id: required_id(object, &event.event_type)?,
            payment_id: metadata_payment_id(object),
        },
        "charge.refunded" => {
            let first_refund = object
                .get("refunds")
                .and_then(|r| r.get("data"))
                .and_then(JsonValue::as_array)
                .and_then(|refunds| refunds.first());
            ProcessorEventKind::ChargeRefunded {
                charge_id: required_id(object, &event.event_type)?,
                intent_id: object.get("payment_intent").and_then(object_id),
                reason: first_refund
                    .and_then(|r| {
                        r.get("metadata")
                            .and_then(|m| string_field(m, "reason"))
                            .or_else(|| string_field(r, "reason"))
                    }),
            }
        }
        other => ProcessorEventKind::Unknown(other.to_string()),
    };

    Ok(ProcessorEvent { id: event.id, kind })
}
