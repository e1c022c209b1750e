use crate::payments::error::PaymentError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

fn unsupported(field: &str, value: &str) -> PaymentError {
    PaymentError::ValidationError {
        message: format!("unsupported {}: {}", field.replace('_', " "), value),
        field: Some(field.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Payment lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Allowed forward moves. `processing -> processing` is the same-state
    /// confirmation a re-delivered processing event produces.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Refunded)
        )
    }

    /// Every status a row may be in for a conditional write to `target`.
    pub fn allowed_sources(target: PaymentStatus) -> Vec<PaymentStatus> {
        PaymentStatus::all()
            .into_iter()
            .filter(|from| from.can_transition_to(target))
            .collect()
    }

    /// Statuses that occupy a tenant's billing period.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Completed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    pub fn all() -> [PaymentStatus; 5] {
        [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ]
    }

    pub fn active() -> [PaymentStatus; 3] {
        [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Completed,
        ]
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(unsupported("payment_status", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Rent,
    LateFee,
    Other,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Rent => "rent",
            PaymentType::LateFee => "late_fee",
            PaymentType::Other => "other",
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "rent" => Ok(PaymentType::Rent),
            "late_fee" => Ok(PaymentType::LateFee),
            "other" => Ok(PaymentType::Other),
            _ => Err(unsupported("payment_type", value)),
        }
    }
}

/// How a ledger row was (or will be) paid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    ProcessorBank,
    ProcessorCard,
    Check,
    Cash,
    MoneyOrder,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodType::ProcessorBank => "processor_bank",
            PaymentMethodType::ProcessorCard => "processor_card",
            PaymentMethodType::Check => "check",
            PaymentMethodType::Cash => "cash",
            PaymentMethodType::MoneyOrder => "money_order",
        }
    }

    pub fn is_processor_owned(&self) -> bool {
        matches!(
            self,
            PaymentMethodType::ProcessorBank | PaymentMethodType::ProcessorCard
        )
    }

    pub fn is_manual(&self) -> bool {
        !self.is_processor_owned()
    }
}

impl From<PaymentMethodKind> for PaymentMethodType {
    fn from(kind: PaymentMethodKind) -> Self {
        match kind {
            PaymentMethodKind::Bank => PaymentMethodType::ProcessorBank,
            PaymentMethodKind::Card => PaymentMethodType::ProcessorCard,
        }
    }
}

impl std::fmt::Display for PaymentMethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethodType {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "processor_bank" => Ok(PaymentMethodType::ProcessorBank),
            "processor_card" => Ok(PaymentMethodType::ProcessorCard),
            "check" => Ok(PaymentMethodType::Check),
            "cash" => Ok(PaymentMethodType::Cash),
            "money_order" => Ok(PaymentMethodType::MoneyOrder),
            _ => Err(unsupported("payment_method", value)),
        }
    }
}

/// Instrument type of a saved processor payment method.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    Bank,
    Card,
}

impl PaymentMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodKind::Bank => "bank",
            PaymentMethodKind::Card => "card",
        }
    }
}

impl FromStr for PaymentMethodKind {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "bank" | "us_bank_account" => Ok(PaymentMethodKind::Bank),
            "card" => Ok(PaymentMethodKind::Card),
            _ => Err(unsupported("method_type", value)),
        }
    }
}

// ---------------------------------------------------------------------------
// Billing period
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PaymentError> {
        if start > end {
            return Err(PaymentError::ValidationError {
                message: "period_start must be on or before period_end".to_string(),
                field: Some("period_start".to_string()),
            });
        }
        Ok(Self { start, end })
    }

    /// The calendar month containing `date`.
    pub fn month_of(date: NaiveDate) -> Self {
        let start = date.with_day(1).unwrap_or(date);
        let next_month = if start.month() == 12 {
            NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
        };
        let end = next_month
            .and_then(|next| next.pred_opt())
            .unwrap_or(start);
        Self { start, end }
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Processor objects
// ---------------------------------------------------------------------------

pub type IntentMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateIntentRequest {
    pub customer_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub payment_method_token: Option<String>,
    pub metadata: IntentMetadata,
    /// Off-session intents are confirmed immediately with the saved method.
    pub off_session: bool,
    pub idempotency_key: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateCustomerRequest {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundRequest {
    pub intent_id: String,
    /// Full refund when absent.
    pub amount_minor: Option<i64>,
    pub reason: Option<String>,
    pub metadata: IntentMetadata,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub amount_minor: i64,
    pub client_secret: Option<String>,
    pub latest_charge: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorRefund {
    pub id: String,
    pub amount_minor: i64,
    pub status: String,
}

/// A verified, decoded processor webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorEvent {
    pub id: String,
    pub kind: ProcessorEventKind,
}

impl ProcessorEvent {
    pub fn event_type(&self) -> &str {
        self.kind.event_type()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEventKind {
    IntentSucceeded {
        intent_id: String,
        charge_id: Option<String>,
        fee_minor: Option<i64>,
        payment_id: Option<String>,
    },
    IntentFailed {
        intent_id: String,
        failure_message: Option<String>,
        payment_id: Option<String>,
    },
    IntentProcessing {
        intent_id: String,
        payment_id: Option<String>,
    },
    ChargeRefunded {
        charge_id: String,
        intent_id: Option<String>,
        reason: Option<String>,
    },
    Unknown(String),
}

impl ProcessorEventKind {
    pub fn event_type(&self) -> &str {
        match self {
            ProcessorEventKind::IntentSucceeded { .. } => "payment_intent.succeeded",
            ProcessorEventKind::IntentFailed { .. } => "payment_intent.payment_failed",
            ProcessorEventKind::IntentProcessing { .. } => "payment_intent.processing",
            ProcessorEventKind::ChargeRefunded { .. } => "charge.refunded",
            ProcessorEventKind::Unknown(event_type) => event_type,
        }
    }
}
