//! Services module for business logic

pub mod autopay;
pub mod billing_runner;
pub mod checkout;
pub mod manual_payment;
pub mod refund;
pub mod webhook_reconciler;

pub use autopay::AutopayService;
pub use billing_runner::{
    BillingRunSummary, BillingRunner, EnrollmentFailure, EnrollmentOutcome, SkipReason,
};
pub use checkout::{CheckoutCommand, CheckoutService, CheckoutSession};
pub use manual_payment::{ManualPaymentCommand, ManualPaymentService};
pub use refund::{RefundCommand, RefundOutcome, RefundService};
pub use webhook_reconciler::{ReconcileError, ReconcileOutcome, WebhookReconciler};
