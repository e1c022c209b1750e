//! HTTP surface
//!
//! Handlers stay thin: decode the request, call a service, map the outcome.

pub mod autopay;
pub mod billing;
pub mod payments;
pub mod webhooks;

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use crate::database::repository::{EnrollmentStore, PaymentMethodStore, PaymentStore, TenantReader};
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::auth::AuthConfig;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::gateway::ProcessorGateway;
use crate::services::{
    AutopayService, BillingRunner, CheckoutService, ManualPaymentService, RefundService,
    WebhookReconciler,
};

/// Store handles the services are built from.
#[derive(Clone)]
pub struct Stores {
    pub payments: Arc<dyn PaymentStore>,
    pub enrollments: Arc<dyn EnrollmentStore>,
    pub tenants: Arc<dyn TenantReader>,
    pub methods: Arc<dyn PaymentMethodStore>,
}

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<dyn PaymentStore>,
    pub billing: Arc<BillingRunner>,
    pub reconciler: Arc<WebhookReconciler>,
    pub refunds: Arc<RefundService>,
    pub manual_payments: Arc<ManualPaymentService>,
    pub checkout: Arc<CheckoutService>,
    pub autopay: Arc<AutopayService>,
    pub health_checker: HealthChecker,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        stores: Stores,
        gateway: ProcessorGateway,
        auth: AuthConfig,
        health_checker: HealthChecker,
        max_concurrency: usize,
    ) -> Self {
        let billing = BillingRunner::new(
            stores.payments.clone(),
            stores.enrollments.clone(),
            stores.tenants.clone(),
            gateway.clone(),
        )
        .with_max_concurrency(max_concurrency);

        Self {
            billing: Arc::new(billing),
            reconciler: Arc::new(WebhookReconciler::new(
                stores.payments.clone(),
                gateway.clone(),
            )),
            refunds: Arc::new(RefundService::new(stores.payments.clone(), gateway.clone())),
            manual_payments: Arc::new(ManualPaymentService::new(
                stores.payments.clone(),
                stores.tenants.clone(),
            )),
            checkout: Arc::new(CheckoutService::new(
                stores.payments.clone(),
                stores.tenants.clone(),
                gateway,
            )),
            autopay: Arc::new(AutopayService::new(
                stores.enrollments,
                stores.tenants,
                stores.methods,
            )),
            payments: stores.payments,
            health_checker,
            auth,
        }
    }
}

impl FromRef<AppState> for AuthConfig {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/api/billing/run", post(billing::run_billing))
        .route("/api/payments/checkout", post(payments::checkout))
        .route("/api/payments/{id}", get(payments::get_payment))
        .route("/api/admin/payments/refund", post(payments::refund_payment))
        .route("/api/admin/payments/manual", post(payments::record_manual_payment))
        .route("/api/admin/payments/{id}", delete(payments::delete_payment))
        .route("/api/autopay", get(autopay::get_enrollment))
        .route("/api/autopay/enroll", post(autopay::enroll))
        .route("/api/autopay/cancel", post(autopay::cancel))
        .route("/webhooks/processor", post(webhooks::processor_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("Health check failed - service unhealthy");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks every dependency
async fn readiness(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    let result = health(State(state)).await;
    if result.is_ok() {
        info!("Readiness check passed");
    }
    result
}

/// Liveness probe - the process is serving requests
async fn liveness() -> &'static str {
    "OK"
}
