//! Router-level tests over in-memory stores.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{event_body, sign, Harness, RefundWriteFailingStore};
use rentledger_backend::api::{router, AppState, Stores};
use rentledger_backend::database::repository::PaymentStore;
use rentledger_backend::health::HealthChecker;
use rentledger_backend::middleware::auth::AuthConfig;
use rentledger_backend::payments::types::PaymentStatus;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const CRON_SECRET: &str = "cron-secret";
const ADMIN_TOKEN: &str = "admin-token";

fn app_with(h: &Harness, payments: Arc<dyn PaymentStore>) -> Router {
    let stores = Stores {
        payments,
        enrollments: h.enrollments.clone(),
        tenants: h.tenants.clone(),
        methods: h.methods.clone(),
    };
    let state = AppState::new(
        stores,
        h.gateway(),
        AuthConfig {
            cron_secret: CRON_SECRET.to_string(),
            admin_token: ADMIN_TOKEN.to_string(),
        },
        HealthChecker::new(None, true),
        2,
    );
    router(state)
}

fn app(h: &Harness) -> Router {
    app_with(h, h.payments.clone())
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn admin_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
        .header("x-admin-id", Uuid::new_v4().to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn liveness_and_health_respond() {
    let h = Harness::new();

    let response = app(&h)
        .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let response = app(&h)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn billing_run_requires_cron_secret() {
    let h = Harness::new();
    h.add_enrolled_tenant("1200.00", "0").await;

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/billing/run")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "UNAUTHORIZED");
    assert_eq!(h.processor.intent_count(), 0);
}

#[tokio::test]
async fn billing_run_returns_summary() {
    let h = Harness::new();
    h.add_enrolled_tenant("1200.00", "0").await;
    h.add_enrolled_tenant("800.00", "800.00").await;

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/billing/run")
                .header(header::AUTHORIZATION, format!("Bearer {}", CRON_SECRET))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "period_start": "2025-03-10" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let summary = json_body(response).await;
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["successful"], 1);
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["period_start"], "2025-03-01");
    assert_eq!(summary["period_end"], "2025-03-31");
}

#[tokio::test]
async fn webhook_requires_a_valid_signature() {
    let h = Harness::new();
    let body = event_body("payment_intent.succeeded", json!({ "id": "pi_1" }));

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/processor")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/processor")
                .header("stripe-signature", "t=1,v1=deadbeef")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "SIGNATURE_INVALID");
}

#[tokio::test]
async fn signed_webhook_is_acknowledged() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h
        .pending_payment(&tenant, "1200.00", Some(common::march_2025()))
        .await;
    h.payments.mark_processing(payment.id, "pi_http").await.unwrap();

    let body = event_body("payment_intent.succeeded", json!({ "id": "pi_http" }));
    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/processor")
                .header("stripe-signature", sign(&body))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["received"], true);
    assert_eq!(json["result"]["outcome"], "applied");
    assert_eq!(json["result"]["status"], "completed");

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn refund_with_failed_ledger_write_is_multi_status() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.completed_payment(&tenant, "1200.00").await;
    let failing = Arc::new(RefundWriteFailingStore {
        inner: h.payments.clone(),
    });

    let response = app_with(&h, failing)
        .oneshot(admin_post(
            "/api/admin/payments/refund",
            json!({ "payment_id": payment.id, "reason": "requested_by_customer" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);

    let json = json_body(response).await;
    assert_eq!(json["status"], "partial_success");
    assert_eq!(json["error_code"], "LEDGER_INCONSISTENCY");
    assert_eq!(json["payment_id"], payment.id.to_string());
    assert!(json["refund_id"].as_str().unwrap().starts_with("re_"));
}

#[tokio::test]
async fn admin_routes_require_identity() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/payments/refund")
                .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "payment_id": Uuid::new_v4() }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn manual_payment_then_delete() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;

    let response = app(&h)
        .oneshot(admin_post(
            "/api/admin/payments/manual",
            json!({
                "tenant_id": tenant.tenant_id,
                "amount": "1200.00",
                "payment_method": "money_order",
                "payment_date": "2025-03-04",
                "period_start": "2025-03-01",
                "period_end": "2025-03-31"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["status"], "completed");
    assert_eq!(created["payment_type"], "rent");
    let id = created["id"].as_str().unwrap().to_string();

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/admin/payments/{}", id))
            .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
            .header("x-admin-id", Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap()
    };
    let response = app(&h).oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.payments.all().await.is_empty());

    let response = app(&h).oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn checkout_returns_client_secret() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/checkout")
                .header("x-tenant-id", tenant.tenant_id.to_string())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "payment_method_id": tenant.method_id }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["payment"]["status"], "processing");
    assert_eq!(json["payment"]["amount"], "1200.00");
    assert_eq!(json["estimated_fee"], "5.00");
    let intent_id = json["intent_id"].as_str().unwrap();
    assert_eq!(json["client_secret"], format!("{}_secret", intent_id));
}
