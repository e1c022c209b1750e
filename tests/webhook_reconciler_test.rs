mod common;

use common::{dec, event_body, march_2025, sign, Harness};
use rentledger_backend::database::repository::PaymentStore;
use rentledger_backend::payments::types::PaymentStatus;
use rentledger_backend::services::{ReconcileError, ReconcileOutcome, WebhookReconciler};
use serde_json::json;

fn reconciler(h: &Harness) -> WebhookReconciler {
    WebhookReconciler::new(h.payments.clone(), h.gateway())
}

async fn deliver(r: &WebhookReconciler, body: &[u8]) -> Result<ReconcileOutcome, ReconcileError> {
    r.handle(body, &sign(body)).await
}

#[tokio::test]
async fn succeeded_event_completes_payment_and_replay_is_noop() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.pending_payment(&tenant, "1175.00", Some(march_2025())).await;
    h.payments.mark_processing(payment.id, "pi_abc").await.unwrap();

    let body = event_body(
        "payment_intent.succeeded",
        json!({
            "id": "pi_abc",
            "object": "payment_intent",
            "latest_charge": {
                "id": "ch_abc",
                "balance_transaction": { "fee": 960 }
            },
            "metadata": { "payment_id": payment.id.to_string() }
        }),
    );

    let r = reconciler(&h);
    let outcome = deliver(&r, &body).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            payment_id: payment.id,
            status: PaymentStatus::Completed
        }
    );

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert_eq!(stored.processor_charge_id.as_deref(), Some("ch_abc"));
    assert_eq!(stored.processor_fee_amount, Some(dec("9.60")));
    assert!(stored.payment_date.is_some());

    let replay = deliver(&r, &body).await.unwrap();
    assert_eq!(
        replay,
        ReconcileOutcome::NoOp {
            payment_id: payment.id,
            status: PaymentStatus::Completed
        }
    );
}

#[tokio::test]
async fn terminal_event_before_processing_is_applied_via_metadata() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.pending_payment(&tenant, "1200.00", Some(march_2025())).await;
    let r = reconciler(&h);

    let succeeded = event_body(
        "payment_intent.succeeded",
        json!({
            "id": "pi_early",
            "latest_charge": "ch_early",
            "metadata": { "payment_id": payment.id.to_string() }
        }),
    );
    let outcome = deliver(&r, &succeeded).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { status: PaymentStatus::Completed, .. }));

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.processor_intent_id.as_deref(), Some("pi_early"));

    // The late processing event must not move the payment backwards.
    let processing = event_body(
        "payment_intent.processing",
        json!({ "id": "pi_early", "metadata": { "payment_id": payment.id.to_string() } }),
    );
    let outcome = deliver(&r, &processing).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::NoOp {
            payment_id: payment.id,
            status: PaymentStatus::Completed
        }
    );
}

#[tokio::test]
async fn failure_after_success_leaves_payment_completed() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.completed_payment(&tenant, "1200.00").await;
    let intent_id = payment.processor_intent_id.clone().unwrap();

    let body = event_body(
        "payment_intent.payment_failed",
        json!({
            "id": intent_id,
            "last_payment_error": { "message": "insufficient funds" }
        }),
    );
    let outcome = deliver(&reconciler(&h), &body).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::NoOp { status: PaymentStatus::Completed, .. }));

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn success_for_a_failed_payment_is_reported_as_ledger_conflict() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.pending_payment(&tenant, "1200.00", Some(march_2025())).await;
    h.payments
        .mark_failed(payment.id, None, "Autopay charge failed: timed out")
        .await
        .unwrap();

    let body = event_body(
        "payment_intent.succeeded",
        json!({
            "id": "pi_late",
            "latest_charge": "ch_late",
            "metadata": { "payment_id": payment.id.to_string() }
        }),
    );
    let outcome = deliver(&reconciler(&h), &body).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::LedgerConflict {
            payment_id: payment.id,
            intent_id: "pi_late".to_string()
        }
    );

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert!(stored.processor_charge_id.is_none());
}

#[tokio::test]
async fn failed_event_records_reason() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.pending_payment(&tenant, "1200.00", Some(march_2025())).await;
    h.payments.mark_processing(payment.id, "pi_nsf").await.unwrap();

    let body = event_body(
        "payment_intent.payment_failed",
        json!({
            "id": "pi_nsf",
            "last_payment_error": { "message": "insufficient funds" }
        }),
    );
    let outcome = deliver(&reconciler(&h), &body).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { status: PaymentStatus::Failed, .. }));

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert!(stored.notes.unwrap().contains("insufficient funds"));
}

#[tokio::test]
async fn charge_refunded_moves_completed_to_refunded() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.completed_payment(&tenant, "1200.00").await;
    let charge_id = payment.processor_charge_id.clone().unwrap();

    let body = event_body(
        "charge.refunded",
        json!({
            "id": charge_id,
            "payment_intent": payment.processor_intent_id,
            "refunds": { "data": [ { "id": "re_1", "reason": "requested_by_customer" } ] }
        }),
    );
    let r = reconciler(&h);
    let outcome = deliver(&r, &body).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { status: PaymentStatus::Refunded, .. }));

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert!(stored.notes.unwrap().contains("requested_by_customer"));

    let replay = deliver(&r, &body).await.unwrap();
    assert!(matches!(replay, ReconcileOutcome::NoOp { status: PaymentStatus::Refunded, .. }));
}

#[tokio::test]
async fn unknown_payment_and_unknown_event_are_acknowledged() {
    let h = Harness::new();
    let r = reconciler(&h);

    let body = event_body("payment_intent.succeeded", json!({ "id": "pi_nobody" }));
    assert_eq!(
        deliver(&r, &body).await.unwrap(),
        ReconcileOutcome::PaymentNotFound {
            reference: "pi_nobody".to_string()
        }
    );

    let body = event_body("customer.created", json!({ "id": "cus_1" }));
    assert_eq!(
        deliver(&r, &body).await.unwrap(),
        ReconcileOutcome::Ignored {
            event_type: "customer.created".to_string()
        }
    );
}

#[tokio::test]
async fn metadata_never_relinks_a_payment_to_another_intent() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.pending_payment(&tenant, "1200.00", Some(march_2025())).await;
    h.payments.mark_processing(payment.id, "pi_real").await.unwrap();

    let body = event_body(
        "payment_intent.succeeded",
        json!({ "id": "pi_other", "metadata": { "payment_id": payment.id.to_string() } }),
    );
    let outcome = deliver(&reconciler(&h), &body).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::PaymentNotFound { .. }));

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Processing);
}

#[tokio::test]
async fn bad_signature_is_rejected_before_any_write() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.pending_payment(&tenant, "1200.00", Some(march_2025())).await;
    h.payments.mark_processing(payment.id, "pi_forged").await.unwrap();

    let body = event_body("payment_intent.succeeded", json!({ "id": "pi_forged" }));
    let forged = format!("t={},v1={}", chrono::Utc::now().timestamp(), "00".repeat(32));
    let err = reconciler(&h).handle(&body, &forged).await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidSignature(_)));

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Processing);
}
