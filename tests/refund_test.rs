mod common;

use chrono::NaiveDate;
use common::{dec, march_2025, Harness, RefundWriteFailingStore};
use rentledger_backend::database::repository::PaymentStore;
use rentledger_backend::error::ErrorCode;
use rentledger_backend::payments::types::{PaymentMethodType, PaymentStatus, PaymentType};
use rentledger_backend::services::{
    ManualPaymentCommand, ManualPaymentService, RefundCommand, RefundOutcome, RefundService,
};
use std::sync::Arc;
use uuid::Uuid;

fn service(h: &Harness) -> RefundService {
    RefundService::new(h.payments.clone(), h.gateway())
}

fn command(payment_id: Uuid, amount: Option<&str>) -> RefundCommand {
    RefundCommand {
        payment_id,
        amount: amount.map(dec),
        reason: Some("requested_by_customer".to_string()),
        admin_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn full_refund_marks_payment_and_second_attempt_conflicts() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.completed_payment(&tenant, "1200.00").await;

    let outcome = service(&h).refund(command(payment.id, None)).await.unwrap();
    match outcome {
        RefundOutcome::Refunded {
            refund_id,
            amount,
            payment: refunded,
        } => {
            assert!(refund_id.starts_with("re_"));
            assert_eq!(amount, dec("1200.00"));
            assert_eq!(refunded.status, PaymentStatus::Refunded);
            assert!(refunded.notes.unwrap().contains(&refund_id));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    {
        let refunds = h.processor.refunds.lock().unwrap();
        assert_eq!(refunds[0].amount_minor, Some(120_000));
        assert_eq!(refunds[0].intent_id, payment.processor_intent_id.clone().unwrap());
        let expected_key = format!("refund-{}-120000", payment.id);
        assert_eq!(refunds[0].idempotency_key.as_deref(), Some(expected_key.as_str()));
    }

    let err = service(&h).refund(command(payment.id, None)).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(err.error_code(), ErrorCode::AlreadyRefunded);
    assert_eq!(h.processor.refund_count(), 1);
}

#[tokio::test]
async fn partial_refund_uses_requested_amount() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.completed_payment(&tenant, "1200.00").await;

    let outcome = service(&h)
        .refund(command(payment.id, Some("200.005")))
        .await
        .unwrap();
    match outcome {
        RefundOutcome::Refunded { amount, .. } => assert_eq!(amount, dec("200.01")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    let refunds = h.processor.refunds.lock().unwrap();
    assert_eq!(refunds[0].amount_minor, Some(20_001));
    let expected_key = format!("refund-{}-20001", payment.id);
    assert_eq!(refunds[0].idempotency_key.as_deref(), Some(expected_key.as_str()));
}

#[tokio::test]
async fn amount_outside_original_is_rejected_before_the_processor() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.completed_payment(&tenant, "1200.00").await;

    for amount in ["1200.01", "1200.004", "0", "0.004", "-5"] {
        let err = service(&h)
            .refund(command(payment.id, Some(amount)))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400, "amount {}", amount);
        assert_eq!(err.error_code(), ErrorCode::InvalidAmount);
    }
    assert_eq!(h.processor.refund_count(), 0);
}

#[tokio::test]
async fn manual_payments_must_be_refunded_offline() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let manual = ManualPaymentService::new(h.payments.clone(), h.tenants.clone())
        .record(ManualPaymentCommand {
            tenant_id: tenant.tenant_id,
            amount: dec("1200.00"),
            payment_type: PaymentType::Rent,
            payment_method: PaymentMethodType::Check,
            payment_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            period_start: Some(march_2025().start),
            period_end: Some(march_2025().end),
            notes: Some("check #1042".to_string()),
            admin_id: Uuid::new_v4(),
        })
        .await
        .unwrap();

    let err = service(&h).refund(command(manual.id, None)).await.unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert_eq!(err.error_code(), ErrorCode::ManualRefundRequired);
    assert_eq!(h.processor.refund_count(), 0);
}

#[tokio::test]
async fn only_completed_payments_are_refundable() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let pending = h.pending_payment(&tenant, "1200.00", Some(march_2025())).await;

    let err = service(&h).refund(command(pending.id, None)).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(err.error_code(), ErrorCode::RefundNotAllowed);

    let err = service(&h)
        .refund(command(Uuid::new_v4(), None))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(h.processor.refund_count(), 0);
}

#[tokio::test]
async fn processor_failure_leaves_payment_completed() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.completed_payment(&tenant, "1200.00").await;
    h.processor.fail_refunds();

    let err = service(&h).refund(command(payment.id, None)).await.unwrap_err();
    assert!(err.status_code() >= 500);

    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn ledger_write_failure_reports_partial_success() {
    let h = Harness::new();
    let tenant = h.add_tenant("1200.00").await;
    let payment = h.completed_payment(&tenant, "1200.00").await;

    let store = Arc::new(RefundWriteFailingStore {
        inner: h.payments.clone(),
    });
    let outcome = RefundService::new(store, h.gateway())
        .refund(command(payment.id, None))
        .await
        .unwrap();

    match outcome {
        RefundOutcome::RefundedButUnpersisted {
            payment_id, amount, ..
        } => {
            assert_eq!(payment_id, payment.id);
            assert_eq!(amount, dec("1200.00"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(h.processor.refund_count(), 1);
    let stored = h.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
}
