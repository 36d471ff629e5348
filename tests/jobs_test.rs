//! Batch worker tests: expiry sweep, reconciliation, and the outbound
//! dispatcher against a local HTTP endpoint.

mod common;

use axum::http::StatusCode;
use chrono::{Duration as ChronoDuration, Utc};

use common::{
    harness, harness_with_config, seeded_payment, spawn_callback_server, test_config,
    ScriptedProvider,
};
use payments_service::payments::types::{CallbackDeliveryStatus, PaymentStatus};

#[tokio::test]
async fn expire_pending_batch_marks_old_payments_expired() {
    let h = harness(ScriptedProvider::default());
    let mut stale = seeded_payment(1, PaymentStatus::Pending);
    stale.created_at = Utc::now() - ChronoDuration::hours(2);
    stale.updated_at = stale.created_at;
    h.store.seed(stale);
    // Fresh payment stays untouched.
    h.store.seed(seeded_payment(2, PaymentStatus::Pending));

    h.service.run_expire_pending_batch().await.unwrap();

    let expired = h.store.get(1).unwrap();
    assert_eq!(expired.status, PaymentStatus::Expired);
    assert_eq!(
        expired.callback_delivery_status,
        CallbackDeliveryStatus::Pending
    );
    assert_eq!(expired.callback_delivery_attempts, 0);
    assert!(expired.callback_delivery_next_at.is_some());

    let fresh = h.store.get(2).unwrap();
    assert_eq!(fresh.status, PaymentStatus::Pending);

    let events = h.events.events_of_type("payment_expired");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payment_id, 1);
    assert_eq!(events[0].old_status, Some(PaymentStatus::Pending));
    assert_eq!(events[0].new_status, PaymentStatus::Expired);
}

#[tokio::test]
async fn reconcile_batch_applies_terminal_status() {
    let h = harness(ScriptedProvider {
        reconcile_status: Some(PaymentStatus::Paid),
        ..ScriptedProvider::default()
    });
    let mut stale = seeded_payment(1, PaymentStatus::Pending);
    stale.provider_payment_id = Some("cs_test_123".to_string());
    stale.created_at = Utc::now() - ChronoDuration::hours(2);
    stale.updated_at = stale.created_at;
    h.store.seed(stale);

    h.service.run_reconcile_batch().await.unwrap();

    let paid = h.store.get(1).unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert_eq!(paid.callback_delivery_status, CallbackDeliveryStatus::Pending);

    let events = h.events.events_of_type("payment_reconciled");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].old_status, Some(PaymentStatus::Pending));
    assert_eq!(events[0].new_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn reconcile_batch_skips_unmapped_provider_state() {
    let h = harness(ScriptedProvider {
        reconcile_status: None,
        ..ScriptedProvider::default()
    });
    let mut stale = seeded_payment(1, PaymentStatus::Pending);
    stale.provider_payment_id = Some("cs_test_123".to_string());
    stale.updated_at = Utc::now() - ChronoDuration::hours(2);
    h.store.seed(stale.clone());

    h.service.run_reconcile_batch().await.unwrap();

    let untouched = h.store.get(1).unwrap();
    assert_eq!(untouched.status, PaymentStatus::Pending);
    assert_eq!(untouched.updated_at, stale.updated_at);
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn reconcile_batch_surfaces_first_error_but_finishes() {
    let h = harness(ScriptedProvider {
        reconcile_err: Some("stripe is down".to_string()),
        ..ScriptedProvider::default()
    });
    for id in 1..=2 {
        let mut stale = seeded_payment(id, PaymentStatus::Pending);
        stale.provider_payment_id = Some(format!("cs_test_{}", id));
        stale.updated_at = Utc::now() - ChronoDuration::hours(2);
        h.store.seed(stale);
    }

    let err = h.service.run_reconcile_batch().await.unwrap_err();
    assert!(err.to_string().contains("stripe is down"));
}

#[tokio::test]
async fn dispatch_sends_envelope_with_request_id_and_api_key() {
    let (url, captured) = spawn_callback_server(StatusCode::OK).await;

    let h = harness(ScriptedProvider::default());
    let mut due = seeded_payment(1, PaymentStatus::Paid);
    due.callback_delivery_status = CallbackDeliveryStatus::Pending;
    due.callback_delivery_next_at = Some(Utc::now() - ChronoDuration::seconds(1));
    due.status_callback_url = url;
    h.store.seed(due);

    h.service.run_dispatch_callbacks_batch().await.unwrap();

    let delivered = h.store.get(1).unwrap();
    assert_eq!(
        delivered.callback_delivery_status,
        CallbackDeliveryStatus::Success
    );
    assert!(delivered.callback_delivery_next_at.is_none());
    assert!(delivered.callback_delivery_last_err.is_none());

    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].request_id, "req-1");
    assert_eq!(requests[0].api_key, "payments-app-key");
    assert!(requests[0].content_type.starts_with("application/json"));

    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["payment"]["id"], 1);
    assert_eq!(body["payment"]["status"], PaymentStatus::Paid.code());
    assert_eq!(body["payment"]["currency"], "USD");

    let events = h.events.events_of_type("callback_dispatched");
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn dispatch_failure_exhausts_attempts_and_marks_failed() {
    let (url, _captured) = spawn_callback_server(StatusCode::INTERNAL_SERVER_ERROR).await;

    let mut cfg = test_config();
    cfg.callback_max_attempts = 1;
    let h = harness_with_config(ScriptedProvider::default(), cfg);

    let mut due = seeded_payment(1, PaymentStatus::Failed);
    due.callback_delivery_status = CallbackDeliveryStatus::Pending;
    due.callback_delivery_next_at = Some(Utc::now() - ChronoDuration::seconds(1));
    due.status_callback_url = url;
    h.store.seed(due);

    let err = h.service.run_dispatch_callbacks_batch().await.unwrap_err();
    assert!(err.to_string().contains("status=500"));

    let failed = h.store.get(1).unwrap();
    assert_eq!(
        failed.callback_delivery_status,
        CallbackDeliveryStatus::Failed
    );
    assert_eq!(failed.callback_delivery_attempts, 1);
    assert!(failed.callback_delivery_next_at.is_none());
    assert!(failed
        .callback_delivery_last_err
        .as_deref()
        .unwrap_or("")
        .contains("status=500"));

    let events = h.events.events_of_type("callback_dispatch_failed");
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn dispatch_failure_schedules_fixed_interval_retry() {
    let (url, _captured) = spawn_callback_server(StatusCode::BAD_GATEWAY).await;

    let h = harness(ScriptedProvider::default());
    let mut due = seeded_payment(1, PaymentStatus::Paid);
    due.callback_delivery_status = CallbackDeliveryStatus::Pending;
    due.callback_delivery_next_at = Some(Utc::now() - ChronoDuration::seconds(1));
    due.status_callback_url = url;
    h.store.seed(due);

    let before = Utc::now();
    let err = h.service.run_dispatch_callbacks_batch().await.unwrap_err();
    assert!(err.to_string().contains("status=502"));

    let retrying = h.store.get(1).unwrap();
    assert_eq!(
        retrying.callback_delivery_status,
        CallbackDeliveryStatus::Pending
    );
    assert_eq!(retrying.callback_delivery_attempts, 1);
    // test_config retries after a fixed 1s interval.
    let next_at = retrying.callback_delivery_next_at.unwrap();
    assert!(next_at >= before + ChronoDuration::seconds(1));
    assert!(next_at <= Utc::now() + ChronoDuration::seconds(2));
}

#[tokio::test]
async fn dispatch_with_empty_callback_url_fails_terminally() {
    let h = harness(ScriptedProvider::default());
    let mut due = seeded_payment(1, PaymentStatus::Paid);
    due.callback_delivery_status = CallbackDeliveryStatus::Pending;
    due.callback_delivery_next_at = Some(Utc::now() - ChronoDuration::seconds(1));
    due.status_callback_url = String::new();
    h.store.seed(due);

    // Not a dispatch error: the payment is misconfigured, not the endpoint.
    h.service.run_dispatch_callbacks_batch().await.unwrap();

    let failed = h.store.get(1).unwrap();
    assert_eq!(
        failed.callback_delivery_status,
        CallbackDeliveryStatus::Failed
    );
    assert_eq!(failed.callback_delivery_attempts, 0);
    assert!(failed.callback_delivery_next_at.is_none());
    assert_eq!(
        failed.callback_delivery_last_err.as_deref(),
        Some("status_callback_url is empty")
    );
    // No dispatch event for the misconfiguration path.
    assert!(h.events.events().is_empty());
}
