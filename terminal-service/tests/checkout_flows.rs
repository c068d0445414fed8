mod support;

use std::sync::atomic::Ordering;

use serde_json::json;
use support::TestHarness;

#[tokio::test]
async fn card_checkout_creates_order_then_attaches_checkout() {
    let harness = TestHarness::new().await;

    let (status, body) = harness
        .post(
            "/terminal-checkouts",
            json!({
                "device_id": "dev_123",
                "amount_cents": 1999,
                "reference_id": "sale-1",
                "note": "table 4"
            }),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["ok"], json!(true));
    assert!(body["order_id"].as_str().unwrap().starts_with("ord_"));
    assert!(body["checkout_id"].as_str().unwrap().starts_with("chk_"));
    assert_eq!(body["checkout_status"], json!("PENDING"));
    assert_eq!(body["payment_ids"], json!([]));

    assert_eq!(harness.gateway.order_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.gateway.checkout_calls.load(Ordering::SeqCst), 1);

    let orders = harness.store.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].tenant_id, harness.tenant_id);
    assert_eq!(orders[0].amount_minor, 1999);
    assert_eq!(orders[0].currency, "USD");
    assert_eq!(orders[0].reference_id.as_deref(), Some("sale-1"));
}

#[tokio::test]
async fn itemized_cart_totals_in_integer_cents() {
    let harness = TestHarness::new().await;

    let (status, body) = harness
        .post(
            "/terminal-checkouts",
            json!({
                "device_id": "dev_123",
                "items": [
                    {"name": "Latte", "quantity": 2, "amount_cents": 450},
                    {"name": "Muffin", "amount_cents": 300}
                ]
            }),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["ok"], json!(true));

    let orders = harness.store.orders().await;
    assert_eq!(orders.len(), 1);
    // 2 x 450 + 1 x 300, quantity defaulting to one
    assert_eq!(orders[0].amount_minor, 1200);
}

#[tokio::test]
async fn retried_sale_reuses_the_same_remote_objects() {
    let harness = TestHarness::new().await;
    let request = json!({
        "device_id": "dev_123",
        "amount_cents": 2500,
        "reference_id": "sale-retry"
    });

    let (_, first) = harness.post("/terminal-checkouts", request.clone()).await;
    let (_, second) = harness.post("/terminal-checkouts", request).await;

    assert_eq!(first["order_id"], second["order_id"]);
    assert_eq!(first["checkout_id"], second["checkout_id"]);
    // both attempts went to the processor; the idempotency key deduped them
    assert_eq!(harness.gateway.order_calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.store.orders().await.len(), 1);
}

#[tokio::test]
async fn currency_override_is_stored_with_the_order() {
    let harness = TestHarness::new().await;

    let (status, _) = harness
        .post(
            "/terminal-checkouts",
            json!({"device_id": "dev_9", "amount_cents": 700, "currency": "CAD"}),
        )
        .await;

    assert_eq!(status, 200);
    let orders = harness.store.orders().await;
    assert_eq!(orders[0].currency, "CAD");
}

#[tokio::test]
async fn cash_payment_completes_in_one_round_trip() {
    let harness = TestHarness::new().await;

    let (status, body) = harness
        .post(
            "/cash-payments",
            json!({"amount_cents": 500, "reference_id": "cash-7"}),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["ok"], json!(true));
    assert!(body["order_id"].as_str().unwrap().starts_with("ord_"));
    assert!(body["payment_id"].as_str().unwrap().starts_with("pay_"));
    assert_eq!(body["status"], json!("COMPLETED"));

    let payments = harness.store.cash_payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount_minor, 500);
    assert_eq!(payments[0].tenant_id, harness.tenant_id);

    let orders = harness.store.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].remote_order_id, payments[0].remote_order_id);

    // cash never goes through the terminal: no checkout created, nothing polled
    assert_eq!(harness.gateway.checkout_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.gateway.get_calls.load(Ordering::SeqCst), 0);
}
