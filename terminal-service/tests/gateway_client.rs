mod support;

use httpmock::prelude::*;
use serde_json::json;

use common_money::Money;
use common_observability::TerminalMetrics;
use terminal_service::square::{
    CashPaymentDraft, CheckoutStatus, GatewayError, OrderDraft, OrderLineItem, SquareClient,
    TerminalGateway,
};

fn client_for(server: &MockServer) -> SquareClient {
    let mut config = support::test_config();
    config.square_api_url = server.base_url();
    SquareClient::new(&config, TerminalMetrics::new().expect("metrics")).expect("client")
}

fn order_draft() -> OrderDraft {
    OrderDraft {
        location_id: "LOC_TEST".to_owned(),
        line_items: vec![OrderLineItem {
            name: "Latte".to_owned(),
            quantity: 2,
            amount: Money::from_minor(450, "USD"),
        }],
        customer_id: None,
        reference_id: Some("sale-1".to_owned()),
        note: None,
        idempotency_key: "key-1".to_owned(),
    }
}

#[tokio::test]
async fn create_order_sends_credentials_and_wire_format() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/orders")
            .header("authorization", "Bearer test-access-token")
            .header("Square-Version", "2024-01-18")
            .json_body_partial(
                r#"{
                    "idempotency_key": "key-1",
                    "order": {
                        "location_id": "LOC_TEST",
                        "line_items": [
                            {"name": "Latte", "quantity": "2", "base_price_money": {"amount": 450, "currency": "USD"}}
                        ]
                    }
                }"#,
            );
        then.status(200)
            .json_body(json!({"order": {"id": "ord_1", "state": "OPEN"}}));
    });

    let client = client_for(&server);
    let order = client.create_order(order_draft()).await.expect("order");

    mock.assert();
    assert_eq!(order.id, "ord_1");
    assert_eq!(order.state, "OPEN");
}

#[tokio::test]
async fn processor_error_envelope_is_unwrapped() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/orders");
        then.status(400).json_body(json!({
            "errors": [{
                "category": "INVALID_REQUEST_ERROR",
                "code": "VALUE_TOO_LOW",
                "detail": "order total must be positive"
            }]
        }));
    });

    let client = client_for(&server);
    let err = client.create_order(order_draft()).await.expect_err("rejected");

    match err {
        GatewayError::Api {
            status,
            code,
            detail,
        } => {
            assert_eq!(status, 400);
            assert_eq!(code, "VALUE_TOO_LOW");
            assert_eq!(detail, "order total must be positive");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn get_checkout_parses_status_and_payments() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v2/terminals/checkouts/chk_9");
        then.status(200).json_body(json!({
            "checkout": {"id": "chk_9", "status": "COMPLETED", "payment_ids": ["pay_1"]}
        }));
    });

    let client = client_for(&server);
    let checkout = client
        .get_terminal_checkout("chk_9")
        .await
        .expect("checkout");

    assert_eq!(checkout.status, CheckoutStatus::Completed);
    assert_eq!(checkout.payment_ids, vec!["pay_1"]);
}

#[tokio::test]
async fn cancel_posts_to_the_cancel_path_without_a_body() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/terminals/checkouts/chk_9/cancel")
            .header("Square-Version", "2024-01-18");
        then.status(200).json_body(json!({
            "checkout": {"id": "chk_9", "status": "CANCELED"}
        }));
    });

    let client = client_for(&server);
    let checkout = client
        .cancel_terminal_checkout("chk_9")
        .await
        .expect("checkout");

    mock.assert();
    assert_eq!(checkout.status, CheckoutStatus::Canceled);
}

#[tokio::test]
async fn cash_payment_is_an_autocompleted_cash_source() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v2/payments").json_body_partial(
            r#"{
                "source_id": "CASH",
                "autocomplete": true,
                "order_id": "ord_7",
                "amount_money": {"amount": 600, "currency": "USD"},
                "cash_details": {"buyer_supplied_money": {"amount": 600, "currency": "USD"}}
            }"#,
        );
        then.status(200)
            .json_body(json!({"payment": {"id": "pay_1", "status": "COMPLETED"}}));
    });

    let client = client_for(&server);
    let payment = client
        .create_cash_payment(CashPaymentDraft {
            order_id: "ord_7".to_owned(),
            amount: Money::from_minor(600, "USD"),
            customer_id: None,
            reference_id: None,
            note: None,
            idempotency_key: "key-2".to_owned(),
        })
        .await
        .expect("payment");

    mock.assert();
    assert_eq!(payment.id, "pay_1");
    assert_eq!(payment.status, "COMPLETED");
}
