//! The command dispatch surface the external transport calls: status
//! codes, correlation echo, and error bodies.

use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use backoffice_common::orders::OrderState;
use backoffice_core::api::CommandEnvelope;
use backoffice_core::readmodel::ReadModelStore;
use integration_tests::{wait_until, TestBackoffice};

#[tokio::test]
async fn create_order_roundtrip_through_router() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6.2))
        .await;
    backoffice.seed_account("ACC-1", None).await;
    let router = backoffice.runtime.router();

    let correlation = Uuid::new_v4();
    let response = router
        .dispatch(CommandEnvelope {
            command_type: "CreateOrder".to_string(),
            correlation_id: Some(correlation),
            payload: json!({
                "accountId": "ACC-1",
                "instrumentId": "912828XG55",
                "side": "BUY",
                "quantity": 1000,
                "orderType": "MARKET",
                "createdBy": "trader-1"
            }),
        })
        .await
        .expect("dispatch create");

    assert_eq!(response.status, 201);
    assert_eq!(response.correlation_id, correlation);
    let order_id: Uuid =
        serde_json::from_value(response.result["orderId"].clone()).expect("order id in result");

    wait_until("order to approve via router", || async {
        backoffice
            .read
            .get_order(order_id)
            .await
            .ok()
            .flatten()
            .map(|order| order.state == OrderState::Approved)
            .unwrap_or(false)
    })
    .await;

    // Every event of the flow carries the client-supplied correlation
    let events = backoffice.correlation_events(correlation).await;
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.correlation_id == correlation));

    backoffice.shutdown().await;
}

#[tokio::test]
async fn router_generates_correlation_when_absent() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6.2))
        .await;
    backoffice.seed_account("ACC-1", None).await;
    let router = backoffice.runtime.router();

    let response = router
        .dispatch(CommandEnvelope {
            command_type: "CreateOrder".to_string(),
            correlation_id: None,
            payload: json!({
                "accountId": "ACC-1",
                "instrumentId": "912828XG55",
                "side": "SELL",
                "quantity": 500,
                "orderType": "MARKET",
                "createdBy": "trader-1"
            }),
        })
        .await
        .expect("dispatch");
    assert_ne!(response.correlation_id, Uuid::nil());

    backoffice.shutdown().await;
}

#[tokio::test]
async fn router_maps_failures_to_status_codes() {
    let backoffice = TestBackoffice::start();
    backoffice.seed_account("ACC-1", None).await;
    let router = backoffice.runtime.router();

    // Validation failure: LIMIT without a limit price
    let failure = router
        .dispatch(CommandEnvelope {
            command_type: "CreateOrder".to_string(),
            correlation_id: None,
            payload: json!({
                "accountId": "ACC-1",
                "instrumentId": "912828XG55",
                "side": "BUY",
                "quantity": 1000,
                "orderType": "LIMIT",
                "createdBy": "trader-1"
            }),
        })
        .await
        .unwrap_err();
    assert_eq!(failure.status, 400);
    assert!(!failure.error.is_empty());

    // Unknown aggregate
    let failure = router
        .dispatch(CommandEnvelope {
            command_type: "ApproveOrder".to_string(),
            correlation_id: None,
            payload: json!({
                "orderId": Uuid::new_v4(),
                "approvedBy": "supervisor-1"
            }),
        })
        .await
        .unwrap_err();
    assert_eq!(failure.status, 404);

    // Unknown command type
    let failure = router
        .dispatch(CommandEnvelope {
            command_type: "RebootMatrix".to_string(),
            correlation_id: None,
            payload: json!({}),
        })
        .await
        .unwrap_err();
    assert_eq!(failure.status, 400);

    backoffice.shutdown().await;
}
