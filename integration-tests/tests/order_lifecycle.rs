//! End-to-end order lifecycle: create, automatic approval, dispatch,
//! deterministic simulation, settlement, and the event-tree invariants.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use backoffice_common::error::CoreError;
use backoffice_common::events::{from_payload, EventType, FillGeneratedPayload};
use backoffice_common::executions::ExecutionStatus;
use backoffice_common::orders::{
    BulkCreateRequest, CancelOrderRequest, CreateOrderRequest, OrderSide, OrderState, OrderType,
    SendToEmsRequest, TimeInForce,
};
use backoffice_core::readmodel::ReadModelStore;
use backoffice_core::store::EventStore;
use integration_tests::{assert_ascending, assert_causation_closure, wait_until, TestBackoffice};

fn buy_limit_order(quantity: Decimal, limit_price: Decimal) -> CreateOrderRequest {
    CreateOrderRequest {
        account_id: "ACC-1".to_string(),
        instrument_id: "912828XG55".to_string(),
        side: OrderSide::Buy,
        quantity,
        order_type: OrderType::Limit,
        limit_price: Some(limit_price),
        curve_spread_bp: None,
        time_in_force: TimeInForce::Day,
        batch_id: None,
        created_by: "trader-1".to_string(),
    }
}

async fn await_state(backoffice: &TestBackoffice, order_id: Uuid, state: OrderState) {
    wait_until(&format!("order {order_id} to reach {state}"), || async {
        backoffice
            .read
            .get_order(order_id)
            .await
            .ok()
            .flatten()
            .map(|order| order.state == state)
            .unwrap_or(false)
    })
    .await;
}

/// Scenario: BUY 500k of a 7Y at LIMIT 101 with the limit above market.
/// Ten 50k clips, average fill inside [100.0145, 100.020], one of each
/// terminal event, a settlement 24h after the as-of, and full causation
/// closure across the flow.
#[tokio::test]
async fn happy_path_buy_500k() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6.2))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let correlation = Uuid::new_v4();
    let order_id = backoffice
        .runtime
        .oms
        .create_order(buy_limit_order(dec!(500000), dec!(101)), correlation)
        .await
        .expect("create order");

    // No rules and 500k is below the approval threshold: approved with
    // no human in the loop
    await_state(&backoffice, order_id, OrderState::Approved).await;

    backoffice
        .runtime
        .oms
        .send_to_ems(
            SendToEmsRequest {
                order_id,
                sent_by: "trader-1".to_string(),
            },
            correlation,
        )
        .await
        .expect("send to ems");

    await_state(&backoffice, order_id, OrderState::Settled).await;

    let events = backoffice.correlation_events(correlation).await;
    assert_ascending(&events);
    assert_causation_closure(&events);
    assert!(events.iter().all(|e| e.correlation_id == correlation));

    let count = |t: EventType| events.iter().filter(|e| e.event_type == t).count();
    assert_eq!(count(EventType::OrderCreated), 1);
    assert_eq!(count(EventType::OrderApproved), 1);
    assert_eq!(count(EventType::OrderSentToEMS), 1);
    assert_eq!(count(EventType::ExecutionRequested), 1);
    assert_eq!(count(EventType::ExecutionSimulated), 1);
    assert_eq!(count(EventType::OrderFullyFilled), 1);
    assert_eq!(count(EventType::SettlementBooked), 1);
    assert_eq!(count(EventType::FillGenerated), 10);
    assert_eq!(count(EventType::OrderPartiallyFilled), 9);

    let fills: Vec<FillGeneratedPayload> = events
        .iter()
        .filter(|e| e.event_type == EventType::FillGenerated)
        .map(|e| from_payload(&e.payload).unwrap())
        .collect();
    let clip_indexes: Vec<i32> = fills.iter().map(|f| f.clip_index).collect();
    assert_eq!(clip_indexes, (1..=10).collect::<Vec<i32>>());
    let total: Decimal = fills.iter().map(|f| f.quantity).sum();
    assert!((total - dec!(500000)).abs() < dec!(0.000001));

    // Read models converge with the log
    let execution = events
        .iter()
        .find(|e| e.event_type == EventType::ExecutionRequested)
        .and_then(|e| e.payload_uuid("executionId"))
        .expect("execution id");
    wait_until("execution to settle", || async {
        backoffice
            .read
            .get_execution(execution)
            .await
            .ok()
            .flatten()
            .map(|e| e.status == ExecutionStatus::Settled)
            .unwrap_or(false)
    })
    .await;

    let execution_row = backoffice
        .read
        .get_execution(execution)
        .await
        .unwrap()
        .unwrap();
    let avg = execution_row.avg_fill_price.unwrap();
    assert!(avg >= dec!(100.0145) && avg <= dec!(100.020), "avg {avg}");
    assert_eq!(execution_row.filled_quantity, dec!(500000));

    assert_eq!(
        backoffice.read.fills_by_execution(execution).await.unwrap().len(),
        10
    );

    backoffice.shutdown().await;
}

/// Orders above 1,000,000 route to manual approval even with no rules.
#[tokio::test]
async fn large_order_requires_approval() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6.2))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let correlation = Uuid::new_v4();
    let order_id = backoffice
        .runtime
        .oms
        .create_order(buy_limit_order(dec!(1500000), dec!(101)), correlation)
        .await
        .expect("create order");

    await_state(&backoffice, order_id, OrderState::ApprovalPending).await;

    // Dispatch is rejected until a human approves
    let err = backoffice
        .runtime
        .oms
        .send_to_ems(
            SendToEmsRequest {
                order_id,
                sent_by: "trader-1".to_string(),
            },
            correlation,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));

    backoffice
        .runtime
        .oms
        .approve_order(
            backoffice_common::orders::ApproveOrderRequest {
                order_id,
                approved_by: "supervisor-1".to_string(),
            },
            correlation,
        )
        .await
        .expect("approve");
    await_state(&backoffice, order_id, OrderState::Approved).await;

    backoffice.shutdown().await;
}

#[tokio::test]
async fn cancel_is_rejected_after_terminal_state() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6.2))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let correlation = Uuid::new_v4();
    let order_id = backoffice
        .runtime
        .oms
        .create_order(buy_limit_order(dec!(1000), dec!(101)), correlation)
        .await
        .unwrap();
    await_state(&backoffice, order_id, OrderState::Approved).await;

    backoffice
        .runtime
        .oms
        .send_to_ems(
            SendToEmsRequest {
                order_id,
                sent_by: "trader-1".to_string(),
            },
            correlation,
        )
        .await
        .unwrap();
    await_state(&backoffice, order_id, OrderState::Settled).await;

    let err = backoffice
        .runtime
        .oms
        .cancel_order(
            CancelOrderRequest {
                order_id,
                cancelled_by: "trader-1".to_string(),
                reason: Some("too late".to_string()),
            },
            correlation,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));

    backoffice.shutdown().await;
}

#[tokio::test]
async fn cancel_from_draft_like_states() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6.2))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let correlation = Uuid::new_v4();
    let order_id = backoffice
        .runtime
        .oms
        .create_order(buy_limit_order(dec!(1000), dec!(101)), correlation)
        .await
        .unwrap();
    await_state(&backoffice, order_id, OrderState::Approved).await;

    backoffice
        .runtime
        .oms
        .cancel_order(
            CancelOrderRequest {
                order_id,
                cancelled_by: "trader-1".to_string(),
                reason: None,
            },
            correlation,
        )
        .await
        .expect("cancel approved order");
    await_state(&backoffice, order_id, OrderState::Cancelled).await;

    backoffice.shutdown().await;
}

/// A failing line reports its error without aborting the batch, and
/// every created order carries the batch id.
#[tokio::test]
async fn bulk_create_isolates_line_failures() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6.2))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let mut bad = buy_limit_order(dec!(1000), dec!(101));
    bad.limit_price = None; // LIMIT without a price

    let correlation = Uuid::new_v4();
    let result = backoffice
        .runtime
        .oms
        .bulk_create(
            BulkCreateRequest {
                orders: vec![
                    buy_limit_order(dec!(1000), dec!(101)),
                    bad,
                    buy_limit_order(dec!(2000), dec!(101)),
                ],
            },
            correlation,
        )
        .await
        .expect("bulk create");

    assert_eq!(result.results.len(), 3);
    assert!(result.results[0].error.is_none());
    assert!(result.results[1].error.is_some());
    assert!(result.results[1].order_id.is_none());
    assert!(result.results[2].error.is_none());

    let created = result.results[0].order_id.unwrap();
    wait_until("batched order to project", || async {
        backoffice
            .read
            .get_order(created)
            .await
            .ok()
            .flatten()
            .map(|order| order.batch_id == Some(result.batch_id))
            .unwrap_or(false)
    })
    .await;

    backoffice.shutdown().await;
}

/// The event store query surfaces agree and stay in occurred_at order.
#[tokio::test]
async fn event_store_query_ordering() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6.2))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let correlation = Uuid::new_v4();
    let order_id = backoffice
        .runtime
        .oms
        .create_order(buy_limit_order(dec!(1000), dec!(101)), correlation)
        .await
        .unwrap();
    await_state(&backoffice, order_id, OrderState::Approved).await;

    let by_aggregate = backoffice
        .events
        .by_aggregate(
            backoffice_common::events::AggregateType::Order,
            &order_id.to_string(),
        )
        .await
        .unwrap();
    assert!(!by_aggregate.is_empty());
    assert_ascending(&by_aggregate);

    let by_type = backoffice
        .events
        .by_event_type(EventType::OrderCreated)
        .await
        .unwrap();
    assert_eq!(by_type.len(), 1);

    let all = backoffice.events.all().await.unwrap();
    assert_ascending(&all);

    let window = backoffice
        .events
        .by_time_range(all[0].occurred_at, all[all.len() - 1].occurred_at)
        .await
        .unwrap();
    assert_eq!(window.len(), all.len());

    backoffice.shutdown().await;
}
