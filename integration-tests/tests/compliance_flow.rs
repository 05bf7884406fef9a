//! Compliance scenarios: blocking rules at pre-trade, warnings routing
//! to approval, re-evaluation on amendment, and rule lifecycle guards.

use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use backoffice_common::compliance::{
    ComplianceStatus, EvaluationPoint, Predicate, PredicateOperator, RuleInput, RuleScope,
    RuleSeverity, RuleStatus,
};
use backoffice_common::error::CoreError;
use backoffice_common::events::EventType;
use backoffice_common::orders::{
    AmendOrderRequest, CreateOrderRequest, OrderSide, OrderState, OrderType, TimeInForce,
};
use backoffice_core::readmodel::ReadModelStore;
use integration_tests::{assert_causation_closure, wait_until, TestBackoffice};

fn rule(
    key: &str,
    severity: RuleSeverity,
    scope: RuleScope,
    scope_id: Option<&str>,
    metric: &str,
    operator: PredicateOperator,
    value: serde_json::Value,
    points: Vec<EvaluationPoint>,
) -> RuleInput {
    RuleInput {
        rule_key: key.to_string(),
        name: format!("Rule {key}"),
        description: None,
        severity,
        scope,
        scope_id: scope_id.map(str::to_string),
        predicate: Predicate {
            metric: metric.to_string(),
            operator,
            value,
            instrument_filter: None,
        },
        explanation_template: "{metric} breaches {threshold}".to_string(),
        evaluation_points: points,
        status: Some(RuleStatus::Active),
        effective_from: None,
        effective_to: None,
        rule_set_id: None,
        actor_id: "compliance-officer".to_string(),
    }
}

fn market_order(quantity: rust_decimal::Decimal) -> CreateOrderRequest {
    CreateOrderRequest {
        account_id: "ACC-1".to_string(),
        instrument_id: "912828XG55".to_string(),
        side: OrderSide::Buy,
        quantity,
        order_type: OrderType::Market,
        limit_price: None,
        curve_spread_bp: None,
        time_in_force: TimeInForce::Day,
        batch_id: None,
        created_by: "trader-1".to_string(),
    }
}

/// Scenario: an ACCOUNT-scope BLOCK rule on portfolio.duration <= 5
/// with the portfolio at 6. Creation is refused with the order id kept
/// for audit, the block event lands, and the order projects as
/// REJECTED.
#[tokio::test]
async fn block_rule_rejects_order() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6))
        .await;
    backoffice.seed_account("ACC-1", None).await;
    // Existing book with duration 6
    backoffice
        .seed_position("ACC-1", "912828XG55", dec!(1000), dec!(100), dec!(6))
        .await;

    let rule_id = backoffice
        .runtime
        .compliance
        .create_rule(
            rule(
                "rk1",
                RuleSeverity::Block,
                RuleScope::Account,
                Some("ACC-1"),
                "portfolio.duration",
                PredicateOperator::Le,
                json!(5),
                vec![EvaluationPoint::PreTrade],
            ),
            Uuid::new_v4(),
        )
        .await
        .expect("create rule");
    wait_until("rule to project as active", || async {
        backoffice
            .read
            .get_rule(rule_id)
            .await
            .ok()
            .flatten()
            .map(|r| r.status == RuleStatus::Active)
            .unwrap_or(false)
    })
    .await;

    let correlation = Uuid::new_v4();
    let err = backoffice
        .runtime
        .oms
        .create_order(market_order(dec!(1000)), correlation)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    let order_id = match err {
        CoreError::ComplianceBlocked { order_id } => order_id,
        other => panic!("expected ComplianceBlocked, got {other}"),
    };

    wait_until("order to project as rejected", || async {
        backoffice
            .read
            .get_order(order_id)
            .await
            .ok()
            .flatten()
            .map(|order| order.state == OrderState::Rejected)
            .unwrap_or(false)
    })
    .await;

    let events = backoffice.correlation_events(correlation).await;
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::OrderBlockedByCompliance));
    assert_causation_closure(&events);

    wait_until("evaluation row with BLOCK", || async {
        backoffice
            .read
            .evaluations_by_order(order_id)
            .await
            .map(|evaluations| {
                evaluations
                    .iter()
                    .any(|e| e.result == ComplianceStatus::Block)
            })
            .unwrap_or(false)
    })
    .await;
    wait_until("violation row recorded", || async {
        backoffice
            .read
            .violations_by_order(order_id)
            .await
            .map(|violations| !violations.is_empty())
            .unwrap_or(false)
    })
    .await;

    backoffice.shutdown().await;
}

/// Scenario: a WARN rule trips on create, routing the order to
/// approval; amending the quantity below the threshold re-evaluates via
/// the OrderAmended subscription and the fresh evaluation passes.
#[tokio::test]
async fn warn_then_amend_reevaluates() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let rule_id = backoffice
        .runtime
        .compliance
        .create_rule(
            rule(
                "max_order_qty",
                RuleSeverity::Warn,
                RuleScope::Global,
                None,
                "order.quantity",
                PredicateOperator::Le,
                json!(100000),
                vec![EvaluationPoint::PreTrade],
            ),
            Uuid::new_v4(),
        )
        .await
        .expect("create rule");
    wait_until("rule to project", || async {
        backoffice.read.get_rule(rule_id).await.ok().flatten().is_some()
    })
    .await;

    let correlation = Uuid::new_v4();
    let order_id = backoffice
        .runtime
        .oms
        .create_order(market_order(dec!(200000)), correlation)
        .await
        .expect("warned order still creates");

    wait_until("order to pend approval", || async {
        backoffice
            .read
            .get_order(order_id)
            .await
            .ok()
            .flatten()
            .map(|order| order.state == OrderState::ApprovalPending)
            .unwrap_or(false)
    })
    .await;

    let events = backoffice.correlation_events(correlation).await;
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::OrderWarnedByCompliance));
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::OrderApprovalRequested));

    backoffice
        .runtime
        .oms
        .amend_order(
            AmendOrderRequest {
                order_id,
                quantity: Some(dec!(50000)),
                order_type: None,
                limit_price: None,
                curve_spread_bp: None,
                updated_by: "trader-1".to_string(),
            },
            correlation,
        )
        .await
        .expect("amend order");

    // The subscription-triggered evaluation lands asynchronously; the
    // newest evaluation must now pass
    wait_until("post-amend evaluation to pass", || async {
        backoffice
            .read
            .evaluations_by_order(order_id)
            .await
            .map(|evaluations| {
                evaluations
                    .last()
                    .map(|latest| latest.result == ComplianceStatus::Pass)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    })
    .await;

    backoffice.shutdown().await;
}

/// Account-scope rules shadow global rules with the same key: the
/// permissive account override lets the order through.
#[tokio::test]
async fn account_scope_shadows_global() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let strict_global = backoffice
        .runtime
        .compliance
        .create_rule(
            rule(
                "max_order_qty",
                RuleSeverity::Block,
                RuleScope::Global,
                None,
                "order.quantity",
                PredicateOperator::Le,
                json!(1000),
                vec![EvaluationPoint::PreTrade],
            ),
            Uuid::new_v4(),
        )
        .await
        .unwrap();
    wait_until("global rule to project", || async {
        backoffice
            .read
            .get_rule(strict_global)
            .await
            .ok()
            .flatten()
            .is_some()
    })
    .await;

    // The command layer enforces key uniqueness, so seed the
    // account-scope override of the same key directly as prior state
    // (rule sets can introduce scoped variants of one key).
    let mut shadow = backoffice.read.get_rule(strict_global).await.unwrap().unwrap();
    shadow.rule_id = Uuid::new_v4();
    shadow.scope = RuleScope::Account;
    shadow.scope_id = Some("ACC-1".to_string());
    shadow.predicate.value = json!(500000);
    backoffice.read.upsert_rule(shadow).await.unwrap();

    let correlation = Uuid::new_v4();
    let order_id = backoffice
        .runtime
        .oms
        .create_order(market_order(dec!(100000)), correlation)
        .await
        .expect("account override should let the order through");

    wait_until("order approved under account override", || async {
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

    backoffice.shutdown().await;
}

#[tokio::test]
async fn rule_lifecycle_guards() {
    let backoffice = TestBackoffice::start();
    backoffice
        .seed_instrument("912828XG55", 7, dec!(100), dec!(6))
        .await;
    backoffice.seed_account("ACC-1", None).await;

    let input = rule(
        "dup_key",
        RuleSeverity::Warn,
        RuleScope::Global,
        None,
        "order.quantity",
        PredicateOperator::Le,
        json!(1),
        vec![EvaluationPoint::PreTrade],
    );
    let rule_id = backoffice
        .runtime
        .compliance
        .create_rule(input.clone(), Uuid::new_v4())
        .await
        .unwrap();
    wait_until("rule to project", || async {
        backoffice.read.get_rule(rule_id).await.ok().flatten().is_some()
    })
    .await;

    // Duplicate key conflicts
    let err = backoffice
        .runtime
        .compliance
        .create_rule(input, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));
    assert_eq!(err.status_code(), 409);

    // Trip an evaluation, then deletion is refused
    let _ = backoffice
        .runtime
        .oms
        .create_order(market_order(dec!(1000)), Uuid::new_v4())
        .await;
    wait_until("evaluation counter to move", || async {
        backoffice
            .read
            .get_rule(rule_id)
            .await
            .ok()
            .flatten()
            .map(|r| r.evaluation_count > 0)
            .unwrap_or(false)
    })
    .await;

    let err = backoffice
        .runtime
        .compliance
        .delete_rule(rule_id, "compliance-officer", Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));

    // Disabled rules stop evaluating
    backoffice
        .runtime
        .compliance
        .disable_rule(rule_id, "compliance-officer", Uuid::new_v4())
        .await
        .unwrap();
    wait_until("rule to deactivate", || async {
        backoffice
            .read
            .get_rule(rule_id)
            .await
            .ok()
            .flatten()
            .map(|r| r.status == RuleStatus::Inactive)
            .unwrap_or(false)
    })
    .await;

    let correlation = Uuid::new_v4();
    let order_id = backoffice
        .runtime
        .oms
        .create_order(market_order(dec!(1000)), correlation)
        .await
        .expect("inactive rule no longer warns");
    wait_until("order approved with rule disabled", || async {
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

    backoffice.shutdown().await;
}

/// Updating a rule bumps its version and the new threshold applies.
#[tokio::test]
async fn rule_update_bumps_version() {
    let backoffice = TestBackoffice::start();
    backoffice.seed_account("ACC-1", None).await;

    let rule_id = backoffice
        .runtime
        .compliance
        .create_rule(
            rule(
                "versioned",
                RuleSeverity::Warn,
                RuleScope::Global,
                None,
                "order.quantity",
                PredicateOperator::Le,
                json!(1000),
                vec![EvaluationPoint::PreTrade],
            ),
            Uuid::new_v4(),
        )
        .await
        .unwrap();
    wait_until("rule v1 to project", || async {
        backoffice.read.get_rule(rule_id).await.ok().flatten().is_some()
    })
    .await;

    backoffice
        .runtime
        .compliance
        .update_rule(
            rule_id,
            rule(
                "versioned",
                RuleSeverity::Warn,
                RuleScope::Global,
                None,
                "order.quantity",
                PredicateOperator::Le,
                json!(5000),
                vec![EvaluationPoint::PreTrade],
            ),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

    wait_until("rule v2 to project", || async {
        backoffice
            .read
            .get_rule(rule_id)
            .await
            .ok()
            .flatten()
            .map(|r| r.version == 2 && r.predicate.value == json!(5000))
            .unwrap_or(false)
    })
    .await;

    backoffice.shutdown().await;
}
