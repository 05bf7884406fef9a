//! Execution simulator: deterministic fill generation driven by
//! dispatch events.
//!
//! Each dispatched order is sliced into clips sized by the instrument's
//! maturity bucket. Per clip the simulator prices spread, size impact
//! (scaled by clip utilization), and side impact in basis points,
//! clamps LIMIT orders at their limit price, and accumulates
//! quantity-weighted slippage. One trigger produces one bounded
//! sequence: ExecutionRequested, fills with partial-fill notifications,
//! ExecutionSimulated, OrderFullyFilled, SettlementBooked, all linked
//! by causation to the trigger.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;
use uuid::Uuid;

use backoffice_common::error::{CoreError, CoreResult, ValidationError};
use backoffice_common::events::{
    to_payload, Actor, Aggregate, Event, EventType, ExecutionRequestedPayload,
    ExecutionSimulatedPayload, FillGeneratedPayload, OrderFullyFilledPayload,
    OrderPartiallyFilledPayload, OrderSentToEmsPayload, SettlementBookedPayload,
};
use backoffice_common::executions::{
    DeterministicInputs, ExecutionStatus, RequestExecutionRequest, SlippageBreakdown,
};
use backoffice_common::orders::{Order, OrderSide, OrderType};

use crate::projections::EventConsumer;
use crate::readmodel::ReadModelStore;
use crate::store::EventPipeline;

const SIMULATION_EXPLANATION: &str =
    "Deterministic execution simulation using bucketed liquidity profile.";

/// Liquidity parameters for one maturity bucket.
#[derive(Debug, Clone, Copy)]
struct LiquidityProfile {
    bucket: &'static str,
    max_clip: Decimal,
    spread_bps: Decimal,
    size_impact_bps: Decimal,
    side_impact_bps: Decimal,
}

const BUCKET_PROFILES: [LiquidityProfile; 5] = [
    LiquidityProfile {
        bucket: "0-2Y",
        max_clip: dec!(100000),
        spread_bps: dec!(0.6),
        size_impact_bps: dec!(0.2),
        side_impact_bps: dec!(0.10),
    },
    LiquidityProfile {
        bucket: "2-5Y",
        max_clip: dec!(75000),
        spread_bps: dec!(0.9),
        size_impact_bps: dec!(0.35),
        side_impact_bps: dec!(0.12),
    },
    LiquidityProfile {
        bucket: "5-10Y",
        max_clip: dec!(50000),
        spread_bps: dec!(1.3),
        size_impact_bps: dec!(0.5),
        side_impact_bps: dec!(0.15),
    },
    LiquidityProfile {
        bucket: "10-30Y",
        max_clip: dec!(35000),
        spread_bps: dec!(1.8),
        size_impact_bps: dec!(0.7),
        side_impact_bps: dec!(0.20),
    },
    LiquidityProfile {
        bucket: "30Y+",
        max_clip: dec!(30000),
        spread_bps: dec!(2.2),
        size_impact_bps: dec!(0.9),
        side_impact_bps: dec!(0.25),
    },
];

/// Classify years-to-maturity into a bucket with bounds
/// (-inf,2] (2,5] (5,10] (10,30] (30,inf).
fn bucket_profile(years_to_maturity: f64) -> &'static LiquidityProfile {
    let index = if years_to_maturity <= 2.0 {
        0
    } else if years_to_maturity <= 5.0 {
        1
    } else if years_to_maturity <= 10.0 {
        2
    } else if years_to_maturity <= 30.0 {
        3
    } else {
        4
    };
    &BUCKET_PROFILES[index]
}

/// Deterministic execution simulator.
pub struct EmsService {
    pipeline: EventPipeline,
    read: Arc<dyn ReadModelStore>,
}

impl EmsService {
    pub fn new(pipeline: EventPipeline, read: Arc<dyn ReadModelStore>) -> Self {
        Self { pipeline, read }
    }

    /// Manual simulation request, outside the dispatch flow.
    pub async fn request_execution(
        &self,
        request: RequestExecutionRequest,
        correlation_id: Uuid,
    ) -> CoreResult<Uuid> {
        if request.requested_by.is_empty() {
            return Err(ValidationError::required("requestedBy").into());
        }
        self.run_simulation(
            request.order_id,
            &request.requested_by,
            correlation_id,
            request.as_of_date,
            None,
        )
        .await
    }

    async fn run_simulation(
        &self,
        order_id: Uuid,
        actor_id: &str,
        correlation_id: Uuid,
        as_of_override: Option<DateTime<Utc>>,
        trigger: Option<&Event>,
    ) -> CoreResult<Uuid> {
        let order = self
            .read
            .get_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", order_id))?;
        let instrument = self
            .read
            .get_instrument(&order.instrument_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Instrument", &order.instrument_id))?;

        let as_of = as_of_override.unwrap_or_else(Utc::now);
        let profile = bucket_profile(instrument.years_to_maturity(as_of));

        let mut baseline_price = instrument.ask_price.unwrap_or(dec!(100));
        if order.order_type == OrderType::CurveRelative {
            if let Some(spread_bp) = order.curve_spread_bp {
                baseline_price *= Decimal::ONE + spread_bp / dec!(10000);
            }
        }

        let execution_id = Uuid::new_v4();
        let execution_start = Utc::now();
        let side_sign = order.side.sign();
        let actor = Actor::user(actor_id);

        let deterministic_inputs = DeterministicInputs {
            baseline_price,
            maturity_bucket: profile.bucket.to_string(),
            max_clip: profile.max_clip,
            spread_bps: profile.spread_bps,
            size_impact_bps: profile.size_impact_bps,
            side_impact_bps: profile.side_impact_bps,
        };

        info!(
            %order_id,
            %execution_id,
            bucket = profile.bucket,
            quantity = %order.quantity,
            "running execution simulation"
        );

        self.emit_derived(
            Event::new(
                EventType::ExecutionRequested,
                Aggregate::execution(execution_id),
                actor.clone(),
                correlation_id,
                to_payload(&ExecutionRequestedPayload {
                    execution_id,
                    order_id: order.order_id,
                    account_id: order.account_id.clone(),
                    instrument_id: order.instrument_id.clone(),
                    side: order.side,
                    total_quantity: order.quantity,
                    filled_quantity: Decimal::ZERO,
                    status: ExecutionStatus::Pending,
                    as_of_date: as_of,
                })?,
            ),
            trigger,
        )
        .await?;

        let mut total_filled = Decimal::ZERO;
        let mut total_notional = Decimal::ZERO;
        let mut slippage_weighted = Decimal::ZERO;
        let mut spread_weighted = Decimal::ZERO;
        let mut size_weighted = Decimal::ZERO;
        let mut side_weighted = Decimal::ZERO;
        let mut clip_index: i32 = 0;

        while total_filled < order.quantity {
            clip_index += 1;
            let remaining = order.quantity - total_filled;
            let clip_quantity = profile.max_clip.min(remaining);

            // Spread and side impact apply in full per clip; size impact
            // scales with clip utilization
            let size_factor = clip_quantity / profile.max_clip;
            let sized_impact_bps = profile.size_impact_bps * size_factor;
            let total_bps =
                (profile.spread_bps + sized_impact_bps + profile.side_impact_bps) * side_sign;

            let mut price = baseline_price * (Decimal::ONE + total_bps / dec!(10000));
            price = clamp_to_limit(&order, price);

            let slippage_bps =
                (price - baseline_price) / baseline_price * dec!(10000) * side_sign;

            slippage_weighted += slippage_bps * clip_quantity;
            spread_weighted += profile.spread_bps * side_sign * clip_quantity;
            size_weighted += sized_impact_bps * side_sign * clip_quantity;
            side_weighted += profile.side_impact_bps * side_sign * clip_quantity;

            self.emit_derived(
                Event::new(
                    EventType::FillGenerated,
                    Aggregate::execution(execution_id),
                    actor.clone(),
                    correlation_id,
                    to_payload(&FillGeneratedPayload {
                        fill_id: Uuid::new_v4(),
                        execution_id,
                        clip_index,
                        quantity: clip_quantity,
                        price,
                        timestamp: Utc::now(),
                        slippage_bps,
                    })?,
                ),
                trigger,
            )
            .await?;

            total_filled += clip_quantity;
            total_notional += clip_quantity * price;

            if total_filled < order.quantity {
                self.emit_derived(
                    Event::new(
                        EventType::OrderPartiallyFilled,
                        Aggregate::order(order.order_id),
                        actor.clone(),
                        correlation_id,
                        to_payload(&OrderPartiallyFilledPayload {
                            order_id: order.order_id,
                            execution_id,
                            filled_quantity: total_filled,
                        })?,
                    ),
                    trigger,
                )
                .await?;
            }
        }

        let avg_fill_price = if total_filled > Decimal::ZERO {
            total_notional / total_filled
        } else {
            Decimal::ZERO
        };
        let (slippage_total, breakdown) = if total_filled > Decimal::ZERO {
            (
                slippage_weighted / total_filled,
                SlippageBreakdown {
                    bucket_spread: spread_weighted / total_filled,
                    size_impact: size_weighted / total_filled,
                    side_impact: side_weighted / total_filled,
                },
            )
        } else {
            (Decimal::ZERO, SlippageBreakdown::default())
        };

        self.emit_derived(
            Event::new(
                EventType::ExecutionSimulated,
                Aggregate::execution(execution_id),
                actor.clone(),
                correlation_id,
                to_payload(&ExecutionSimulatedPayload {
                    execution_id,
                    filled_quantity: total_filled,
                    avg_fill_price,
                    slippage_total,
                    slippage_breakdown: breakdown,
                    deterministic_inputs,
                    status: ExecutionStatus::Simulating,
                    execution_start_time: execution_start,
                    execution_end_time: Utc::now(),
                    explanation: Some(SIMULATION_EXPLANATION.to_string()),
                })?,
            )
            .with_explanation(SIMULATION_EXPLANATION),
            trigger,
        )
        .await?;

        self.emit_derived(
            Event::new(
                EventType::OrderFullyFilled,
                Aggregate::order(order.order_id),
                actor.clone(),
                correlation_id,
                to_payload(&OrderFullyFilledPayload {
                    order_id: order.order_id,
                    execution_id,
                    filled_quantity: total_filled,
                    avg_fill_price,
                })?,
            ),
            trigger,
        )
        .await?;

        let settlement_date = as_of + Duration::hours(24);
        self.emit_derived(
            Event::new(
                EventType::SettlementBooked,
                Aggregate::execution(execution_id),
                actor,
                correlation_id,
                to_payload(&SettlementBookedPayload {
                    execution_id,
                    order_id: order.order_id,
                    account_id: order.account_id.clone(),
                    instrument_id: order.instrument_id.clone(),
                    side: order.side,
                    filled_quantity: total_filled,
                    avg_fill_price,
                    settlement_date,
                })?,
            ),
            trigger,
        )
        .await?;

        Ok(execution_id)
    }

    async fn emit_derived(&self, mut event: Event, trigger: Option<&Event>) -> CoreResult<()> {
        if let Some(trigger) = trigger {
            event = event.derived_from(trigger);
        }
        self.pipeline.emit(event).await?;
        Ok(())
    }
}

/// LIMIT orders never fill through their limit: buys cap at it, sells
/// floor at it.
fn clamp_to_limit(order: &Order, price: Decimal) -> Decimal {
    if order.order_type != OrderType::Limit {
        return price;
    }
    let Some(limit) = order.limit_price else {
        return price;
    };
    match order.side {
        OrderSide::Buy if price > limit => limit,
        OrderSide::Sell if price < limit => limit,
        _ => price,
    }
}

#[async_trait]
impl EventConsumer for EmsService {
    fn name(&self) -> &'static str {
        "ems-simulator"
    }

    async fn handle(&self, event: &Event) -> CoreResult<()> {
        if event.event_type != EventType::OrderSentToEMS {
            return Ok(());
        }
        let payload: OrderSentToEmsPayload = backoffice_common::events::from_payload(&event.payload)?;
        self.run_simulation(
            payload.order_id,
            &event.actor.actor_id,
            event.correlation_id,
            None,
            Some(event),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_common::instruments::Instrument;
    use backoffice_common::orders::{OrderState, TimeInForce};
    use crate::bus::EventBus;
    use crate::readmodel::MemoryReadModels;
    use crate::store::{EventStore, MemoryEventStore};

    struct Fixture {
        ems: EmsService,
        events: Arc<MemoryEventStore>,
        read: Arc<MemoryReadModels>,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(MemoryEventStore::new());
        let read = Arc::new(MemoryReadModels::new());
        let bus = Arc::new(EventBus::new());
        let pipeline = EventPipeline::new(events.clone(), bus);
        Fixture {
            ems: EmsService::new(pipeline, read.clone()),
            events,
            read,
        }
    }

    async fn seed(
        fixture: &Fixture,
        years: i64,
        ask: Decimal,
        side: OrderSide,
        quantity: Decimal,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        curve_spread_bp: Option<Decimal>,
    ) -> Uuid {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        fixture
            .read
            .upsert_instrument(Instrument {
                cusip: "912828XG55".to_string(),
                name: "UST".to_string(),
                maturity_date: now + Duration::days(365 * years),
                ask_price: Some(ask),
                ask_modified_duration: Some(dec!(6.0)),
                coupon: None,
                coupon_frequency: None,
            })
            .await
            .unwrap();
        fixture
            .read
            .upsert_order(Order {
                order_id,
                account_id: "ACC-1".to_string(),
                instrument_id: "912828XG55".to_string(),
                side,
                quantity,
                order_type,
                limit_price,
                curve_spread_bp,
                time_in_force: TimeInForce::Day,
                state: OrderState::Approved,
                batch_id: None,
                compliance_result: None,
                created_at: now,
                created_by: "trader-1".to_string(),
                updated_at: now,
                last_state_change_at: now,
                sent_to_ems_at: None,
                fully_filled_at: None,
                settled_at: None,
            })
            .await
            .unwrap();
        order_id
    }

    fn fills_of(events: &[Event]) -> Vec<FillGeneratedPayload> {
        events
            .iter()
            .filter(|e| e.event_type == EventType::FillGenerated)
            .map(|e| backoffice_common::events::from_payload(&e.payload).unwrap())
            .collect()
    }

    #[test]
    fn test_bucket_classification() {
        assert_eq!(bucket_profile(1.0).bucket, "0-2Y");
        assert_eq!(bucket_profile(2.0).bucket, "0-2Y");
        assert_eq!(bucket_profile(2.1).bucket, "2-5Y");
        assert_eq!(bucket_profile(5.0).bucket, "2-5Y");
        assert_eq!(bucket_profile(7.0).bucket, "5-10Y");
        assert_eq!(bucket_profile(10.0).bucket, "5-10Y");
        assert_eq!(bucket_profile(30.0).bucket, "10-30Y");
        assert_eq!(bucket_profile(31.0).bucket, "30Y+");
        assert_eq!(bucket_profile(-0.5).bucket, "0-2Y");
    }

    /// BUY 500k of a 7Y at ask 100, limit 101: ten 50k clips priced at
    /// 100 * (1 + 1.95bp), no clamp.
    #[tokio::test]
    async fn test_happy_path_buy_ten_clips() {
        let fixture = fixture();
        let order_id = seed(
            &fixture,
            7,
            dec!(100),
            OrderSide::Buy,
            dec!(500000),
            OrderType::Limit,
            Some(dec!(101)),
            None,
        )
        .await;

        let correlation = Uuid::new_v4();
        let execution_id = fixture
            .ems
            .request_execution(
                RequestExecutionRequest {
                    order_id,
                    as_of_date: None,
                    requested_by: "trader-1".to_string(),
                },
                correlation,
            )
            .await
            .unwrap();

        let events = fixture.events.by_correlation(correlation).await.unwrap();
        let fills = fills_of(&events);
        assert_eq!(fills.len(), 10);

        let total: Decimal = fills.iter().map(|f| f.quantity).sum();
        assert_eq!(total, dec!(500000));

        let indexes: Vec<i32> = fills.iter().map(|f| f.clip_index).collect();
        assert_eq!(indexes, (1..=10).collect::<Vec<i32>>());

        for fill in &fills {
            assert_eq!(fill.price, dec!(100.0195));
            assert_eq!(fill.execution_id, execution_id);
        }

        // Nine partial-fill notifications, then exactly one of each
        // terminal event
        let count = |t: EventType| events.iter().filter(|e| e.event_type == t).count();
        assert_eq!(count(EventType::OrderPartiallyFilled), 9);
        assert_eq!(count(EventType::ExecutionRequested), 1);
        assert_eq!(count(EventType::ExecutionSimulated), 1);
        assert_eq!(count(EventType::OrderFullyFilled), 1);
        assert_eq!(count(EventType::SettlementBooked), 1);

        let simulated: ExecutionSimulatedPayload = events
            .iter()
            .find(|e| e.event_type == EventType::ExecutionSimulated)
            .map(|e| backoffice_common::events::from_payload(&e.payload).unwrap())
            .unwrap();
        assert_eq!(simulated.avg_fill_price, dec!(100.0195));
        assert!(simulated.avg_fill_price >= dec!(100.0145));
        assert!(simulated.avg_fill_price <= dec!(100.020));
        assert_eq!(simulated.slippage_total, dec!(1.95));
    }

    /// SELL 30k of a 30Y+ at market: one clip at 100 * (1 - 3.35bp).
    #[tokio::test]
    async fn test_single_clip_sell() {
        let fixture = fixture();
        let order_id = seed(
            &fixture,
            40,
            dec!(100),
            OrderSide::Sell,
            dec!(30000),
            OrderType::Market,
            None,
            None,
        )
        .await;

        let correlation = Uuid::new_v4();
        fixture
            .ems
            .request_execution(
                RequestExecutionRequest {
                    order_id,
                    as_of_date: None,
                    requested_by: "trader-1".to_string(),
                },
                correlation,
            )
            .await
            .unwrap();

        let events = fixture.events.by_correlation(correlation).await.unwrap();
        let fills = fills_of(&events);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(99.9665));
        // Adverse move for a sell reads as positive slippage
        assert_eq!(fills[0].slippage_bps, dec!(3.35));
        assert!(events
            .iter()
            .all(|e| e.event_type != EventType::OrderPartiallyFilled));
    }

    /// BUY 100k 2-5Y limit 95 under a baseline of 100: every computed
    /// price exceeds the limit, so every fill clamps to exactly 95.
    #[tokio::test]
    async fn test_limit_clamp() {
        let fixture = fixture();
        let order_id = seed(
            &fixture,
            4,
            dec!(100),
            OrderSide::Buy,
            dec!(100000),
            OrderType::Limit,
            Some(dec!(95)),
            None,
        )
        .await;

        let correlation = Uuid::new_v4();
        fixture
            .ems
            .request_execution(
                RequestExecutionRequest {
                    order_id,
                    as_of_date: None,
                    requested_by: "trader-1".to_string(),
                },
                correlation,
            )
            .await
            .unwrap();

        let events = fixture.events.by_correlation(correlation).await.unwrap();
        let fills = fills_of(&events);
        assert_eq!(fills.len(), 2); // 75k + 25k
        for fill in &fills {
            assert_eq!(fill.price, dec!(95));
        }

        let simulated: ExecutionSimulatedPayload = events
            .iter()
            .find(|e| e.event_type == EventType::ExecutionSimulated)
            .map(|e| backoffice_common::events::from_payload(&e.payload).unwrap())
            .unwrap();
        assert_eq!(simulated.avg_fill_price, dec!(95));
    }

    /// CURVE_RELATIVE scales the baseline by the spread before pricing.
    #[tokio::test]
    async fn test_curve_relative_baseline() {
        let fixture = fixture();
        let order_id = seed(
            &fixture,
            1,
            dec!(100),
            OrderSide::Buy,
            dec!(1000),
            OrderType::CurveRelative,
            None,
            Some(dec!(100)), // +100bp -> baseline 101
        )
        .await;

        let correlation = Uuid::new_v4();
        fixture
            .ems
            .request_execution(
                RequestExecutionRequest {
                    order_id,
                    as_of_date: None,
                    requested_by: "trader-1".to_string(),
                },
                correlation,
            )
            .await
            .unwrap();

        let events = fixture.events.by_correlation(correlation).await.unwrap();
        let simulated: ExecutionSimulatedPayload = events
            .iter()
            .find(|e| e.event_type == EventType::ExecutionSimulated)
            .map(|e| backoffice_common::events::from_payload(&e.payload).unwrap())
            .unwrap();
        assert_eq!(simulated.deterministic_inputs.baseline_price, dec!(101));
    }

    /// Every derived event of a simulation shares the trigger's
    /// correlation and cites it as causation.
    #[tokio::test]
    async fn test_causation_links_to_trigger() {
        let fixture = fixture();
        let order_id = seed(
            &fixture,
            1,
            dec!(100),
            OrderSide::Buy,
            dec!(1000),
            OrderType::Market,
            None,
            None,
        )
        .await;

        let correlation = Uuid::new_v4();
        let trigger = Event::new(
            EventType::OrderSentToEMS,
            Aggregate::order(order_id),
            Actor::user("trader-1"),
            correlation,
            to_payload(&OrderSentToEmsPayload {
                order_id,
                sent_by: "trader-1".to_string(),
                sent_to_ems_at: Utc::now(),
            })
            .unwrap(),
        );
        let trigger = fixture.ems.pipeline.emit(trigger).await.unwrap();

        fixture.ems.handle(&trigger).await.unwrap();

        let events = fixture.events.by_correlation(correlation).await.unwrap();
        assert!(events.len() > 1);
        for event in events.iter().filter(|e| e.event_id != trigger.event_id) {
            assert_eq!(event.causation_id, Some(trigger.event_id));
            assert_eq!(event.correlation_id, correlation);
        }
    }

    #[tokio::test]
    async fn test_missing_order_and_instrument() {
        let fixture = fixture();
        let err = fixture
            .ems
            .request_execution(
                RequestExecutionRequest {
                    order_id: Uuid::new_v4(),
                    as_of_date: None,
                    requested_by: "trader-1".to_string(),
                },
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "Order", .. }));

        // Order present but its instrument is not
        let order_id = seed(
            &fixture,
            7,
            dec!(100),
            OrderSide::Buy,
            dec!(1000),
            OrderType::Market,
            None,
            None,
        )
        .await;
        let mut order = fixture.read.get_order(order_id).await.unwrap().unwrap();
        order.instrument_id = "UNKNOWN-CUSIP".to_string();
        fixture.read.upsert_order(order).await.unwrap();
        let err = fixture
            .ems
            .request_execution(
                RequestExecutionRequest {
                    order_id,
                    as_of_date: None,
                    requested_by: "trader-1".to_string(),
                },
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotFound {
                entity: "Instrument",
                ..
            }
        ));
    }
}
