//! Portfolio read model projection: positions, targets, proposals.
//!
//! Settlement handling reads the execution row written by the EMS
//! projection. Because projections run concurrently that row may not
//! exist yet, so the read retries before falling back to the execution
//! fields inlined in the settlement payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use backoffice_common::error::CoreResult;
use backoffice_common::events::{
    from_payload, Event, EventType, OptimizationRequestedPayload, ProposalApprovedPayload,
    ProposalGeneratedPayload, ProposalSentToOmsPayload, SettlementBookedPayload, TargetSetPayload,
};
use backoffice_common::orders::OrderSide;
use backoffice_common::portfolio::{PortfolioTarget, Position, Proposal, TargetScope};

use crate::projections::EventConsumer;
use crate::readmodel::ReadModelStore;

/// Attempts to read the execution row before using the payload fallback.
const EXECUTION_READ_RETRIES: u32 = 15;
/// Sleep between attempts.
const EXECUTION_READ_DELAY: Duration = Duration::from_millis(500);
/// Positions within this of zero are removed.
const POSITION_EPSILON: Decimal = dec!(0.000001);

struct ExecutionSnapshot {
    account_id: String,
    instrument_id: String,
    side: OrderSide,
    filled_quantity: Decimal,
    avg_fill_price: Decimal,
}

/// Maintains the `positions`, `portfolio_targets`, and `proposals`
/// tables.
pub struct PmsProjection {
    read: Arc<dyn ReadModelStore>,
}

impl PmsProjection {
    pub fn new(read: Arc<dyn ReadModelStore>) -> Self {
        Self { read }
    }

    async fn execution_snapshot(
        &self,
        payload: &SettlementBookedPayload,
    ) -> CoreResult<ExecutionSnapshot> {
        for attempt in 0..EXECUTION_READ_RETRIES {
            if let Some(execution) = self.read.get_execution(payload.execution_id).await? {
                return Ok(ExecutionSnapshot {
                    account_id: execution.account_id,
                    instrument_id: execution.instrument_id,
                    side: execution.side,
                    filled_quantity: execution.filled_quantity,
                    avg_fill_price: execution.avg_fill_price.unwrap_or(Decimal::ZERO),
                });
            }
            debug!(
                execution_id = %payload.execution_id,
                attempt,
                "execution row not yet projected, retrying"
            );
            tokio::time::sleep(EXECUTION_READ_DELAY).await;
        }

        // The settlement payload carries the execution fields for
        // exactly this case.
        Ok(ExecutionSnapshot {
            account_id: payload.account_id.clone(),
            instrument_id: payload.instrument_id.clone(),
            side: payload.side,
            filled_quantity: payload.filled_quantity,
            avg_fill_price: payload.avg_fill_price,
        })
    }

    async fn on_settlement_booked(&self, event: &Event) -> CoreResult<()> {
        let payload: SettlementBookedPayload = from_payload(&event.payload)?;
        let execution = self.execution_snapshot(&payload).await?;

        let instrument = self.read.get_instrument(&execution.instrument_id).await?;
        let (ask_price, duration) = instrument
            .map(|i| {
                (
                    i.ask_price.unwrap_or(Decimal::ZERO),
                    i.ask_modified_duration.unwrap_or(Decimal::ZERO),
                )
            })
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        let mut price = ask_price;
        if price <= Decimal::ZERO {
            price = execution.avg_fill_price;
        }
        if price <= Decimal::ZERO {
            price = dec!(100);
        }

        let existing = self
            .read
            .get_position(&execution.account_id, &execution.instrument_id)
            .await?;
        let (existing_quantity, existing_avg_cost) = existing
            .map(|p| (p.quantity, p.avg_cost))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        let signed_quantity = execution.filled_quantity * execution.side.sign();
        let new_quantity = existing_quantity + signed_quantity;

        // Only buys move the weighted average cost; a flat or short
        // position carries no cost basis.
        let mut new_avg_cost = existing_avg_cost;
        if signed_quantity > Decimal::ZERO && new_quantity > Decimal::ZERO {
            let total_cost = existing_avg_cost * existing_quantity + signed_quantity * price;
            new_avg_cost = total_cost / new_quantity;
        }
        if new_quantity <= Decimal::ZERO {
            new_avg_cost = Decimal::ZERO;
        }

        if new_quantity.abs() < POSITION_EPSILON {
            self.read
                .delete_position(&execution.account_id, &execution.instrument_id)
                .await?;
            return Ok(());
        }

        let market_value = new_quantity * price;
        let dv01 = market_value * duration * dec!(0.0001);

        self.read
            .upsert_position(Position {
                account_id: execution.account_id,
                instrument_id: execution.instrument_id,
                quantity: new_quantity,
                avg_cost: new_avg_cost,
                market_value,
                duration,
                dv01,
                updated_at: event.occurred_at,
            })
            .await?;
        Ok(())
    }

    async fn on_target_set(&self, event: &Event) -> CoreResult<()> {
        let payload: TargetSetPayload = from_payload(&event.payload)?;
        let account_id = match payload.scope {
            TargetScope::Account => Some(payload.scope_id.clone()),
            TargetScope::Household => None,
        };
        self.read
            .upsert_target(PortfolioTarget {
                target_id: payload.target_id,
                scope: payload.scope,
                scope_id: payload.scope_id,
                model_id: payload.model_id,
                duration_target: payload.duration_target,
                bucket_weights: payload.bucket_weights,
                constraints: payload.constraints,
                effective_from: payload.effective_from,
                effective_to: payload.effective_to,
                created_at: event.occurred_at,
                created_by: payload.created_by,
                account_id,
            })
            .await?;
        Ok(())
    }

    async fn on_proposal_generated(&self, event: &Event) -> CoreResult<()> {
        let payload: ProposalGeneratedPayload = from_payload(&event.payload)?;
        self.read
            .upsert_proposal(Proposal {
                proposal_id: payload.proposal_id,
                account_id: payload.account_id,
                household_id: payload.household_id,
                as_of_date: payload.as_of_date,
                target_id: payload.target_id,
                trades: payload.trades,
                current_analytics: payload.current_analytics,
                predicted_analytics: payload.predicted_analytics,
                assumptions: payload.assumptions,
                status: payload.status,
                created_at: event.occurred_at,
                created_by: payload.created_by,
                approved_at: None,
                approved_by: None,
                sent_to_oms_at: None,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for PmsProjection {
    fn name(&self) -> &'static str {
        "pms-projection"
    }

    async fn handle(&self, event: &Event) -> CoreResult<()> {
        match event.event_type {
            EventType::SettlementBooked => self.on_settlement_booked(event).await,
            EventType::TargetSet => self.on_target_set(event).await,
            EventType::ProposalGenerated => self.on_proposal_generated(event).await,
            EventType::ProposalApproved => {
                let payload: ProposalApprovedPayload = from_payload(&event.payload)?;
                self.read
                    .set_proposal_approved(
                        payload.proposal_id,
                        &payload.approved_by,
                        payload.approved_at,
                    )
                    .await?;
                Ok(())
            }
            EventType::ProposalSentToOMS => {
                let payload: ProposalSentToOmsPayload = from_payload(&event.payload)?;
                self.read
                    .set_proposal_sent_to_oms(payload.proposal_id, payload.sent_at)
                    .await?;
                Ok(())
            }
            EventType::OptimizationRequested => {
                // Audit-only; the proposal row lands with ProposalGenerated
                let _: OptimizationRequestedPayload = from_payload(&event.payload)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_common::events::{to_payload, Actor, Aggregate};
    use backoffice_common::executions::{Execution, ExecutionStatus};
    use backoffice_common::instruments::Instrument;
    use crate::readmodel::MemoryReadModels;
    use chrono::Utc;
    use uuid::Uuid;

    fn settlement_event(
        execution_id: Uuid,
        side: OrderSide,
        filled: Decimal,
        avg_price: Decimal,
    ) -> Event {
        let payload = SettlementBookedPayload {
            execution_id,
            order_id: Uuid::new_v4(),
            account_id: "ACC-1".to_string(),
            instrument_id: "912828XG55".to_string(),
            side,
            filled_quantity: filled,
            avg_fill_price: avg_price,
            settlement_date: Utc::now() + chrono::Duration::hours(24),
        };
        Event::new(
            EventType::SettlementBooked,
            Aggregate::execution(execution_id),
            Actor::user("trader-1"),
            Uuid::new_v4(),
            to_payload(&payload).unwrap(),
        )
    }

    async fn seed_execution(
        read: &MemoryReadModels,
        execution_id: Uuid,
        side: OrderSide,
        filled: Decimal,
        avg_price: Decimal,
    ) {
        read.upsert_execution(Execution {
            execution_id,
            order_id: Uuid::new_v4(),
            account_id: "ACC-1".to_string(),
            instrument_id: "912828XG55".to_string(),
            side,
            total_quantity: filled,
            filled_quantity: filled,
            avg_fill_price: Some(avg_price),
            status: ExecutionStatus::Filled,
            as_of_date: Utc::now(),
            slippage_total: None,
            slippage_breakdown: None,
            deterministic_inputs: None,
            execution_start_time: None,
            execution_end_time: None,
            settlement_date: None,
            settled_at: None,
            explanation: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    /// Buy 1000@100, sell 400@101 (avg cost unchanged), sell 600@99
    /// (row deleted).
    #[tokio::test]
    async fn test_settlement_position_sequence() {
        let read = Arc::new(MemoryReadModels::new());
        let projection = PmsProjection::new(read.clone());

        read.upsert_instrument(Instrument {
            cusip: "912828XG55".to_string(),
            name: "UST 7Y".to_string(),
            maturity_date: Utc::now() + chrono::Duration::days(365 * 7),
            ask_price: Some(dec!(100)),
            ask_modified_duration: Some(dec!(6.2)),
            coupon: None,
            coupon_frequency: None,
        })
        .await
        .unwrap();

        let buy = Uuid::new_v4();
        seed_execution(&read, buy, OrderSide::Buy, dec!(1000), dec!(100)).await;
        projection
            .handle(&settlement_event(buy, OrderSide::Buy, dec!(1000), dec!(100)))
            .await
            .unwrap();

        let position = read
            .get_position("ACC-1", "912828XG55")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.quantity, dec!(1000));
        assert_eq!(position.avg_cost, dec!(100));
        assert_eq!(position.market_value, dec!(100000));
        assert_eq!(position.dv01, dec!(100000) * dec!(6.2) * dec!(0.0001));

        let sell_partial = Uuid::new_v4();
        seed_execution(&read, sell_partial, OrderSide::Sell, dec!(400), dec!(101)).await;
        projection
            .handle(&settlement_event(
                sell_partial,
                OrderSide::Sell,
                dec!(400),
                dec!(101),
            ))
            .await
            .unwrap();

        let position = read
            .get_position("ACC-1", "912828XG55")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.quantity, dec!(600));
        // Sells never move the average cost
        assert_eq!(position.avg_cost, dec!(100));

        let sell_flat = Uuid::new_v4();
        seed_execution(&read, sell_flat, OrderSide::Sell, dec!(600), dec!(99)).await;
        projection
            .handle(&settlement_event(
                sell_flat,
                OrderSide::Sell,
                dec!(600),
                dec!(99),
            ))
            .await
            .unwrap();

        assert!(read
            .get_position("ACC-1", "912828XG55")
            .await
            .unwrap()
            .is_none());
    }

    /// With no execution row, the handler retries then falls back to
    /// the payload fields. Paused time makes the retry sleeps instant.
    #[tokio::test(start_paused = true)]
    async fn test_settlement_falls_back_to_payload() {
        let read = Arc::new(MemoryReadModels::new());
        let projection = PmsProjection::new(read.clone());

        projection
            .handle(&settlement_event(
                Uuid::new_v4(),
                OrderSide::Buy,
                dec!(500),
                dec!(101),
            ))
            .await
            .unwrap();

        let position = read
            .get_position("ACC-1", "912828XG55")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.quantity, dec!(500));
        // No instrument row: price falls back to the average fill
        assert_eq!(position.avg_cost, dec!(101));
    }

    #[tokio::test]
    async fn test_buying_more_reweights_cost_basis() {
        let read = Arc::new(MemoryReadModels::new());
        let projection = PmsProjection::new(read.clone());

        read.upsert_instrument(Instrument {
            cusip: "912828XG55".to_string(),
            name: "UST 7Y".to_string(),
            maturity_date: Utc::now() + chrono::Duration::days(365 * 7),
            ask_price: Some(dec!(100)),
            ask_modified_duration: Some(dec!(6.2)),
            coupon: None,
            coupon_frequency: None,
        })
        .await
        .unwrap();

        let first = Uuid::new_v4();
        seed_execution(&read, first, OrderSide::Buy, dec!(100), dec!(100)).await;
        projection
            .handle(&settlement_event(first, OrderSide::Buy, dec!(100), dec!(100)))
            .await
            .unwrap();

        // Second buy at the ask price (100): 100@100 + 100@100 = avg 100
        let second = Uuid::new_v4();
        seed_execution(&read, second, OrderSide::Buy, dec!(100), dec!(102)).await;
        projection
            .handle(&settlement_event(second, OrderSide::Buy, dec!(100), dec!(102)))
            .await
            .unwrap();

        let position = read
            .get_position("ACC-1", "912828XG55")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.quantity, dec!(200));
        // Weighted with the ask price, which wins over avg fill
        assert_eq!(position.avg_cost, dec!(100));
    }

    #[tokio::test]
    async fn test_target_and_proposal_rows() {
        let read = Arc::new(MemoryReadModels::new());
        let projection = PmsProjection::new(read.clone());
        let target_id = Uuid::new_v4();

        let target = TargetSetPayload {
            target_id,
            scope: TargetScope::Account,
            scope_id: "ACC-1".to_string(),
            model_id: None,
            duration_target: dec!(5),
            bucket_weights: Default::default(),
            constraints: None,
            effective_from: Utc::now(),
            effective_to: None,
            created_by: "pm-1".to_string(),
            account_id: Some("ACC-1".to_string()),
        };
        projection
            .handle(&Event::new(
                EventType::TargetSet,
                Aggregate::portfolio(target_id),
                Actor::user("pm-1"),
                Uuid::new_v4(),
                to_payload(&target).unwrap(),
            ))
            .await
            .unwrap();

        let stored = read.get_target(target_id).await.unwrap().unwrap();
        assert_eq!(stored.account_id.as_deref(), Some("ACC-1"));
        assert_eq!(stored.duration_target, dec!(5));
    }
}
