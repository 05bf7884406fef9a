//! Portfolio management engine: targets, optimization proposals, and
//! routing approved proposals into the OMS as command events.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;
use uuid::Uuid;

use backoffice_common::error::{CoreError, CoreResult, ValidationError};
use backoffice_common::events::{
    to_payload, Actor, Aggregate, Event, EventType, CreateOrderCommandPayload,
    OptimizationRequestedPayload, ProposalApprovedPayload, ProposalGeneratedPayload,
    ProposalSentToOmsPayload, TargetSetPayload,
};
use backoffice_common::orders::{OrderSide, OrderType, TimeInForce};
use backoffice_common::portfolio::{
    ApproveProposalRequest, PortfolioAnalytics, Position, ProposalStatus, ProposalTrade,
    RunOptimizationRequest, SendProposalToOmsRequest, SetTargetRequest, TargetScope,
};

use crate::readmodel::ReadModelStore;
use crate::store::EventPipeline;

/// A duration gap smaller than this produces an empty proposal.
const DURATION_GAP_THRESHOLD: Decimal = dec!(0.01);
/// Floor for the notional base when sizing a rebalancing trade.
const MIN_NOTIONAL_BASE: Decimal = dec!(100000);

/// Portfolio targets and optimization engine.
pub struct PmsService {
    pipeline: EventPipeline,
    read: Arc<dyn ReadModelStore>,
}

impl PmsService {
    pub fn new(pipeline: EventPipeline, read: Arc<dyn ReadModelStore>) -> Self {
        Self { pipeline, read }
    }

    /// Create or replace a portfolio target.
    pub async fn set_target(
        &self,
        request: SetTargetRequest,
        correlation_id: Uuid,
    ) -> CoreResult<Uuid> {
        if request.scope_id.is_empty() {
            return Err(ValidationError::required("scopeId").into());
        }
        if request.created_by.is_empty() {
            return Err(ValidationError::required("createdBy").into());
        }
        if request.duration_target <= Decimal::ZERO {
            return Err(
                ValidationError::invalid("durationTarget", "must be greater than 0").into(),
            );
        }

        let target_id = request.target_id.unwrap_or_else(Uuid::new_v4);
        let account_id = match request.scope {
            TargetScope::Account => Some(request.scope_id.clone()),
            TargetScope::Household => None,
        };

        let payload = TargetSetPayload {
            target_id,
            scope: request.scope,
            scope_id: request.scope_id,
            model_id: request.model_id,
            duration_target: request.duration_target,
            bucket_weights: request.bucket_weights,
            constraints: request.constraints,
            effective_from: request.effective_from.unwrap_or_else(Utc::now),
            effective_to: request.effective_to,
            created_by: request.created_by.clone(),
            account_id,
        };
        self.pipeline
            .emit(Event::new(
                EventType::TargetSet,
                Aggregate::portfolio(target_id),
                Actor::user(&request.created_by),
                correlation_id,
                to_payload(&payload)?,
            ))
            .await?;

        Ok(target_id)
    }

    /// Generate an optimization proposal for the scope's positions.
    pub async fn run_optimization(
        &self,
        request: RunOptimizationRequest,
        correlation_id: Uuid,
    ) -> CoreResult<Uuid> {
        if request.scope_id.is_empty() {
            return Err(ValidationError::required("scopeId").into());
        }
        if request.requested_by.is_empty() {
            return Err(ValidationError::required("requestedBy").into());
        }

        let as_of = request.as_of_date.unwrap_or_else(Utc::now);
        let positions = self.positions_for_scope(request.scope, &request.scope_id).await?;
        let current = compute_analytics(&positions);

        // A stored target, when resolvable, overrides the inline one
        let mut target_duration = request.duration_target;
        let mut target_id = request.target_id;
        if let Some(id) = request.target_id {
            if let Some(target) = self.read.get_target(id).await? {
                target_duration = target.duration_target;
                target_id = Some(target.target_id);
            }
        }

        let (trades, predicted) = self
            .build_proposal_trades(&positions, &current, target_duration)
            .await?;

        let proposal_id = Uuid::new_v4();
        info!(
            %proposal_id,
            scope = %request.scope,
            scope_id = %request.scope_id,
            trade_count = trades.len(),
            "optimization proposal generated"
        );

        let optimization = Event::new(
            EventType::OptimizationRequested,
            Aggregate::portfolio(proposal_id),
            Actor::user(&request.requested_by),
            correlation_id,
            to_payload(&OptimizationRequestedPayload {
                proposal_id,
                scope: request.scope,
                scope_id: request.scope_id.clone(),
                target_id,
                duration_target: request.duration_target,
                bucket_weights: request.bucket_weights.clone(),
                constraints: request.constraints.clone(),
                as_of_date: as_of,
            })?,
        );
        let optimization = self.pipeline.emit(optimization).await?;

        let (account_id, household_id) = match request.scope {
            TargetScope::Account => (Some(request.scope_id.clone()), None),
            TargetScope::Household => (None, Some(request.scope_id.clone())),
        };

        let generated = Event::new(
            EventType::ProposalGenerated,
            Aggregate::proposal(proposal_id),
            Actor::user(&request.requested_by),
            correlation_id,
            to_payload(&ProposalGeneratedPayload {
                proposal_id,
                scope: request.scope,
                scope_id: request.scope_id,
                account_id,
                household_id,
                target_id,
                as_of_date: as_of,
                trades,
                current_analytics: current,
                predicted_analytics: predicted,
                assumptions: request.assumptions,
                status: ProposalStatus::Draft,
                created_by: request.requested_by.clone(),
            })?,
        )
        .derived_from(&optimization);
        self.pipeline.emit(generated).await?;

        Ok(proposal_id)
    }

    /// Approve a draft proposal.
    pub async fn approve_proposal(
        &self,
        request: ApproveProposalRequest,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        if request.approved_by.is_empty() {
            return Err(ValidationError::required("approvedBy").into());
        }
        self.read
            .get_proposal(request.proposal_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Proposal", request.proposal_id))?;

        let payload = ProposalApprovedPayload {
            proposal_id: request.proposal_id,
            approved_by: request.approved_by.clone(),
            approved_at: Utc::now(),
        };
        self.pipeline
            .emit(Event::new(
                EventType::ProposalApproved,
                Aggregate::proposal(request.proposal_id),
                Actor::user(&request.approved_by),
                correlation_id,
                to_payload(&payload)?,
            ))
            .await?;
        Ok(())
    }

    /// Emit a synthetic create-order command per proposal trade, then
    /// mark the proposal sent.
    pub async fn send_proposal_to_oms(
        &self,
        request: SendProposalToOmsRequest,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        if request.sent_by.is_empty() {
            return Err(ValidationError::required("sentBy").into());
        }

        let proposal = self
            .read
            .get_proposal(request.proposal_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Proposal", request.proposal_id))?;
        let account_id = proposal
            .account_id
            .clone()
            .ok_or_else(|| CoreError::conflict("proposal missing accountId for OMS routing"))?;

        for trade in &proposal.trades {
            let command = CreateOrderCommandPayload {
                account_id: account_id.clone(),
                instrument_id: trade.instrument_id.clone(),
                side: trade.side,
                quantity: trade.quantity,
                order_type: OrderType::Market,
                time_in_force: TimeInForce::Day,
                created_by: request.sent_by.clone(),
            };
            self.pipeline
                .emit(Event::new(
                    EventType::CreateOrder,
                    Aggregate::order(Uuid::new_v4()),
                    Actor::user(&request.sent_by),
                    correlation_id,
                    to_payload(&command)?,
                ))
                .await?;
        }

        let payload = ProposalSentToOmsPayload {
            proposal_id: request.proposal_id,
            sent_by: request.sent_by.clone(),
            sent_at: Utc::now(),
        };
        self.pipeline
            .emit(Event::new(
                EventType::ProposalSentToOMS,
                Aggregate::proposal(request.proposal_id),
                Actor::user(&request.sent_by),
                correlation_id,
                to_payload(&payload)?,
            ))
            .await?;
        Ok(())
    }

    async fn positions_for_scope(
        &self,
        scope: TargetScope,
        scope_id: &str,
    ) -> CoreResult<Vec<Position>> {
        let positions = match scope {
            TargetScope::Account => self.read.positions_by_account(scope_id).await?,
            TargetScope::Household => self.read.positions_by_household(scope_id).await?,
        };
        Ok(positions)
    }

    /// Close the duration gap with a single trade in the position with
    /// the highest duration: buy to extend, sell to shorten.
    async fn build_proposal_trades(
        &self,
        positions: &[Position],
        current: &PortfolioAnalytics,
        target_duration: Decimal,
    ) -> CoreResult<(Vec<ProposalTrade>, PortfolioAnalytics)> {
        let mut predicted = current.clone();

        let delta = target_duration - current.total_duration;
        if delta.abs() < DURATION_GAP_THRESHOLD {
            return Ok((Vec::new(), predicted));
        }

        let Some(candidate) = positions.iter().max_by(|a, b| a.duration.cmp(&b.duration)) else {
            return Ok((Vec::new(), predicted));
        };

        let instrument = self.read.get_instrument(&candidate.instrument_id).await?;
        let mut price = instrument
            .as_ref()
            .and_then(|i| i.ask_price)
            .unwrap_or(Decimal::ZERO);
        if price <= Decimal::ZERO {
            price = candidate.avg_cost;
        }
        if price <= Decimal::ZERO {
            price = dec!(100);
        }

        let side = if delta > Decimal::ZERO {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };

        let notional_base = current.total_market_value.max(MIN_NOTIONAL_BASE);
        let quantity = (delta.abs() * notional_base
            / (candidate.duration.max(dec!(0.01)) * price))
            .max(Decimal::ONE);
        let trade_value = quantity * price;

        let trades = vec![ProposalTrade {
            side,
            instrument_id: candidate.instrument_id.clone(),
            cusip: Some(candidate.instrument_id.clone()),
            description: instrument.map(|i| i.name),
            quantity,
            estimated_price: price,
            estimated_value: trade_value,
        }];

        if current.total_market_value > Decimal::ZERO {
            let new_market_value = match side {
                OrderSide::Buy => current.total_market_value + trade_value,
                OrderSide::Sell => (current.total_market_value - trade_value).max(Decimal::ZERO),
            };
            predicted.total_market_value = new_market_value;
            if new_market_value > Decimal::ZERO {
                predicted.total_duration = (current.total_duration * current.total_market_value
                    + candidate.duration * trade_value * side.sign())
                    / new_market_value;
            }
            predicted.total_dv01 =
                predicted.total_market_value * predicted.total_duration * dec!(0.0001);
        }

        Ok((trades, predicted))
    }
}

/// Market-value weighted duration, summed dv01, over one scope.
fn compute_analytics(positions: &[Position]) -> PortfolioAnalytics {
    let total_market_value: Decimal = positions.iter().map(|p| p.market_value).sum();
    let total_dv01: Decimal = positions.iter().map(|p| p.dv01).sum();

    let total_duration = if total_market_value > Decimal::ZERO {
        positions
            .iter()
            .map(|p| p.duration * p.market_value)
            .sum::<Decimal>()
            / total_market_value
    } else {
        Decimal::ZERO
    };

    PortfolioAnalytics {
        total_market_value,
        total_duration,
        total_dv01,
        cash_balance: Decimal::ZERO,
        cash_percentage: Decimal::ZERO,
        bucket_weights: Default::default(),
    }
}
