//! Compliance evaluator: rule lifecycle commands plus predicate
//! evaluation at three lifecycle checkpoints.
//!
//! Rule CRUD lives in `rules`; the evaluation procedure in `evaluator`.
//! The service doubles as an event consumer so amended, approved,
//! dispatched, and settled orders are re-evaluated asynchronously.

mod evaluator;
mod rules;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use backoffice_common::compliance::EvaluationPoint;
use backoffice_common::error::CoreResult;
use backoffice_common::events::{
    from_payload, Event, EventType, ExecutionRequestedPayload, OrderAmendedPayload,
    OrderApprovedPayload, SettlementBookedPayload,
};
use backoffice_common::orders::{Order, OrderSide, OrderType};

use crate::projections::EventConsumer;
use crate::readmodel::ReadModelStore;
use crate::store::EventPipeline;

/// The order fields compliance evaluates against.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub order_id: Uuid,
    pub account_id: String,
    pub instrument_id: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub curve_spread_bp: Option<Decimal>,
}

impl From<&Order> for OrderSnapshot {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id,
            account_id: order.account_id.clone(),
            instrument_id: order.instrument_id.clone(),
            side: order.side,
            quantity: order.quantity,
            order_type: order.order_type,
            limit_price: order.limit_price,
            curve_spread_bp: order.curve_spread_bp,
        }
    }
}

/// Rule management and evaluation engine.
pub struct ComplianceService {
    pipeline: EventPipeline,
    read: Arc<dyn ReadModelStore>,
}

impl ComplianceService {
    pub fn new(pipeline: EventPipeline, read: Arc<dyn ReadModelStore>) -> Self {
        Self { pipeline, read }
    }

    async fn snapshot_for(&self, order_id: Uuid) -> CoreResult<Option<OrderSnapshot>> {
        Ok(self
            .read
            .get_order(order_id)
            .await?
            .as_ref()
            .map(OrderSnapshot::from))
    }

    async fn evaluate_order_event(
        &self,
        order_id: Uuid,
        point: EvaluationPoint,
        event: &Event,
        overlay: Option<&OrderAmendedPayload>,
    ) -> CoreResult<()> {
        let Some(mut snapshot) = self.snapshot_for(order_id).await? else {
            warn!(%order_id, ?point, "evaluation skipped, order not yet projected");
            return Ok(());
        };

        // The amendment may not have reached the order projection yet;
        // the payload carries exactly the changed fields, so apply them
        // over the snapshot before evaluating.
        if let Some(amendment) = overlay {
            if let Some(quantity) = amendment.quantity {
                snapshot.quantity = quantity;
            }
            if let Some(order_type) = amendment.order_type {
                snapshot.order_type = order_type;
            }
            if let Some(limit_price) = amendment.limit_price {
                snapshot.limit_price = Some(limit_price);
            }
            if let Some(curve_spread_bp) = amendment.curve_spread_bp {
                snapshot.curve_spread_bp = Some(curve_spread_bp);
            }
        }

        self.evaluate(
            &snapshot,
            point,
            &event.actor.actor_id,
            event.correlation_id,
            Some(event),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for ComplianceService {
    fn name(&self) -> &'static str {
        "compliance-listener"
    }

    async fn handle(&self, event: &Event) -> CoreResult<()> {
        match event.event_type {
            EventType::OrderAmended => {
                let payload: OrderAmendedPayload = from_payload(&event.payload)?;
                self.evaluate_order_event(
                    payload.order_id,
                    EvaluationPoint::PreTrade,
                    event,
                    Some(&payload),
                )
                .await
            }
            EventType::OrderApproved => {
                let payload: OrderApprovedPayload = from_payload(&event.payload)?;
                self.evaluate_order_event(payload.order_id, EvaluationPoint::PreExecution, event, None)
                    .await
            }
            EventType::ExecutionRequested => {
                let payload: ExecutionRequestedPayload = from_payload(&event.payload)?;
                self.evaluate_order_event(payload.order_id, EvaluationPoint::PreExecution, event, None)
                    .await
            }
            EventType::SettlementBooked => {
                let payload: SettlementBookedPayload = from_payload(&event.payload)?;
                self.evaluate_order_event(payload.order_id, EvaluationPoint::PostTrade, event, None)
                    .await
            }
            _ => Ok(()),
        }
    }
}
