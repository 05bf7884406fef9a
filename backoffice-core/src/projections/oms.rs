//! Order read model projection.

use std::sync::Arc;

use async_trait::async_trait;

use backoffice_common::error::CoreResult;
use backoffice_common::events::{
    from_payload, Event, EventType, OrderAmendedPayload, OrderApprovalRequestedPayload,
    OrderApprovedPayload, OrderBlockedPayload, OrderCancelledPayload, OrderComplianceCheckedPayload,
    OrderCreatedPayload, OrderFullyFilledPayload, OrderPartiallyFilledPayload,
    OrderSentToEmsPayload, SettlementBookedPayload,
};
use backoffice_common::orders::{Order, OrderState};

use crate::projections::EventConsumer;
use crate::readmodel::ReadModelStore;

/// Maintains the `orders` table from order lifecycle events.
pub struct OmsProjection {
    read: Arc<dyn ReadModelStore>,
}

impl OmsProjection {
    pub fn new(read: Arc<dyn ReadModelStore>) -> Self {
        Self { read }
    }

    async fn on_order_created(&self, event: &Event) -> CoreResult<()> {
        let payload: OrderCreatedPayload = from_payload(&event.payload)?;
        let order = Order {
            order_id: payload.order_id,
            account_id: payload.account_id,
            instrument_id: payload.instrument_id,
            side: payload.side,
            quantity: payload.quantity,
            order_type: payload.order_type,
            limit_price: payload.limit_price,
            curve_spread_bp: payload.curve_spread_bp,
            time_in_force: payload.time_in_force,
            state: payload.state,
            batch_id: payload.batch_id,
            compliance_result: None,
            created_at: event.occurred_at,
            created_by: payload.created_by,
            updated_at: event.occurred_at,
            last_state_change_at: event.occurred_at,
            sent_to_ems_at: None,
            fully_filled_at: None,
            settled_at: None,
        };
        self.read.upsert_order(order).await?;
        Ok(())
    }

    async fn on_order_amended(&self, event: &Event) -> CoreResult<()> {
        let payload: OrderAmendedPayload = from_payload(&event.payload)?;
        self.read
            .amend_order(payload.order_id, &payload, event.occurred_at)
            .await?;
        Ok(())
    }

    async fn on_rule_evaluated(&self, event: &Event) -> CoreResult<()> {
        // Only the OMS-side summary event carries a complianceResult;
        // the per-rule evaluations are handled by the compliance
        // projection.
        if event.payload.get("complianceResult").is_none() {
            return Ok(());
        }
        let payload: OrderComplianceCheckedPayload = from_payload(&event.payload)?;
        self.read
            .set_order_compliance_result(
                payload.order_id,
                &payload.compliance_result,
                event.occurred_at,
            )
            .await?;
        Ok(())
    }

    async fn set_state(&self, event: &Event, order_id: uuid::Uuid, state: OrderState) -> CoreResult<()> {
        self.read
            .set_order_state(order_id, state, event.occurred_at)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for OmsProjection {
    fn name(&self) -> &'static str {
        "oms-projection"
    }

    async fn handle(&self, event: &Event) -> CoreResult<()> {
        match event.event_type {
            EventType::OrderCreated => self.on_order_created(event).await,
            EventType::OrderAmended => self.on_order_amended(event).await,
            EventType::OrderApprovalRequested => {
                let payload: OrderApprovalRequestedPayload = from_payload(&event.payload)?;
                self.set_state(event, payload.order_id, OrderState::ApprovalPending)
                    .await
            }
            EventType::OrderApproved => {
                let payload: OrderApprovedPayload = from_payload(&event.payload)?;
                self.set_state(event, payload.order_id, OrderState::Approved)
                    .await
            }
            EventType::OrderBlockedByCompliance => {
                let payload: OrderBlockedPayload = from_payload(&event.payload)?;
                self.set_state(event, payload.order_id, OrderState::Rejected)
                    .await
            }
            EventType::OrderRejected => {
                if let Some(order_id) = event.payload_uuid("orderId") {
                    self.set_state(event, order_id, OrderState::Rejected).await?;
                }
                Ok(())
            }
            EventType::OrderCancelled => {
                let payload: OrderCancelledPayload = from_payload(&event.payload)?;
                self.set_state(event, payload.order_id, OrderState::Cancelled)
                    .await
            }
            EventType::OrderSentToEMS => {
                let payload: OrderSentToEmsPayload = from_payload(&event.payload)?;
                self.read
                    .mark_order_sent_to_ems(payload.order_id, event.occurred_at)
                    .await?;
                Ok(())
            }
            EventType::OrderPartiallyFilled => {
                let payload: OrderPartiallyFilledPayload = from_payload(&event.payload)?;
                self.set_state(event, payload.order_id, OrderState::PartiallyFilled)
                    .await
            }
            EventType::OrderFullyFilled => {
                let payload: OrderFullyFilledPayload = from_payload(&event.payload)?;
                self.read
                    .mark_order_fully_filled(payload.order_id, event.occurred_at)
                    .await?;
                Ok(())
            }
            EventType::SettlementBooked => {
                let payload: SettlementBookedPayload = from_payload(&event.payload)?;
                self.read
                    .mark_order_settled(payload.order_id, event.occurred_at)
                    .await?;
                Ok(())
            }
            EventType::RuleEvaluated => self.on_rule_evaluated(event).await,
            _ => Ok(()),
        }
    }
}
