//! Execution and fill read model projection.

use std::sync::Arc;

use async_trait::async_trait;

use backoffice_common::error::CoreResult;
use backoffice_common::events::{
    from_payload, Event, EventType, ExecutionRequestedPayload, ExecutionSimulatedPayload,
    FillGeneratedPayload, OrderFullyFilledPayload, OrderPartiallyFilledPayload,
    SettlementBookedPayload,
};
use backoffice_common::executions::{Execution, Fill};

use crate::projections::EventConsumer;
use crate::readmodel::ReadModelStore;

/// Maintains the `executions` and `fills` tables from simulation events.
pub struct EmsProjection {
    read: Arc<dyn ReadModelStore>,
}

impl EmsProjection {
    pub fn new(read: Arc<dyn ReadModelStore>) -> Self {
        Self { read }
    }

    async fn on_execution_requested(&self, event: &Event) -> CoreResult<()> {
        let payload: ExecutionRequestedPayload = from_payload(&event.payload)?;
        let execution = Execution {
            execution_id: payload.execution_id,
            order_id: payload.order_id,
            account_id: payload.account_id,
            instrument_id: payload.instrument_id,
            side: payload.side,
            total_quantity: payload.total_quantity,
            filled_quantity: payload.filled_quantity,
            avg_fill_price: None,
            status: payload.status,
            as_of_date: payload.as_of_date,
            slippage_total: None,
            slippage_breakdown: None,
            deterministic_inputs: None,
            execution_start_time: None,
            execution_end_time: None,
            settlement_date: None,
            settled_at: None,
            explanation: None,
            created_at: event.occurred_at,
            updated_at: event.occurred_at,
        };
        self.read.upsert_execution(execution).await?;
        Ok(())
    }

    async fn on_fill_generated(&self, event: &Event) -> CoreResult<()> {
        let payload: FillGeneratedPayload = from_payload(&event.payload)?;
        let fill = Fill {
            fill_id: payload.fill_id,
            execution_id: payload.execution_id,
            clip_index: payload.clip_index,
            quantity: payload.quantity,
            price: payload.price,
            timestamp: payload.timestamp,
            slippage_bps: payload.slippage_bps,
            created_at: event.occurred_at,
        };
        self.read.upsert_fill(fill).await?;
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for EmsProjection {
    fn name(&self) -> &'static str {
        "ems-projection"
    }

    async fn handle(&self, event: &Event) -> CoreResult<()> {
        match event.event_type {
            EventType::ExecutionRequested => self.on_execution_requested(event).await,
            EventType::ExecutionSimulated => {
                let payload: ExecutionSimulatedPayload = from_payload(&event.payload)?;
                self.read
                    .apply_execution_simulated(&payload, event.occurred_at)
                    .await?;
                Ok(())
            }
            EventType::FillGenerated => self.on_fill_generated(event).await,
            EventType::OrderPartiallyFilled => {
                let payload: OrderPartiallyFilledPayload = from_payload(&event.payload)?;
                self.read
                    .set_execution_partially_filled(
                        payload.execution_id,
                        payload.filled_quantity,
                        event.occurred_at,
                    )
                    .await?;
                Ok(())
            }
            EventType::OrderFullyFilled => {
                let payload: OrderFullyFilledPayload = from_payload(&event.payload)?;
                self.read
                    .set_execution_filled(
                        payload.execution_id,
                        payload.filled_quantity,
                        payload.avg_fill_price,
                        event.occurred_at,
                    )
                    .await?;
                Ok(())
            }
            EventType::SettlementBooked => {
                let payload: SettlementBookedPayload = from_payload(&event.payload)?;
                self.read
                    .set_execution_settled(
                        payload.execution_id,
                        payload.settlement_date,
                        event.occurred_at,
                    )
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
