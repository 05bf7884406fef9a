//! Order management engine: validation, creation, amendment, approval,
//! cancellation, and dispatch to the execution simulator.
//!
//! Every operation appends exactly one root event before anything
//! downstream is emitted. Pre-trade compliance runs synchronously on
//! create; later lifecycle points re-evaluate via the compliance
//! listener's subscriptions.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use uuid::Uuid;

use backoffice_common::compliance::ComplianceStatus;
use backoffice_common::error::{CoreError, CoreResult, ValidationError};
use backoffice_common::events::{
    to_payload, Actor, Aggregate, Event, EventType, OrderApprovalRequestedPayload,
    OrderApprovedPayload, OrderAmendedPayload, OrderCancelledPayload,
    OrderComplianceCheckedPayload, OrderCreatedPayload, OrderSentToEmsPayload,
};
use backoffice_common::orders::{
    AmendOrderRequest, ApproveOrderRequest, BulkCreateLineResult, BulkCreateRequest,
    BulkCreateResult, CancelOrderRequest, CreateOrderRequest, Order, OrderState,
    SendToEmsRequest,
};

use crate::compliance::{ComplianceService, OrderSnapshot};
use crate::readmodel::ReadModelStore;
use crate::store::EventPipeline;

/// Orders above this size always route to manual approval.
const APPROVAL_QUANTITY_THRESHOLD: Decimal = dec!(1000000);

/// Order lifecycle engine.
pub struct OmsService {
    pipeline: EventPipeline,
    read: Arc<dyn ReadModelStore>,
    compliance: Arc<ComplianceService>,
}

impl OmsService {
    pub fn new(
        pipeline: EventPipeline,
        read: Arc<dyn ReadModelStore>,
        compliance: Arc<ComplianceService>,
    ) -> Self {
        Self {
            pipeline,
            read,
            compliance,
        }
    }

    /// Create an order and run pre-trade compliance.
    ///
    /// On a compliance block the order remains in the log for audit and
    /// the error carries its id.
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        correlation_id: Uuid,
    ) -> CoreResult<Uuid> {
        validate_create_request(&request)?;

        let order_id = Uuid::new_v4();
        let payload = OrderCreatedPayload {
            order_id,
            account_id: request.account_id.clone(),
            instrument_id: request.instrument_id.clone(),
            side: request.side,
            quantity: request.quantity,
            order_type: request.order_type,
            limit_price: request.limit_price,
            curve_spread_bp: request.curve_spread_bp,
            time_in_force: request.time_in_force,
            state: OrderState::Draft,
            batch_id: request.batch_id,
            created_by: request.created_by.clone(),
        };
        let created = self
            .pipeline
            .emit(Event::new(
                EventType::OrderCreated,
                Aggregate::order(order_id),
                Actor::user(&request.created_by),
                correlation_id,
                to_payload(&payload)?,
            ))
            .await?;
        info!(%order_id, account = %request.account_id, "order created");

        let snapshot = OrderSnapshot {
            order_id,
            account_id: request.account_id.clone(),
            instrument_id: request.instrument_id.clone(),
            side: request.side,
            quantity: request.quantity,
            order_type: request.order_type,
            limit_price: request.limit_price,
            curve_spread_bp: request.curve_spread_bp,
        };

        match self
            .compliance
            .evaluate_pre_trade(&snapshot, &request.created_by, correlation_id, Some(&created))
            .await
        {
            // Order creation stands even if the check itself fails
            Err(err) => warn!(%order_id, "pre-trade compliance check failed: {err}"),
            Ok(result) => {
                let summary = OrderComplianceCheckedPayload {
                    order_id,
                    compliance_result: result.clone(),
                    status: result.status,
                };
                let summary_event = Event::new(
                    EventType::RuleEvaluated,
                    Aggregate::order(order_id),
                    Actor::system(&request.created_by),
                    correlation_id,
                    to_payload(&summary)?,
                )
                .derived_from(&created);
                if let Err(err) = self.pipeline.emit(summary_event).await {
                    warn!(%order_id, "failed to store compliance summary: {err}");
                }

                if result.status == ComplianceStatus::Block {
                    return Err(CoreError::ComplianceBlocked { order_id });
                }

                if result.status == ComplianceStatus::Warn
                    || request.quantity > APPROVAL_QUANTITY_THRESHOLD
                {
                    self.pipeline
                        .emit(
                            Event::new(
                                EventType::OrderApprovalRequested,
                                Aggregate::order(order_id),
                                Actor::system(&request.created_by),
                                correlation_id,
                                to_payload(&OrderApprovalRequestedPayload { order_id })?,
                            )
                            .derived_from(&created),
                        )
                        .await?;
                } else {
                    // Clean pass below the approval threshold: approved
                    // with no human in the loop
                    self.pipeline
                        .emit(
                            Event::new(
                                EventType::OrderApproved,
                                Aggregate::order(order_id),
                                Actor::system(&request.created_by),
                                correlation_id,
                                to_payload(&OrderApprovedPayload {
                                    order_id,
                                    approved_by: "system".to_string(),
                                    approved_at: Utc::now(),
                                })?,
                            )
                            .derived_from(&created),
                        )
                        .await?;
                }
            }
        }

        Ok(order_id)
    }

    /// Amend an order; only the provided fields change. Compliance
    /// re-evaluation happens via the OrderAmended subscription.
    pub async fn amend_order(
        &self,
        request: AmendOrderRequest,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        if request.updated_by.is_empty() {
            return Err(ValidationError::required("updatedBy").into());
        }
        if let Some(quantity) = request.quantity {
            if quantity <= Decimal::ZERO {
                return Err(ValidationError::invalid("quantity", "must be greater than 0").into());
            }
        }

        let order = self.require_order(request.order_id).await?;
        if !order.state.is_amendable() {
            return Err(CoreError::conflict(format!(
                "order {} in state {} cannot be amended",
                order.order_id, order.state
            )));
        }

        let payload = OrderAmendedPayload {
            order_id: request.order_id,
            quantity: request.quantity,
            order_type: request.order_type,
            limit_price: request.limit_price,
            curve_spread_bp: request.curve_spread_bp,
            updated_by: request.updated_by.clone(),
        };
        self.pipeline
            .emit(Event::new(
                EventType::OrderAmended,
                Aggregate::order(request.order_id),
                Actor::user(&request.updated_by),
                correlation_id,
                to_payload(&payload)?,
            ))
            .await?;
        Ok(())
    }

    /// Approve an order waiting on a human.
    pub async fn approve_order(
        &self,
        request: ApproveOrderRequest,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        let order = self.require_order(request.order_id).await?;
        if order.state != OrderState::ApprovalPending {
            return Err(CoreError::conflict(format!(
                "order {} in state {} is not pending approval",
                order.order_id, order.state
            )));
        }

        let payload = OrderApprovedPayload {
            order_id: request.order_id,
            approved_by: request.approved_by.clone(),
            approved_at: Utc::now(),
        };
        self.pipeline
            .emit(Event::new(
                EventType::OrderApproved,
                Aggregate::order(request.order_id),
                Actor::user(&request.approved_by),
                correlation_id,
                to_payload(&payload)?,
            ))
            .await?;
        Ok(())
    }

    /// Cancel an order from any cancelable state.
    pub async fn cancel_order(
        &self,
        request: CancelOrderRequest,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        let order = self.require_order(request.order_id).await?;
        if !order.state.is_cancelable() {
            return Err(CoreError::conflict(format!(
                "order {} in state {} cannot be cancelled",
                order.order_id, order.state
            )));
        }

        let payload = OrderCancelledPayload {
            order_id: request.order_id,
            cancelled_by: request.cancelled_by.clone(),
            cancelled_at: Utc::now(),
            reason: request.reason,
        };
        self.pipeline
            .emit(Event::new(
                EventType::OrderCancelled,
                Aggregate::order(request.order_id),
                Actor::user(&request.cancelled_by),
                correlation_id,
                to_payload(&payload)?,
            ))
            .await?;
        Ok(())
    }

    /// Dispatch an approved order; the execution simulator consumes the
    /// resulting event.
    pub async fn send_to_ems(
        &self,
        request: SendToEmsRequest,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        let order = self.require_order(request.order_id).await?;
        if order.state != OrderState::Approved {
            return Err(CoreError::conflict(format!(
                "order {} in state {} cannot be sent to EMS",
                order.order_id, order.state
            )));
        }

        let payload = OrderSentToEmsPayload {
            order_id: request.order_id,
            sent_by: request.sent_by.clone(),
            sent_to_ems_at: Utc::now(),
        };
        self.pipeline
            .emit(Event::new(
                EventType::OrderSentToEMS,
                Aggregate::order(request.order_id),
                Actor::user(&request.sent_by),
                correlation_id,
                to_payload(&payload)?,
            ))
            .await?;
        Ok(())
    }

    /// Create a batch of orders under one batch id. A failing line does
    /// not abort the rest.
    pub async fn bulk_create(
        &self,
        request: BulkCreateRequest,
        correlation_id: Uuid,
    ) -> CoreResult<BulkCreateResult> {
        let batch_id = Uuid::new_v4();
        let mut results = Vec::with_capacity(request.orders.len());

        for (index, mut line) in request.orders.into_iter().enumerate() {
            line.batch_id = Some(batch_id);
            let result = match self.create_order(line, correlation_id).await {
                Ok(order_id) => BulkCreateLineResult {
                    index,
                    order_id: Some(order_id),
                    error: None,
                },
                // A blocked order still exists for audit; report both
                Err(CoreError::ComplianceBlocked { order_id }) => BulkCreateLineResult {
                    index,
                    order_id: Some(order_id),
                    error: Some("order blocked by compliance".to_string()),
                },
                Err(err) => BulkCreateLineResult {
                    index,
                    order_id: None,
                    error: Some(err.to_string()),
                },
            };
            results.push(result);
        }

        Ok(BulkCreateResult { batch_id, results })
    }

    async fn require_order(&self, order_id: Uuid) -> CoreResult<Order> {
        self.read
            .get_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", order_id))
    }
}

fn validate_create_request(request: &CreateOrderRequest) -> CoreResult<()> {
    if request.quantity <= Decimal::ZERO {
        return Err(ValidationError::invalid("quantity", "must be greater than 0").into());
    }
    if request.order_type.requires_limit_price() && request.limit_price.is_none() {
        return Err(
            ValidationError::invalid("limitPrice", "required for LIMIT orders").into(),
        );
    }
    if request.order_type.requires_curve_spread() && request.curve_spread_bp.is_none() {
        return Err(ValidationError::invalid(
            "curveSpreadBp",
            "required for CURVE_RELATIVE orders",
        )
        .into());
    }
    if request.created_by.is_empty() {
        return Err(ValidationError::required("createdBy").into());
    }
    Ok(())
}
