//! The in-process command surface.
//!
//! Transport (HTTP parsing, routing, CORS) is an external collaborator;
//! this module is the interface it calls. Commands arrive as a typed
//! envelope dispatched by `commandType`, every outcome echoes the
//! correlation id, and errors map 1:1 onto transport status codes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use backoffice_common::compliance::{RuleInput, RuleSetInput};
use backoffice_common::error::{CoreError, ValidationError};
use backoffice_common::events::from_payload;
use backoffice_common::executions::RequestExecutionRequest;
use backoffice_common::orders::{
    AmendOrderRequest, ApproveOrderRequest, BulkCreateRequest, CancelOrderRequest,
    CreateOrderRequest, SendToEmsRequest,
};
use backoffice_common::portfolio::{
    ApproveProposalRequest, RunOptimizationRequest, SendProposalToOmsRequest, SetTargetRequest,
};

use crate::compliance::ComplianceService;
use crate::ems::EmsService;
use crate::oms::OmsService;
use crate::pms::PmsService;

/// A command as received from the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command_type: String,
    /// Taken from X-Correlation-ID when the client supplies one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub payload: Value,
}

/// Successful command outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// 201 for creations, 200 otherwise
    pub status: u16,
    pub correlation_id: Uuid,
    pub result: Value,
}

/// Failed command outcome: status code plus the JSON error body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailure {
    pub status: u16,
    pub error: String,
    pub correlation_id: Uuid,
}

/// Use the client-supplied correlation id or start a new flow.
pub fn ensure_correlation(correlation_id: Option<Uuid>) -> Uuid {
    correlation_id.unwrap_or_else(Uuid::new_v4)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRuleCommand {
    rule_id: Uuid,
    #[serde(flatten)]
    input: RuleInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleActionCommand {
    rule_id: Uuid,
    actor_id: String,
}

/// Dispatches command envelopes to the owning engine.
pub struct CommandRouter {
    oms: Arc<OmsService>,
    ems: Arc<EmsService>,
    compliance: Arc<ComplianceService>,
    pms: Arc<PmsService>,
}

impl CommandRouter {
    pub fn new(
        oms: Arc<OmsService>,
        ems: Arc<EmsService>,
        compliance: Arc<ComplianceService>,
        pms: Arc<PmsService>,
    ) -> Self {
        Self {
            oms,
            ems,
            compliance,
            pms,
        }
    }

    /// Route one command. The correlation id in the response covers
    /// every event the command emitted.
    pub async fn dispatch(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<CommandResponse, CommandFailure> {
        let correlation_id = ensure_correlation(envelope.correlation_id);
        let fail = |err: CoreError| CommandFailure {
            status: err.status_code(),
            error: err.to_string(),
            correlation_id,
        };

        let (status, result) = match envelope.command_type.as_str() {
            "CreateOrder" => {
                let request: CreateOrderRequest = decode(&envelope.payload).map_err(fail)?;
                let order_id = self
                    .oms
                    .create_order(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (201, json!({ "orderId": order_id }))
            }
            "BulkCreateOrders" => {
                let request: BulkCreateRequest = decode(&envelope.payload).map_err(fail)?;
                let result = self
                    .oms
                    .bulk_create(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (201, serde_json::to_value(result).unwrap_or(Value::Null))
            }
            "AmendOrder" => {
                let request: AmendOrderRequest = decode(&envelope.payload).map_err(fail)?;
                let order_id = request.order_id;
                self.oms
                    .amend_order(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "orderId": order_id }))
            }
            "ApproveOrder" => {
                let request: ApproveOrderRequest = decode(&envelope.payload).map_err(fail)?;
                let order_id = request.order_id;
                self.oms
                    .approve_order(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "orderId": order_id }))
            }
            "CancelOrder" => {
                let request: CancelOrderRequest = decode(&envelope.payload).map_err(fail)?;
                let order_id = request.order_id;
                self.oms
                    .cancel_order(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "orderId": order_id }))
            }
            "SendOrderToEMS" => {
                let request: SendToEmsRequest = decode(&envelope.payload).map_err(fail)?;
                let order_id = request.order_id;
                self.oms
                    .send_to_ems(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "orderId": order_id }))
            }
            "RequestExecution" => {
                let request: RequestExecutionRequest = decode(&envelope.payload).map_err(fail)?;
                let execution_id = self
                    .ems
                    .request_execution(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (201, json!({ "executionId": execution_id }))
            }
            "CreateRule" => {
                let input: RuleInput = decode(&envelope.payload).map_err(fail)?;
                let rule_id = self
                    .compliance
                    .create_rule(input, correlation_id)
                    .await
                    .map_err(fail)?;
                (201, json!({ "ruleId": rule_id }))
            }
            "UpdateRule" => {
                let command: UpdateRuleCommand = decode(&envelope.payload).map_err(fail)?;
                let rule_id = self
                    .compliance
                    .update_rule(command.rule_id, command.input, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "ruleId": rule_id }))
            }
            "EnableRule" => {
                let command: RuleActionCommand = decode(&envelope.payload).map_err(fail)?;
                self.compliance
                    .enable_rule(command.rule_id, &command.actor_id, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "ruleId": command.rule_id }))
            }
            "DisableRule" => {
                let command: RuleActionCommand = decode(&envelope.payload).map_err(fail)?;
                self.compliance
                    .disable_rule(command.rule_id, &command.actor_id, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "ruleId": command.rule_id }))
            }
            "DeleteRule" => {
                let command: RuleActionCommand = decode(&envelope.payload).map_err(fail)?;
                self.compliance
                    .delete_rule(command.rule_id, &command.actor_id, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "ruleId": command.rule_id }))
            }
            "PublishRuleSet" => {
                let input: RuleSetInput = decode(&envelope.payload).map_err(fail)?;
                let rule_set_id = self
                    .compliance
                    .publish_rule_set(input, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "ruleSetId": rule_set_id }))
            }
            "SetTarget" => {
                let request: SetTargetRequest = decode(&envelope.payload).map_err(fail)?;
                let target_id = self
                    .pms
                    .set_target(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (201, json!({ "targetId": target_id }))
            }
            "RunOptimization" => {
                let request: RunOptimizationRequest = decode(&envelope.payload).map_err(fail)?;
                let proposal_id = self
                    .pms
                    .run_optimization(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (201, json!({ "proposalId": proposal_id }))
            }
            "ApproveProposal" => {
                let request: ApproveProposalRequest = decode(&envelope.payload).map_err(fail)?;
                let proposal_id = request.proposal_id;
                self.pms
                    .approve_proposal(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "proposalId": proposal_id }))
            }
            "SendProposalToOMS" => {
                let request: SendProposalToOmsRequest = decode(&envelope.payload).map_err(fail)?;
                let proposal_id = request.proposal_id;
                self.pms
                    .send_proposal_to_oms(request, correlation_id)
                    .await
                    .map_err(fail)?;
                (200, json!({ "proposalId": proposal_id }))
            }
            other => {
                return Err(fail(
                    ValidationError::invalid("commandType", format!("unknown command '{other}'"))
                        .into(),
                ))
            }
        };

        Ok(CommandResponse {
            status,
            correlation_id,
            result,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, CoreError> {
    from_payload(payload).map_err(CoreError::from)
}
