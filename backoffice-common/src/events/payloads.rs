//! Typed payload variants per event type.
//!
//! The envelope carries open-schema JSON; these structs are the typed
//! in-process view. Optional fields are omitted from the wire form so
//! the schema can grow additively, and readers tolerate extra keys.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::compliance::{
    ComplianceResult, ComplianceStatus, EvaluationPoint, Predicate, RuleScope, RuleSeverity,
    RuleStatus, ViolationSummary,
};
use crate::error::SerializationError;
use crate::executions::{DeterministicInputs, ExecutionStatus, SlippageBreakdown};
use crate::orders::{OrderSide, OrderState, OrderType, TimeInForce};
use crate::portfolio::{
    BucketWeights, PortfolioAnalytics, ProposalStatus, ProposalTrade, TargetConstraints,
    TargetScope,
};

/// Encode a typed payload into the envelope's JSON representation.
pub fn to_payload<T: Serialize>(payload: &T) -> Result<Value, SerializationError> {
    Ok(serde_json::to_value(payload)?)
}

/// Decode an envelope payload into its typed view.
pub fn from_payload<T: DeserializeOwned>(payload: &Value) -> Result<T, SerializationError> {
    Ok(serde_json::from_value(payload.clone())?)
}

// ---------------------------------------------------------------------
// OMS payloads
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedPayload {
    pub order_id: Uuid,
    pub account_id: String,
    pub instrument_id: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_spread_bp: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub state: OrderState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub created_by: String,
}

/// Only the changed fields are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAmendedPayload {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_spread_bp: Option<Decimal>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderApprovalRequestedPayload {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderApprovedPayload {
    pub order_id: Uuid,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelledPayload {
    pub order_id: Uuid,
    pub cancelled_by: String,
    pub cancelled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSentToEmsPayload {
    pub order_id: Uuid,
    pub sent_by: String,
    pub sent_to_ems_at: DateTime<Utc>,
}

/// Aggregate compliance outcome stored against the order for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderComplianceCheckedPayload {
    pub order_id: Uuid,
    pub compliance_result: ComplianceResult,
    pub status: ComplianceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBlockedPayload {
    pub order_id: Uuid,
    pub blocks: Vec<ViolationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWarnedPayload {
    pub order_id: Uuid,
    pub warnings: Vec<ViolationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBlockedPayload {
    pub order_id: Uuid,
    pub blocks: Vec<ViolationSummary>,
}

/// Synthetic create-order command routed from a PMS proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderCommandPayload {
    pub account_id: String,
    pub instrument_id: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub created_by: String,
}

// ---------------------------------------------------------------------
// EMS payloads
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequestedPayload {
    pub execution_id: Uuid,
    pub order_id: Uuid,
    pub account_id: String,
    pub instrument_id: String,
    pub side: OrderSide,
    pub total_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: ExecutionStatus,
    pub as_of_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillGeneratedPayload {
    pub fill_id: Uuid,
    pub execution_id: Uuid,
    pub clip_index: i32,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub slippage_bps: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPartiallyFilledPayload {
    pub order_id: Uuid,
    pub execution_id: Uuid,
    pub filled_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSimulatedPayload {
    pub execution_id: Uuid,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub slippage_total: Decimal,
    pub slippage_breakdown: SlippageBreakdown,
    pub deterministic_inputs: DeterministicInputs,
    pub status: ExecutionStatus,
    pub execution_start_time: DateTime<Utc>,
    pub execution_end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFullyFilledPayload {
    pub order_id: Uuid,
    pub execution_id: Uuid,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Decimal,
}

/// Carries the execution fields inline so position projections can fall
/// back to the payload when the execution row has not landed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBookedPayload {
    pub execution_id: Uuid,
    pub order_id: Uuid,
    pub account_id: String,
    pub instrument_id: String,
    pub side: OrderSide,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub settlement_date: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Compliance payloads
// ---------------------------------------------------------------------

/// Shared by RuleCreated and RuleUpdated (version differs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpsertPayload {
    pub rule_id: Uuid,
    pub rule_key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: i32,
    pub severity: RuleSeverity,
    pub scope: RuleScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub predicate: Predicate,
    pub explanation_template: String,
    pub evaluation_points: Vec<EvaluationPoint>,
    pub status: RuleStatus,
    pub effective_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set_id: Option<Uuid>,
    pub created_by: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatusPayload {
    pub rule_id: Uuid,
    pub status: RuleStatus,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDeletedPayload {
    pub rule_id: Uuid,
    pub deleted_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetPublishedPayload {
    pub rule_set_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: i32,
    pub status: String,
    pub effective_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    pub published_by: String,
}

/// One rule evaluated against one order at one lifecycle point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluatedPayload {
    pub evaluation_id: Uuid,
    pub rule_id: Uuid,
    pub rule_version: i32,
    pub order_id: Uuid,
    pub account_id: String,
    pub evaluation_point: EvaluationPoint,
    pub result: ComplianceStatus,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metric_value: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub threshold: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metric_snapshot: Value,
    pub explanation: String,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleViolationDetectedPayload {
    pub violation_id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub rule_version: i32,
    pub severity: RuleSeverity,
    pub scope: RuleScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub order_id: Uuid,
    pub account_id: String,
    pub evaluation_point: EvaluationPoint,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metric_value: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub threshold: Value,
    pub status: String,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metric_snapshot: Value,
    pub evaluated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// PMS payloads
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSetPayload {
    pub target_id: Uuid,
    pub scope: TargetScope,
    pub scope_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub duration_target: Decimal,
    #[serde(default)]
    pub bucket_weights: BucketWeights,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TargetConstraints>,
    pub effective_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRequestedPayload {
    pub proposal_id: Uuid,
    pub scope: TargetScope,
    pub scope_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<Uuid>,
    pub duration_target: Decimal,
    #[serde(default)]
    pub bucket_weights: BucketWeights,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TargetConstraints>,
    pub as_of_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalGeneratedPayload {
    pub proposal_id: Uuid,
    pub scope: TargetScope,
    pub scope_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<Uuid>,
    pub as_of_date: DateTime<Utc>,
    pub trades: Vec<ProposalTrade>,
    pub current_analytics: PortfolioAnalytics,
    pub predicted_analytics: PortfolioAnalytics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assumptions: Option<String>,
    pub status: ProposalStatus,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalApprovedPayload {
    pub proposal_id: Uuid,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSentToOmsPayload {
    pub proposal_id: Uuid,
    pub sent_by: String,
    pub sent_at: DateTime<Utc>,
}
