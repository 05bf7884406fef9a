//! Portfolio management types: targets, analytics, proposals, positions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::orders::OrderSide;

/// Bucket label → weight, keyed by maturity bucket.
pub type BucketWeights = BTreeMap<String, Decimal>;

/// Scope of a portfolio target or optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetScope {
    Account,
    Household,
}

impl fmt::Display for TargetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetScope::Account => write!(f, "account"),
            TargetScope::Household => write!(f, "household"),
        }
    }
}

/// Status of an optimization proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Draft,
    Approved,
    Rejected,
    SentToOms,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Draft => write!(f, "DRAFT"),
            ProposalStatus::Approved => write!(f, "APPROVED"),
            ProposalStatus::Rejected => write!(f, "REJECTED"),
            ProposalStatus::SentToOms => write!(f, "SENT_TO_OMS"),
        }
    }
}

/// Optional constraints on a portfolio target.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_position_size: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_size: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turnover: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blacklist: Vec<String>,
}

/// Aggregate analytics over a set of positions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioAnalytics {
    pub total_market_value: Decimal,
    pub total_duration: Decimal,
    pub total_dv01: Decimal,
    pub cash_balance: Decimal,
    pub cash_percentage: Decimal,
    #[serde(default)]
    pub bucket_weights: BucketWeights,
}

/// One proposed trade inside an optimization proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalTrade {
    pub side: OrderSide,
    pub instrument_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cusip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub quantity: Decimal,
    pub estimated_price: Decimal,
    pub estimated_value: Decimal,
}

/// Position read model row for (account, instrument).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub account_id: String,
    pub instrument_id: String,
    /// May be negative after sells
    pub quantity: Decimal,
    /// Recomputed on buys only; zero once flat
    pub avg_cost: Decimal,
    pub market_value: Decimal,
    pub duration: Decimal,
    pub dv01: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Portfolio target read model row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioTarget {
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
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

/// Optimization proposal read model row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub proposal_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
    pub as_of_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<Uuid>,
    pub trades: Vec<ProposalTrade>,
    pub current_analytics: PortfolioAnalytics,
    pub predicted_analytics: PortfolioAnalytics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assumptions: Option<String>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_to_oms_at: Option<DateTime<Utc>>,
}

/// Request to set a portfolio target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTargetRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<Uuid>,
    pub scope: TargetScope,
    pub scope_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub duration_target: Decimal,
    #[serde(default)]
    pub bucket_weights: BucketWeights,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TargetConstraints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// Request to generate an optimization proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptimizationRequest {
    pub scope: TargetScope,
    pub scope_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub duration_target: Decimal,
    #[serde(default)]
    pub bucket_weights: BucketWeights,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TargetConstraints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assumptions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_date: Option<DateTime<Utc>>,
    pub requested_by: String,
}

/// Request to approve a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveProposalRequest {
    pub proposal_id: Uuid,
    pub approved_by: String,
}

/// Request to emit a proposal's trades as OMS create-order commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendProposalToOmsRequest {
    pub proposal_id: Uuid,
    pub sent_by: String,
}
