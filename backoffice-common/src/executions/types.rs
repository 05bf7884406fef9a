//! Execution and fill read-model types produced by the simulator.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::orders::OrderSide;

/// Status of a simulated execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Requested, no fills yet
    Pending,
    /// Simulation completed, settlement not yet booked
    Simulating,
    /// Some clips filled
    PartiallyFilled,
    /// All clips filled
    Filled,
    /// Settlement booked (terminal)
    Settled,
    /// Cancelled before completion (terminal)
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if no further status changes are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Settled | ExecutionStatus::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "PENDING"),
            ExecutionStatus::Simulating => write!(f, "SIMULATING"),
            ExecutionStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            ExecutionStatus::Filled => write!(f, "FILLED"),
            ExecutionStatus::Settled => write!(f, "SETTLED"),
            ExecutionStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Per-component slippage, in basis points weighted by fill quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SlippageBreakdown {
    pub bucket_spread: Decimal,
    pub size_impact: Decimal,
    pub side_impact: Decimal,
}

/// Inputs that make a simulation reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterministicInputs {
    pub baseline_price: Decimal,
    pub maturity_bucket: String,
    pub max_clip: Decimal,
    pub spread_bps: Decimal,
    pub size_impact_bps: Decimal,
    pub side_impact_bps: Decimal,
}

/// Execution read model row, maintained by the EMS projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub execution_id: Uuid,
    pub order_id: Uuid,
    pub account_id: String,
    pub instrument_id: String,
    pub side: OrderSide,
    pub total_quantity: Decimal,
    pub filled_quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<Decimal>,
    pub status: ExecutionStatus,
    pub as_of_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_total: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_breakdown: Option<SlippageBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deterministic_inputs: Option<DeterministicInputs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable fill clip of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub fill_id: Uuid,
    pub execution_id: Uuid,
    /// 1-based, dense within the execution
    pub clip_index: i32,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub slippage_bps: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Request for a manual execution simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestExecutionRequest {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_date: Option<DateTime<Utc>>,
    pub requested_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_terminal() {
        assert!(ExecutionStatus::Settled.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Simulating.is_terminal());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::PartiallyFilled).unwrap(),
            "\"PARTIALLY_FILLED\""
        );
        assert_eq!(ExecutionStatus::Simulating.to_string(), "SIMULATING");
    }
}
