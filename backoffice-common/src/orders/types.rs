//! Core order types and enums for the order management engine.
//!
//! This module defines the fundamental types used throughout the order
//! lifecycle:
//! - `OrderSide` - Buy or Sell
//! - `OrderType` - Market, Limit, CurveRelative
//! - `OrderState` - Full lifecycle from Draft to terminal states
//! - `TimeInForce` - Day, IOC

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::compliance::ComplianceResult;

/// Order side indicating buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order - acquire the instrument
    Buy,
    /// Sell order - dispose of the instrument
    Sell,
}

impl OrderSide {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Returns true if this is a buy order
    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }

    /// Signed multiplier: +1 for buys, -1 for sells.
    ///
    /// Used by the execution simulator for slippage direction and by the
    /// position projection for signed quantities.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => -Decimal::ONE,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type determining pricing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute at the simulated market price
    Market,
    /// Execute at the limit price or better; requires a limit price
    Limit,
    /// Price relative to the curve by a spread; requires a spread in bps
    CurveRelative,
}

impl OrderType {
    /// Returns true if this order type requires a limit price
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit)
    }

    /// Returns true if this order type requires a curve spread
    pub fn requires_curve_spread(&self) -> bool {
        matches!(self, OrderType::CurveRelative)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::CurveRelative => write!(f, "CURVE_RELATIVE"),
        }
    }
}

/// Time-in-force specifying how long an order remains active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Day order - expires at end of trading day
    #[default]
    Day,
    /// Immediate-Or-Cancel - fill immediately, cancel remainder
    Ioc,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Day => write!(f, "DAY"),
            TimeInForce::Ioc => write!(f, "IOC"),
        }
    }
}

/// Order state in the lifecycle.
///
/// State transitions:
/// ```text
/// Draft ──compliance PASS──▶ Approved ──send──▶ Sent ──fill──▶ PartiallyFilled ──fill──▶ Filled ──settle──▶ Settled
///   │           ├──compliance WARN / large qty──▶ ApprovalPending ──approve──▶ Approved
///   │           └──compliance BLOCK──▶ Rejected
///   └──cancel──▶ Cancelled   (from Draft, ApprovalPending, Approved, Sent, PartiallyFilled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Order created, compliance outcome not yet applied
    Draft,
    /// Waiting for a human approval
    ApprovalPending,
    /// Cleared for dispatch
    Approved,
    /// Dispatched to the execution simulator
    Sent,
    /// Some fills received, quantity remaining
    PartiallyFilled,
    /// Completely filled (terminal until settlement)
    Filled,
    /// Cancelled by a user (terminal)
    Cancelled,
    /// Blocked by compliance (terminal)
    Rejected,
    /// Settlement booked (terminal)
    Settled,
}

impl OrderState {
    /// Returns true if the order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Settled
        )
    }

    /// Returns true if the order can be cancelled
    pub fn is_cancelable(&self) -> bool {
        matches!(
            self,
            OrderState::Draft
                | OrderState::ApprovalPending
                | OrderState::Approved
                | OrderState::Sent
                | OrderState::PartiallyFilled
        )
    }

    /// Returns true if the order can be amended
    pub fn is_amendable(&self) -> bool {
        matches!(
            self,
            OrderState::Draft | OrderState::ApprovalPending | OrderState::Approved
        )
    }

    /// Check if a transition from the current state to the target is valid
    pub fn can_transition_to(&self, target: OrderState) -> bool {
        match self {
            OrderState::Draft => matches!(
                target,
                OrderState::Approved
                    | OrderState::ApprovalPending
                    | OrderState::Rejected
                    | OrderState::Cancelled
            ),
            OrderState::ApprovalPending => {
                matches!(target, OrderState::Approved | OrderState::Cancelled)
            }
            OrderState::Approved => matches!(target, OrderState::Sent | OrderState::Cancelled),
            OrderState::Sent => matches!(
                target,
                OrderState::PartiallyFilled | OrderState::Filled | OrderState::Cancelled
            ),
            OrderState::PartiallyFilled => matches!(
                target,
                OrderState::PartiallyFilled | OrderState::Filled | OrderState::Cancelled
            ),
            OrderState::Filled => matches!(target, OrderState::Settled),
            // Terminal states cannot transition
            OrderState::Cancelled | OrderState::Rejected | OrderState::Settled => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderState::Draft => write!(f, "DRAFT"),
            OrderState::ApprovalPending => write!(f, "APPROVAL_PENDING"),
            OrderState::Approved => write!(f, "APPROVED"),
            OrderState::Sent => write!(f, "SENT"),
            OrderState::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderState::Filled => write!(f, "FILLED"),
            OrderState::Cancelled => write!(f, "CANCELLED"),
            OrderState::Rejected => write!(f, "REJECTED"),
            OrderState::Settled => write!(f, "SETTLED"),
        }
    }
}

/// Order read model row, maintained by the OMS projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: Uuid,
    pub account_id: String,
    /// CUSIP of the instrument
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_result: Option<ComplianceResult>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub last_state_change_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_to_ems_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fully_filled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}
