//! Event type and aggregate enums with their canonical wire names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every event type the backbone can carry.
///
/// Serde variant names are the wire names; `as_str` yields the same
/// strings for bus subscription keys and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // OMS
    OrderCreated,
    OrderAmended,
    OrderCancelled,
    OrderApprovalRequested,
    OrderApproved,
    OrderRejected,
    OrderSentToEMS,
    // Compliance
    RuleSetPublished,
    RuleCreated,
    RuleUpdated,
    RuleDeleted,
    RuleEnabled,
    RuleDisabled,
    RuleEvaluated,
    RuleViolationDetected,
    OrderBlockedByCompliance,
    OrderWarnedByCompliance,
    ExecutionBlockedByCompliance,
    // EMS / execution simulation
    ExecutionRequested,
    ExecutionSimulated,
    FillGenerated,
    OrderPartiallyFilled,
    OrderFullyFilled,
    SettlementBooked,
    // PMS
    TargetSet,
    OptimizationRequested,
    ProposalGenerated,
    ProposalApproved,
    ProposalSentToOMS,
    // Synthetic command emitted by PMS routing trades into the OMS
    CreateOrder,
}

impl EventType {
    /// Canonical wire name, also used as the bus subscription key.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "OrderCreated",
            EventType::OrderAmended => "OrderAmended",
            EventType::OrderCancelled => "OrderCancelled",
            EventType::OrderApprovalRequested => "OrderApprovalRequested",
            EventType::OrderApproved => "OrderApproved",
            EventType::OrderRejected => "OrderRejected",
            EventType::OrderSentToEMS => "OrderSentToEMS",
            EventType::RuleSetPublished => "RuleSetPublished",
            EventType::RuleCreated => "RuleCreated",
            EventType::RuleUpdated => "RuleUpdated",
            EventType::RuleDeleted => "RuleDeleted",
            EventType::RuleEnabled => "RuleEnabled",
            EventType::RuleDisabled => "RuleDisabled",
            EventType::RuleEvaluated => "RuleEvaluated",
            EventType::RuleViolationDetected => "RuleViolationDetected",
            EventType::OrderBlockedByCompliance => "OrderBlockedByCompliance",
            EventType::OrderWarnedByCompliance => "OrderWarnedByCompliance",
            EventType::ExecutionBlockedByCompliance => "ExecutionBlockedByCompliance",
            EventType::ExecutionRequested => "ExecutionRequested",
            EventType::ExecutionSimulated => "ExecutionSimulated",
            EventType::FillGenerated => "FillGenerated",
            EventType::OrderPartiallyFilled => "OrderPartiallyFilled",
            EventType::OrderFullyFilled => "OrderFullyFilled",
            EventType::SettlementBooked => "SettlementBooked",
            EventType::TargetSet => "TargetSet",
            EventType::OptimizationRequested => "OptimizationRequested",
            EventType::ProposalGenerated => "ProposalGenerated",
            EventType::ProposalApproved => "ProposalApproved",
            EventType::ProposalSentToOMS => "ProposalSentToOMS",
            EventType::CreateOrder => "CreateOrder",
        }
    }

    /// Parse a wire name back into the enum.
    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Domain object kind an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateType {
    Order,
    Execution,
    Account,
    Portfolio,
    Proposal,
    Rule,
    RuleSet,
    Instrument,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Order => "Order",
            AggregateType::Execution => "Execution",
            AggregateType::Account => "Account",
            AggregateType::Portfolio => "Portfolio",
            AggregateType::Proposal => "Proposal",
            AggregateType::Rule => "Rule",
            AggregateType::RuleSet => "RuleSet",
            AggregateType::Instrument => "Instrument",
        }
    }

    /// Parse a wire name back into the enum.
    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The domain entity an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    #[serde(rename = "type")]
    pub kind: AggregateType,
    pub id: String,
}

impl Aggregate {
    pub fn new(kind: AggregateType, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    pub fn order(id: impl ToString) -> Self {
        Self::new(AggregateType::Order, id)
    }

    pub fn execution(id: impl ToString) -> Self {
        Self::new(AggregateType::Execution, id)
    }

    pub fn rule(id: impl ToString) -> Self {
        Self::new(AggregateType::Rule, id)
    }

    pub fn rule_set(id: impl ToString) -> Self {
        Self::new(AggregateType::RuleSet, id)
    }

    pub fn portfolio(id: impl ToString) -> Self {
        Self::new(AggregateType::Portfolio, id)
    }

    pub fn proposal(id: impl ToString) -> Self {
        Self::new(AggregateType::Proposal, id)
    }
}

/// Role of the entity that triggered an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    User,
    System,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::User => write!(f, "user"),
            ActorRole::System => write!(f, "system"),
        }
    }
}

/// The entity that triggered an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub actor_id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn user(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            role: ActorRole::User,
        }
    }

    pub fn system(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            role: ActorRole::System,
        }
    }
}
