//! Read models materialized from the event stream.
//!
//! Projections are the only writers; query surfaces and the engines'
//! validation paths read. Writes are UPSERTs keyed by the natural id so
//! re-delivery of an event converges, except for the evaluation and
//! violation counters which are at-least-once by design.

mod memory;
mod postgres;

pub use memory::MemoryReadModels;
pub use postgres::{run_read_model_migrations, PgReadModels};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use backoffice_common::compliance::{
    ComplianceEvaluation, ComplianceResult, ComplianceRule, ComplianceRuleSet,
    ComplianceViolation, RuleStatus,
};
use backoffice_common::error::StorageError;
use backoffice_common::events::OrderAmendedPayload;
use backoffice_common::events::ExecutionSimulatedPayload;
use backoffice_common::executions::{Execution, Fill};
use backoffice_common::instruments::{Account, Household, Instrument};
use backoffice_common::orders::{Order, OrderState};
use backoffice_common::portfolio::{PortfolioTarget, Position, Proposal};

/// Typed access to every read-model table.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    // -- orders ------------------------------------------------------

    async fn upsert_order(&self, order: Order) -> Result<(), StorageError>;
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StorageError>;
    /// Apply only the fields present in the amendment payload.
    async fn amend_order(
        &self,
        order_id: Uuid,
        amendment: &OrderAmendedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn set_order_state(
        &self,
        order_id: Uuid,
        state: OrderState,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    /// State SENT plus the dispatch timestamp.
    async fn mark_order_sent_to_ems(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    /// State FILLED plus the fill timestamp.
    async fn mark_order_fully_filled(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    /// State SETTLED plus the settlement timestamp.
    async fn mark_order_settled(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn set_order_compliance_result(
        &self,
        order_id: Uuid,
        result: &ComplianceResult,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    // -- executions and fills ---------------------------------------

    async fn upsert_execution(&self, execution: Execution) -> Result<(), StorageError>;
    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<Execution>, StorageError>;
    async fn apply_execution_simulated(
        &self,
        payload: &ExecutionSimulatedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn set_execution_partially_filled(
        &self,
        execution_id: Uuid,
        filled_quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn set_execution_filled(
        &self,
        execution_id: Uuid,
        filled_quantity: Decimal,
        avg_fill_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn set_execution_settled(
        &self,
        execution_id: Uuid,
        settlement_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn upsert_fill(&self, fill: Fill) -> Result<(), StorageError>;
    /// Fills for one execution ordered by clip index.
    async fn fills_by_execution(&self, execution_id: Uuid) -> Result<Vec<Fill>, StorageError>;

    // -- positions ---------------------------------------------------

    async fn get_position(
        &self,
        account_id: &str,
        instrument_id: &str,
    ) -> Result<Option<Position>, StorageError>;
    async fn upsert_position(&self, position: Position) -> Result<(), StorageError>;
    async fn delete_position(
        &self,
        account_id: &str,
        instrument_id: &str,
    ) -> Result<(), StorageError>;
    async fn positions_by_account(&self, account_id: &str) -> Result<Vec<Position>, StorageError>;
    async fn positions_by_household(
        &self,
        household_id: &str,
    ) -> Result<Vec<Position>, StorageError>;

    // -- reference data ---------------------------------------------

    async fn get_instrument(&self, cusip: &str) -> Result<Option<Instrument>, StorageError>;
    async fn upsert_instrument(&self, instrument: Instrument) -> Result<(), StorageError>;
    async fn get_account(&self, account_id: &str) -> Result<Option<Account>, StorageError>;
    async fn upsert_account(&self, account: Account) -> Result<(), StorageError>;
    async fn upsert_household(&self, household: Household) -> Result<(), StorageError>;

    // -- compliance --------------------------------------------------

    async fn upsert_rule(&self, rule: ComplianceRule) -> Result<(), StorageError>;
    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<ComplianceRule>, StorageError>;
    async fn rule_key_exists(&self, rule_key: &str) -> Result<bool, StorageError>;
    async fn set_rule_status(
        &self,
        rule_id: Uuid,
        status: RuleStatus,
        updated_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StorageError>;
    /// ACTIVE rules effective at `at` whose scope covers the account.
    /// Evaluation-point filtering and precedence dedup happen in the
    /// evaluator.
    async fn active_rules_for(
        &self,
        account_id: &str,
        household_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ComplianceRule>, StorageError>;
    /// Insert the evaluation row and bump the rule's evaluation counter.
    async fn record_rule_evaluation(
        &self,
        evaluation: ComplianceEvaluation,
    ) -> Result<(), StorageError>;
    /// Insert the violation row and bump the rule's violation counter.
    async fn record_rule_violation(
        &self,
        violation: ComplianceViolation,
    ) -> Result<(), StorageError>;
    async fn evaluations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<ComplianceEvaluation>, StorageError>;
    async fn violations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<ComplianceViolation>, StorageError>;
    async fn upsert_rule_set(&self, rule_set: ComplianceRuleSet) -> Result<(), StorageError>;

    // -- portfolio ---------------------------------------------------

    async fn upsert_target(&self, target: PortfolioTarget) -> Result<(), StorageError>;
    async fn get_target(&self, target_id: Uuid) -> Result<Option<PortfolioTarget>, StorageError>;
    async fn upsert_proposal(&self, proposal: Proposal) -> Result<(), StorageError>;
    async fn get_proposal(&self, proposal_id: Uuid) -> Result<Option<Proposal>, StorageError>;
    async fn set_proposal_approved(
        &self,
        proposal_id: Uuid,
        approved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn set_proposal_sent_to_oms(
        &self,
        proposal_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}
