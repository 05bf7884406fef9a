//! In-memory read models for tests and database-less runs.
//!
//! DashMaps keyed by the same natural ids the Postgres tables use, so
//! the UPSERT semantics match row for row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use backoffice_common::compliance::{
    ComplianceEvaluation, ComplianceResult, ComplianceRule, ComplianceRuleSet,
    ComplianceViolation, RuleStatus,
};
use backoffice_common::error::StorageError;
use backoffice_common::events::OrderAmendedPayload;
use backoffice_common::events::ExecutionSimulatedPayload;
use backoffice_common::executions::{Execution, ExecutionStatus, Fill};
use backoffice_common::instruments::{Account, Household, Instrument};
use backoffice_common::orders::{Order, OrderState};
use backoffice_common::portfolio::{PortfolioTarget, Position, Proposal, ProposalStatus};

use super::ReadModelStore;

/// All read models held in process memory.
#[derive(Default)]
pub struct MemoryReadModels {
    orders: DashMap<Uuid, Order>,
    executions: DashMap<Uuid, Execution>,
    fills: DashMap<Uuid, Fill>,
    positions: DashMap<(String, String), Position>,
    instruments: DashMap<String, Instrument>,
    accounts: DashMap<String, Account>,
    households: DashMap<String, Household>,
    rules: DashMap<Uuid, ComplianceRule>,
    rule_sets: DashMap<Uuid, ComplianceRuleSet>,
    evaluations: DashMap<Uuid, ComplianceEvaluation>,
    violations: DashMap<Uuid, ComplianceViolation>,
    targets: DashMap<Uuid, PortfolioTarget>,
    proposals: DashMap<Uuid, Proposal>,
}

impl MemoryReadModels {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadModelStore for MemoryReadModels {
    // -- orders ------------------------------------------------------

    async fn upsert_order(&self, order: Order) -> Result<(), StorageError> {
        self.orders.insert(order.order_id, order);
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StorageError> {
        Ok(self.orders.get(&order_id).map(|o| o.clone()))
    }

    async fn amend_order(
        &self,
        order_id: Uuid,
        amendment: &OrderAmendedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut order) = self.orders.get_mut(&order_id) {
            if let Some(quantity) = amendment.quantity {
                order.quantity = quantity;
            }
            if let Some(order_type) = amendment.order_type {
                order.order_type = order_type;
            }
            if let Some(limit_price) = amendment.limit_price {
                order.limit_price = Some(limit_price);
            }
            if let Some(curve_spread_bp) = amendment.curve_spread_bp {
                order.curve_spread_bp = Some(curve_spread_bp);
            }
            order.updated_at = at;
        }
        Ok(())
    }

    async fn set_order_state(
        &self,
        order_id: Uuid,
        state: OrderState,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut order) = self.orders.get_mut(&order_id) {
            order.state = state;
            order.last_state_change_at = at;
            order.updated_at = at;
        }
        Ok(())
    }

    async fn mark_order_sent_to_ems(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut order) = self.orders.get_mut(&order_id) {
            order.state = OrderState::Sent;
            order.sent_to_ems_at = Some(at);
            order.last_state_change_at = at;
            order.updated_at = at;
        }
        Ok(())
    }

    async fn mark_order_fully_filled(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut order) = self.orders.get_mut(&order_id) {
            order.state = OrderState::Filled;
            order.fully_filled_at = Some(at);
            order.last_state_change_at = at;
            order.updated_at = at;
        }
        Ok(())
    }

    async fn mark_order_settled(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut order) = self.orders.get_mut(&order_id) {
            order.state = OrderState::Settled;
            order.settled_at = Some(at);
            order.last_state_change_at = at;
            order.updated_at = at;
        }
        Ok(())
    }

    async fn set_order_compliance_result(
        &self,
        order_id: Uuid,
        result: &ComplianceResult,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut order) = self.orders.get_mut(&order_id) {
            order.compliance_result = Some(result.clone());
            order.updated_at = at;
        }
        Ok(())
    }

    // -- executions and fills ---------------------------------------

    async fn upsert_execution(&self, execution: Execution) -> Result<(), StorageError> {
        self.executions.insert(execution.execution_id, execution);
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<Execution>, StorageError> {
        Ok(self.executions.get(&execution_id).map(|e| e.clone()))
    }

    async fn apply_execution_simulated(
        &self,
        payload: &ExecutionSimulatedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut execution) = self.executions.get_mut(&payload.execution_id) {
            execution.filled_quantity = payload.filled_quantity;
            execution.avg_fill_price = Some(payload.avg_fill_price);
            execution.slippage_total = Some(payload.slippage_total);
            execution.slippage_breakdown = Some(payload.slippage_breakdown);
            execution.deterministic_inputs = Some(payload.deterministic_inputs.clone());
            execution.status = payload.status;
            execution.execution_start_time = Some(payload.execution_start_time);
            execution.execution_end_time = Some(payload.execution_end_time);
            if payload.explanation.is_some() {
                execution.explanation = payload.explanation.clone();
            }
            execution.updated_at = at;
        }
        Ok(())
    }

    async fn set_execution_partially_filled(
        &self,
        execution_id: Uuid,
        filled_quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut execution) = self.executions.get_mut(&execution_id) {
            execution.status = ExecutionStatus::PartiallyFilled;
            execution.filled_quantity = filled_quantity;
            execution.updated_at = at;
        }
        Ok(())
    }

    async fn set_execution_filled(
        &self,
        execution_id: Uuid,
        filled_quantity: Decimal,
        avg_fill_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut execution) = self.executions.get_mut(&execution_id) {
            execution.status = ExecutionStatus::Filled;
            execution.filled_quantity = filled_quantity;
            execution.avg_fill_price = Some(avg_fill_price);
            execution.updated_at = at;
        }
        Ok(())
    }

    async fn set_execution_settled(
        &self,
        execution_id: Uuid,
        settlement_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut execution) = self.executions.get_mut(&execution_id) {
            execution.status = ExecutionStatus::Settled;
            execution.settlement_date = Some(settlement_date);
            execution.settled_at = Some(at);
            execution.updated_at = at;
        }
        Ok(())
    }

    async fn upsert_fill(&self, fill: Fill) -> Result<(), StorageError> {
        self.fills.insert(fill.fill_id, fill);
        Ok(())
    }

    async fn fills_by_execution(&self, execution_id: Uuid) -> Result<Vec<Fill>, StorageError> {
        let mut fills: Vec<Fill> = self
            .fills
            .iter()
            .filter(|f| f.execution_id == execution_id)
            .map(|f| f.clone())
            .collect();
        fills.sort_by_key(|f| f.clip_index);
        Ok(fills)
    }

    // -- positions ---------------------------------------------------

    async fn get_position(
        &self,
        account_id: &str,
        instrument_id: &str,
    ) -> Result<Option<Position>, StorageError> {
        Ok(self
            .positions
            .get(&(account_id.to_string(), instrument_id.to_string()))
            .map(|p| p.clone()))
    }

    async fn upsert_position(&self, position: Position) -> Result<(), StorageError> {
        self.positions.insert(
            (position.account_id.clone(), position.instrument_id.clone()),
            position,
        );
        Ok(())
    }

    async fn delete_position(
        &self,
        account_id: &str,
        instrument_id: &str,
    ) -> Result<(), StorageError> {
        self.positions
            .remove(&(account_id.to_string(), instrument_id.to_string()));
        Ok(())
    }

    async fn positions_by_account(&self, account_id: &str) -> Result<Vec<Position>, StorageError> {
        Ok(self
            .positions
            .iter()
            .filter(|p| p.account_id == account_id)
            .map(|p| p.clone())
            .collect())
    }

    async fn positions_by_household(
        &self,
        household_id: &str,
    ) -> Result<Vec<Position>, StorageError> {
        let member_accounts: Vec<String> = self
            .accounts
            .iter()
            .filter(|a| a.household_id.as_deref() == Some(household_id))
            .map(|a| a.account_id.clone())
            .collect();

        Ok(self
            .positions
            .iter()
            .filter(|p| member_accounts.contains(&p.account_id))
            .map(|p| p.clone())
            .collect())
    }

    // -- reference data ---------------------------------------------

    async fn get_instrument(&self, cusip: &str) -> Result<Option<Instrument>, StorageError> {
        Ok(self.instruments.get(cusip).map(|i| i.clone()))
    }

    async fn upsert_instrument(&self, instrument: Instrument) -> Result<(), StorageError> {
        self.instruments.insert(instrument.cusip.clone(), instrument);
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<Account>, StorageError> {
        Ok(self.accounts.get(account_id).map(|a| a.clone()))
    }

    async fn upsert_account(&self, account: Account) -> Result<(), StorageError> {
        self.accounts.insert(account.account_id.clone(), account);
        Ok(())
    }

    async fn upsert_household(&self, household: Household) -> Result<(), StorageError> {
        self.households
            .insert(household.household_id.clone(), household);
        Ok(())
    }

    // -- compliance --------------------------------------------------

    async fn upsert_rule(&self, rule: ComplianceRule) -> Result<(), StorageError> {
        // Updates keep the projection-maintained counters
        if let Some(existing) = self.rules.get(&rule.rule_id).map(|r| r.clone()) {
            let mut merged = rule;
            merged.evaluation_count = existing.evaluation_count;
            merged.violation_count = existing.violation_count;
            merged.last_evaluated_at = existing.last_evaluated_at;
            merged.last_violated_at = existing.last_violated_at;
            merged.created_at = existing.created_at;
            merged.created_by = existing.created_by;
            self.rules.insert(merged.rule_id, merged);
        } else {
            self.rules.insert(rule.rule_id, rule);
        }
        Ok(())
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<ComplianceRule>, StorageError> {
        Ok(self.rules.get(&rule_id).map(|r| r.clone()))
    }

    async fn rule_key_exists(&self, rule_key: &str) -> Result<bool, StorageError> {
        Ok(self.rules.iter().any(|r| r.rule_key == rule_key))
    }

    async fn set_rule_status(
        &self,
        rule_id: Uuid,
        status: RuleStatus,
        updated_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut rule) = self.rules.get_mut(&rule_id) {
            rule.status = status;
            rule.updated_by = updated_by.to_string();
            rule.updated_at = at;
        }
        Ok(())
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StorageError> {
        self.rules.remove(&rule_id);
        Ok(())
    }

    async fn active_rules_for(
        &self,
        account_id: &str,
        household_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ComplianceRule>, StorageError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.is_effective_at(at) && r.matches_scope(account_id, household_id))
            .map(|r| r.clone())
            .collect())
    }

    async fn record_rule_evaluation(
        &self,
        evaluation: ComplianceEvaluation,
    ) -> Result<(), StorageError> {
        if let Some(mut rule) = self.rules.get_mut(&evaluation.rule_id) {
            rule.evaluation_count += 1;
            rule.last_evaluated_at = Some(evaluation.evaluated_at);
        }
        self.evaluations
            .insert(evaluation.evaluation_id, evaluation);
        Ok(())
    }

    async fn record_rule_violation(
        &self,
        violation: ComplianceViolation,
    ) -> Result<(), StorageError> {
        if let Some(mut rule) = self.rules.get_mut(&violation.rule_id) {
            rule.violation_count += 1;
            rule.last_violated_at = Some(violation.evaluated_at);
        }
        self.violations.insert(violation.violation_id, violation);
        Ok(())
    }

    async fn evaluations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<ComplianceEvaluation>, StorageError> {
        let mut evaluations: Vec<ComplianceEvaluation> = self
            .evaluations
            .iter()
            .filter(|e| e.order_id == order_id)
            .map(|e| e.clone())
            .collect();
        evaluations.sort_by_key(|e| e.evaluated_at);
        Ok(evaluations)
    }

    async fn violations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<ComplianceViolation>, StorageError> {
        let mut violations: Vec<ComplianceViolation> = self
            .violations
            .iter()
            .filter(|v| v.order_id == order_id)
            .map(|v| v.clone())
            .collect();
        violations.sort_by_key(|v| v.evaluated_at);
        Ok(violations)
    }

    async fn upsert_rule_set(&self, rule_set: ComplianceRuleSet) -> Result<(), StorageError> {
        self.rule_sets.insert(rule_set.rule_set_id, rule_set);
        Ok(())
    }

    // -- portfolio ---------------------------------------------------

    async fn upsert_target(&self, target: PortfolioTarget) -> Result<(), StorageError> {
        self.targets.insert(target.target_id, target);
        Ok(())
    }

    async fn get_target(&self, target_id: Uuid) -> Result<Option<PortfolioTarget>, StorageError> {
        Ok(self.targets.get(&target_id).map(|t| t.clone()))
    }

    async fn upsert_proposal(&self, proposal: Proposal) -> Result<(), StorageError> {
        self.proposals.insert(proposal.proposal_id, proposal);
        Ok(())
    }

    async fn get_proposal(&self, proposal_id: Uuid) -> Result<Option<Proposal>, StorageError> {
        Ok(self.proposals.get(&proposal_id).map(|p| p.clone()))
    }

    async fn set_proposal_approved(
        &self,
        proposal_id: Uuid,
        approved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut proposal) = self.proposals.get_mut(&proposal_id) {
            proposal.status = ProposalStatus::Approved;
            proposal.approved_by = Some(approved_by.to_string());
            proposal.approved_at = Some(at);
        }
        Ok(())
    }

    async fn set_proposal_sent_to_oms(
        &self,
        proposal_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if let Some(mut proposal) = self.proposals.get_mut(&proposal_id) {
            proposal.status = ProposalStatus::SentToOms;
            proposal.sent_to_oms_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_common::orders::{OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn sample_order(order_id: Uuid) -> Order {
        let now = Utc::now();
        Order {
            order_id,
            account_id: "ACC-1".to_string(),
            instrument_id: "912828XG55".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(1000),
            order_type: OrderType::Market,
            limit_price: None,
            curve_spread_bp: None,
            time_in_force: TimeInForce::Day,
            state: OrderState::Draft,
            batch_id: None,
            compliance_result: None,
            created_at: now,
            created_by: "trader-1".to_string(),
            updated_at: now,
            last_state_change_at: now,
            sent_to_ems_at: None,
            fully_filled_at: None,
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn test_order_upsert_is_idempotent() {
        let store = MemoryReadModels::new();
        let order_id = Uuid::new_v4();

        store.upsert_order(sample_order(order_id)).await.unwrap();
        store.upsert_order(sample_order(order_id)).await.unwrap();

        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Draft);
    }

    #[tokio::test]
    async fn test_amend_applies_only_present_fields() {
        let store = MemoryReadModels::new();
        let order_id = Uuid::new_v4();
        store.upsert_order(sample_order(order_id)).await.unwrap();

        let amendment = OrderAmendedPayload {
            order_id,
            quantity: Some(dec!(500)),
            order_type: None,
            limit_price: None,
            curve_spread_bp: None,
            updated_by: "trader-1".to_string(),
        };
        store
            .amend_order(order_id, &amendment, Utc::now())
            .await
            .unwrap();

        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.quantity, dec!(500));
        assert_eq!(order.order_type, OrderType::Market);
    }

    #[tokio::test]
    async fn test_state_markers_set_timestamps() {
        let store = MemoryReadModels::new();
        let order_id = Uuid::new_v4();
        store.upsert_order(sample_order(order_id)).await.unwrap();

        let at = Utc::now();
        store.mark_order_sent_to_ems(order_id, at).await.unwrap();
        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Sent);
        assert_eq!(order.sent_to_ems_at, Some(at));
    }

    #[tokio::test]
    async fn test_positions_by_household_follows_accounts() {
        let store = MemoryReadModels::new();
        store
            .upsert_account(Account {
                account_id: "ACC-1".to_string(),
                household_id: Some("HH-1".to_string()),
                name: "Alpha".to_string(),
            })
            .await
            .unwrap();
        store
            .upsert_account(Account {
                account_id: "ACC-2".to_string(),
                household_id: None,
                name: "Beta".to_string(),
            })
            .await
            .unwrap();

        for account in ["ACC-1", "ACC-2"] {
            store
                .upsert_position(Position {
                    account_id: account.to_string(),
                    instrument_id: "912828XG55".to_string(),
                    quantity: dec!(10),
                    avg_cost: dec!(100),
                    market_value: dec!(1000),
                    duration: dec!(5),
                    dv01: dec!(0.5),
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let household_positions = store.positions_by_household("HH-1").await.unwrap();
        assert_eq!(household_positions.len(), 1);
        assert_eq!(household_positions[0].account_id, "ACC-1");
    }

    #[tokio::test]
    async fn test_fills_sorted_by_clip_index() {
        let store = MemoryReadModels::new();
        let execution_id = Uuid::new_v4();

        for clip_index in [3, 1, 2] {
            store
                .upsert_fill(Fill {
                    fill_id: Uuid::new_v4(),
                    execution_id,
                    clip_index,
                    quantity: dec!(100),
                    price: dec!(100),
                    timestamp: Utc::now(),
                    slippage_bps: dec!(1),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let fills = store.fills_by_execution(execution_id).await.unwrap();
        let indexes: Vec<i32> = fills.iter().map(|f| f.clip_index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }
}
