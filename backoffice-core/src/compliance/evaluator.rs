//! The evaluation procedure: rule selection, precedence dedup, metric
//! resolution, predicate evaluation, and event emission.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use backoffice_common::compliance::{
    ComplianceResult, ComplianceRule, ComplianceStatus, EvaluationPoint, RuleSeverity,
    ViolationSummary,
};
use backoffice_common::error::{CoreError, CoreResult};
use backoffice_common::events::{
    to_payload, Actor, Aggregate, Event, EventType, ExecutionBlockedPayload, OrderBlockedPayload,
    OrderWarnedPayload, RuleEvaluatedPayload, RuleViolationDetectedPayload,
};
use backoffice_common::orders::OrderType;

use super::{ComplianceService, OrderSnapshot};

struct PortfolioMetrics {
    duration: Decimal,
    dv01: Decimal,
    market_value: Decimal,
    cash: Decimal,
    cash_percentage: Decimal,
}

impl PortfolioMetrics {
    fn lookup(&self, metric: &str) -> Decimal {
        match metric {
            "portfolio.duration" => self.duration,
            "portfolio.dv01" => self.dv01,
            "portfolio.marketValue" => self.market_value,
            "portfolio.cash" => self.cash,
            "portfolio.cashPercentage" => self.cash_percentage,
            _ => Decimal::ZERO,
        }
    }

    fn snapshot(&self) -> Value {
        json!({
            "portfolio.duration": self.duration,
            "portfolio.dv01": self.dv01,
            "portfolio.marketValue": self.market_value,
            "portfolio.cash": self.cash,
            "portfolio.cashPercentage": self.cash_percentage,
        })
    }
}

impl ComplianceService {
    /// Pre-trade evaluation, invoked synchronously by the OMS on create.
    pub async fn evaluate_pre_trade(
        &self,
        order: &OrderSnapshot,
        actor_id: &str,
        correlation_id: Uuid,
        trigger: Option<&Event>,
    ) -> CoreResult<ComplianceResult> {
        self.evaluate(order, EvaluationPoint::PreTrade, actor_id, correlation_id, trigger)
            .await
    }

    /// Evaluate every applicable rule for (order, point).
    ///
    /// Emits a `RuleEvaluated` event per rule and a
    /// `RuleViolationDetected` per failing rule. Boundary events are
    /// emitted for pre-trade outcomes and pre-execution blocks. An error
    /// on one rule skips that rule, never the whole evaluation.
    pub async fn evaluate(
        &self,
        order: &OrderSnapshot,
        point: EvaluationPoint,
        actor_id: &str,
        correlation_id: Uuid,
        trigger: Option<&Event>,
    ) -> CoreResult<ComplianceResult> {
        let account = self
            .read
            .get_account(&order.account_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Account", &order.account_id))?;

        let now = Utc::now();
        let candidates = self
            .read
            .active_rules_for(&account.account_id, account.household_id.as_deref(), now)
            .await?;
        let rules = apply_rule_precedence(
            candidates
                .into_iter()
                .filter(|rule| rule.has_point(point))
                .collect(),
        );

        let mut result = ComplianceResult::pass();
        if rules.is_empty() {
            return Ok(result);
        }

        let portfolio = self.portfolio_metrics(&order.account_id).await?;
        let order_value = self.order_value(order).await?;

        for rule in rules {
            let resolved = match self
                .resolve_metric(&rule, &portfolio, order, order_value)
                .await
            {
                Ok(Some(resolved)) => resolved,
                Ok(None) => {
                    warn!(rule_id = %rule.rule_id, metric = %rule.predicate.metric, "unsupported metric, rule skipped");
                    continue;
                }
                Err(err) => {
                    warn!(rule_id = %rule.rule_id, "metric resolution failed, rule skipped: {err}");
                    continue;
                }
            };
            let (metric_value, metric_snapshot) = resolved;

            let passes = rule.predicate.passes(&metric_value);
            let evaluated_at = Utc::now();
            let explanation = rule.explanation(&metric_value);
            let outcome = if passes {
                ComplianceStatus::Pass
            } else {
                rule.severity.into()
            };

            self.emit_rule_evaluated(
                &rule,
                order,
                point,
                outcome,
                &metric_value,
                &metric_snapshot,
                &explanation,
                evaluated_at,
                actor_id,
                correlation_id,
                trigger,
            )
            .await?;

            if passes {
                result.rules_passed.push(rule.rule_key.clone());
                continue;
            }

            self.emit_rule_violation(
                &rule,
                order,
                point,
                &metric_value,
                &metric_snapshot,
                &explanation,
                evaluated_at,
                actor_id,
                correlation_id,
                trigger,
            )
            .await?;

            let violation = ViolationSummary {
                rule_id: rule.rule_id,
                rule_name: rule.name.clone(),
                description: explanation,
                metrics: metric_snapshot,
            };
            match rule.severity {
                RuleSeverity::Block => result.blocks.push(violation),
                RuleSeverity::Warn => result.warnings.push(violation),
            }
        }

        if !result.blocks.is_empty() {
            result.status = ComplianceStatus::Block;
        } else if !result.warnings.is_empty() {
            result.status = ComplianceStatus::Warn;
        }
        result.checked_at = Utc::now();

        match (point, result.status) {
            (EvaluationPoint::PreTrade, ComplianceStatus::Block) => {
                self.emit_boundary(
                    EventType::OrderBlockedByCompliance,
                    to_payload(&OrderBlockedPayload {
                        order_id: order.order_id,
                        blocks: result.blocks.clone(),
                    })?,
                    order.order_id,
                    actor_id,
                    correlation_id,
                    trigger,
                )
                .await?;
            }
            (EvaluationPoint::PreTrade, ComplianceStatus::Warn) => {
                self.emit_boundary(
                    EventType::OrderWarnedByCompliance,
                    to_payload(&OrderWarnedPayload {
                        order_id: order.order_id,
                        warnings: result.warnings.clone(),
                    })?,
                    order.order_id,
                    actor_id,
                    correlation_id,
                    trigger,
                )
                .await?;
            }
            (EvaluationPoint::PreExecution, ComplianceStatus::Block) => {
                self.emit_boundary(
                    EventType::ExecutionBlockedByCompliance,
                    to_payload(&ExecutionBlockedPayload {
                        order_id: order.order_id,
                        blocks: result.blocks.clone(),
                    })?,
                    order.order_id,
                    actor_id,
                    correlation_id,
                    trigger,
                )
                .await?;
            }
            _ => {}
        }

        Ok(result)
    }

    async fn portfolio_metrics(&self, account_id: &str) -> CoreResult<PortfolioMetrics> {
        let positions = self.read.positions_by_account(account_id).await?;

        let market_value: Decimal = positions.iter().map(|p| p.market_value).sum();
        let duration_weighted: Decimal = positions.iter().map(|p| p.duration * p.market_value).sum();
        let dv01: Decimal = positions.iter().map(|p| p.dv01).sum();

        let duration = if market_value > Decimal::ZERO {
            duration_weighted / market_value
        } else {
            Decimal::ZERO
        };

        // Cash tracking is not modeled; both cash metrics stay zero.
        Ok(PortfolioMetrics {
            duration,
            dv01,
            market_value,
            cash: Decimal::ZERO,
            cash_percentage: Decimal::ZERO,
        })
    }

    /// Order notional: limit price when provided on a LIMIT order, else
    /// the instrument ask, else par.
    async fn order_value(&self, order: &OrderSnapshot) -> CoreResult<Decimal> {
        let mut price = dec!(100);
        if let Some(instrument) = self.read.get_instrument(&order.instrument_id).await? {
            if let Some(ask) = instrument.ask_price {
                price = ask;
            }
        }
        if order.order_type == OrderType::Limit {
            if let Some(limit) = order.limit_price {
                price = limit;
            }
        }
        Ok(order.quantity * price)
    }

    async fn resolve_metric(
        &self,
        rule: &ComplianceRule,
        portfolio: &PortfolioMetrics,
        order: &OrderSnapshot,
        order_value: Decimal,
    ) -> CoreResult<Option<(Value, Value)>> {
        let metric = rule.predicate.metric.as_str();

        if metric.starts_with("portfolio.") {
            let value = portfolio.lookup(metric);
            return Ok(Some((json!(value), portfolio.snapshot())));
        }

        if metric.starts_with("order.") {
            let snapshot = json!({
                "order.quantity": order.quantity,
                "order.value": order_value,
                "order.side": order.side,
            });
            let value = match metric {
                "order.quantity" => json!(order.quantity),
                "order.value" => json!(order_value),
                "order.side" => json!(order.side),
                _ => return Ok(None),
            };
            return Ok(Some((value, snapshot)));
        }

        if metric.starts_with("position.") {
            let cusip = rule
                .predicate
                .instrument_filter
                .as_ref()
                .and_then(|f| f.cusip.clone());
            let Some(cusip) = cusip else {
                // No instrument filter: the metric reads as zero
                return Ok(Some((json!(0.0), json!({ metric: 0.0 }))));
            };

            let position = self.read.get_position(&order.account_id, &cusip).await?;
            let (quantity, market_value) = position
                .map(|p| (p.quantity, p.market_value))
                .unwrap_or((Decimal::ZERO, Decimal::ZERO));

            let percentage = if portfolio.market_value > Decimal::ZERO {
                market_value / portfolio.market_value * dec!(100)
            } else {
                Decimal::ZERO
            };

            let snapshot = json!({
                "position.quantity": quantity,
                "position.marketValue": market_value,
                "position.percentage": percentage,
                "position.instrumentId": cusip,
            });
            let value = match metric {
                "position.quantity" => json!(quantity),
                "position.marketValue" => json!(market_value),
                "position.percentage" => json!(percentage),
                _ => return Ok(None),
            };
            return Ok(Some((value, snapshot)));
        }

        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_rule_evaluated(
        &self,
        rule: &ComplianceRule,
        order: &OrderSnapshot,
        point: EvaluationPoint,
        outcome: ComplianceStatus,
        metric_value: &Value,
        metric_snapshot: &Value,
        explanation: &str,
        evaluated_at: chrono::DateTime<Utc>,
        actor_id: &str,
        correlation_id: Uuid,
        trigger: Option<&Event>,
    ) -> CoreResult<()> {
        let payload = RuleEvaluatedPayload {
            evaluation_id: Uuid::new_v4(),
            rule_id: rule.rule_id,
            rule_version: rule.version,
            order_id: order.order_id,
            account_id: order.account_id.clone(),
            evaluation_point: point,
            result: outcome,
            metric_value: metric_value.clone(),
            threshold: rule.predicate.value.clone(),
            metric_snapshot: metric_snapshot.clone(),
            explanation: explanation.to_string(),
            evaluated_at,
        };
        let mut event = Event::new(
            EventType::RuleEvaluated,
            Aggregate::rule(rule.rule_id),
            Actor::system(actor_id),
            correlation_id,
            to_payload(&payload)?,
        );
        if let Some(trigger) = trigger {
            event = event.derived_from(trigger);
        }
        self.pipeline.emit(event).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_rule_violation(
        &self,
        rule: &ComplianceRule,
        order: &OrderSnapshot,
        point: EvaluationPoint,
        metric_value: &Value,
        metric_snapshot: &Value,
        explanation: &str,
        evaluated_at: chrono::DateTime<Utc>,
        actor_id: &str,
        correlation_id: Uuid,
        trigger: Option<&Event>,
    ) -> CoreResult<()> {
        let payload = RuleViolationDetectedPayload {
            violation_id: Uuid::new_v4(),
            rule_id: rule.rule_id,
            rule_name: rule.name.clone(),
            rule_version: rule.version,
            severity: rule.severity,
            scope: rule.scope,
            scope_id: rule.scope_id.clone(),
            order_id: order.order_id,
            account_id: order.account_id.clone(),
            evaluation_point: point,
            metric_value: metric_value.clone(),
            threshold: rule.predicate.value.clone(),
            status: "ACTIVE".to_string(),
            explanation: explanation.to_string(),
            metric_snapshot: metric_snapshot.clone(),
            evaluated_at,
        };
        let mut event = Event::new(
            EventType::RuleViolationDetected,
            Aggregate::rule(rule.rule_id),
            Actor::system(actor_id),
            correlation_id,
            to_payload(&payload)?,
        );
        if let Some(trigger) = trigger {
            event = event.derived_from(trigger);
        }
        self.pipeline.emit(event).await?;
        Ok(())
    }

    async fn emit_boundary(
        &self,
        event_type: EventType,
        payload: Value,
        order_id: Uuid,
        actor_id: &str,
        correlation_id: Uuid,
        trigger: Option<&Event>,
    ) -> CoreResult<()> {
        let mut event = Event::new(
            event_type,
            Aggregate::order(order_id),
            Actor::system(actor_id),
            correlation_id,
            payload,
        );
        if let Some(trigger) = trigger {
            event = event.derived_from(trigger);
        }
        self.pipeline.emit(event).await?;
        Ok(())
    }
}

/// Keep one rule per rule key, preferring the most specific scope
/// (ACCOUNT > HOUSEHOLD > GLOBAL). Equal-scope ties keep whichever was
/// seen first; the ordering of candidates is not guaranteed.
fn apply_rule_precedence(rules: Vec<ComplianceRule>) -> Vec<ComplianceRule> {
    let mut by_key: HashMap<String, ComplianceRule> = HashMap::new();
    for rule in rules {
        match by_key.get(&rule.rule_key) {
            Some(existing) if existing.scope.precedence() >= rule.scope.precedence() => {}
            _ => {
                by_key.insert(rule.rule_key.clone(), rule);
            }
        }
    }
    by_key.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_common::compliance::{Predicate, PredicateOperator, RuleScope, RuleStatus};

    fn rule_with(key: &str, scope: RuleScope) -> ComplianceRule {
        let now = Utc::now();
        ComplianceRule {
            rule_id: Uuid::new_v4(),
            rule_set_id: None,
            rule_key: key.to_string(),
            name: key.to_string(),
            description: None,
            version: 1,
            severity: RuleSeverity::Warn,
            scope,
            scope_id: None,
            predicate: Predicate {
                metric: "portfolio.duration".to_string(),
                operator: PredicateOperator::Le,
                value: json!(5),
                instrument_filter: None,
            },
            explanation_template: String::new(),
            evaluation_points: vec![EvaluationPoint::PreTrade],
            status: RuleStatus::Active,
            effective_from: now,
            effective_to: None,
            evaluation_count: 0,
            violation_count: 0,
            last_evaluated_at: None,
            last_violated_at: None,
            created_at: now,
            created_by: "ops".to_string(),
            updated_at: now,
            updated_by: "ops".to_string(),
        }
    }

    #[test]
    fn test_precedence_prefers_most_specific_scope() {
        let deduped = apply_rule_precedence(vec![
            rule_with("max_duration", RuleScope::Global),
            rule_with("max_duration", RuleScope::Account),
            rule_with("max_duration", RuleScope::Household),
        ]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].scope, RuleScope::Account);
    }

    #[test]
    fn test_precedence_keeps_distinct_keys() {
        let deduped = apply_rule_precedence(vec![
            rule_with("max_duration", RuleScope::Global),
            rule_with("max_order_size", RuleScope::Global),
        ]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_precedence_survives_arrival_order() {
        // Account-scope first, then global: global must not replace it
        let deduped = apply_rule_precedence(vec![
            rule_with("max_duration", RuleScope::Account),
            rule_with("max_duration", RuleScope::Global),
        ]);
        assert_eq!(deduped[0].scope, RuleScope::Account);
    }
}
