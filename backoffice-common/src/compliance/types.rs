//! Compliance rule model and predicate algebra.
//!
//! A rule carries a predicate over a named metric. Predicates are
//! evaluated against numeric metrics (Decimal, with a 1e-6 equality
//! epsilon) or strings; `in` accepts a list threshold.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tolerance for numeric equality in predicate evaluation.
const EQUALITY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Severity of a rule violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleSeverity {
    /// Violation routes the order to approval
    Warn,
    /// Violation rejects the order
    Block,
}

impl fmt::Display for RuleSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSeverity::Warn => write!(f, "WARN"),
            RuleSeverity::Block => write!(f, "BLOCK"),
        }
    }
}

/// Scope a rule applies to. More specific scopes shadow broader ones
/// for the same rule key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    Global,
    Household,
    Account,
}

impl RuleScope {
    /// Precedence for dedup: ACCOUNT > HOUSEHOLD > GLOBAL.
    pub fn precedence(&self) -> u8 {
        match self {
            RuleScope::Account => 3,
            RuleScope::Household => 2,
            RuleScope::Global => 1,
        }
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Global => write!(f, "GLOBAL"),
            RuleScope::Household => write!(f, "HOUSEHOLD"),
            RuleScope::Account => write!(f, "ACCOUNT"),
        }
    }
}

/// Rule lifecycle status. Only ACTIVE rules are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    #[default]
    Draft,
    Active,
    Inactive,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStatus::Draft => write!(f, "DRAFT"),
            RuleStatus::Active => write!(f, "ACTIVE"),
            RuleStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// Lifecycle moment at which a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationPoint {
    PreTrade,
    PreExecution,
    PostTrade,
}

impl fmt::Display for EvaluationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationPoint::PreTrade => write!(f, "PRE_TRADE"),
            EvaluationPoint::PreExecution => write!(f, "PRE_EXECUTION"),
            EvaluationPoint::PostTrade => write!(f, "POST_TRADE"),
        }
    }
}

/// Comparison operator in a rule predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredicateOperator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
}

impl fmt::Display for PredicateOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            PredicateOperator::Lt => "<",
            PredicateOperator::Le => "<=",
            PredicateOperator::Gt => ">",
            PredicateOperator::Ge => ">=",
            PredicateOperator::Eq => "==",
            PredicateOperator::Ne => "!=",
            PredicateOperator::In => "in",
        };
        write!(f, "{symbol}")
    }
}

impl PredicateOperator {
    /// Evaluate `metric <op> threshold`.
    ///
    /// Numeric comparison when both sides parse as numbers; string
    /// comparison otherwise. `in` requires a list threshold and matches
    /// by string form.
    pub fn compare(&self, metric: &Value, threshold: &Value) -> bool {
        if let (Some(m), Some(t)) = (decimal_from_value(metric), decimal_from_value(threshold)) {
            return match self {
                PredicateOperator::Lt => m < t,
                PredicateOperator::Le => m <= t,
                PredicateOperator::Gt => m > t,
                PredicateOperator::Ge => m >= t,
                PredicateOperator::Eq => (m - t).abs() < EQUALITY_EPSILON,
                PredicateOperator::Ne => (m - t).abs() >= EQUALITY_EPSILON,
                PredicateOperator::In => false,
            };
        }

        let metric_str = value_to_plain_string(metric);
        match self {
            PredicateOperator::Eq => metric_str == value_to_plain_string(threshold),
            PredicateOperator::Ne => metric_str != value_to_plain_string(threshold),
            PredicateOperator::In => threshold
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .any(|item| value_to_plain_string(item) == metric_str)
                })
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Coerce a JSON value into a Decimal when it carries a number.
///
/// Accepts JSON numbers and numeric strings; everything else is None.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(Decimal::from(i));
            }
            n.as_f64().and_then(Decimal::from_f64_retain)
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Render a JSON value the way it reads in an explanation template.
pub fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Instrument filter on a predicate; position metrics read the position
/// in this specific CUSIP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cusip: Option<String>,
}

/// A rule predicate: metric, operator, threshold value, optional filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    /// Metric name, resolved by prefix: `portfolio.`, `order.`, `position.`
    pub metric: String,
    pub operator: PredicateOperator,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_filter: Option<InstrumentFilter>,
}

impl Predicate {
    /// Returns true when the predicate holds for the given metric value.
    pub fn passes(&self, metric_value: &Value) -> bool {
        self.operator.compare(metric_value, &self.value)
    }
}

/// Aggregate outcome of an evaluation across rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Pass,
    Warn,
    Block,
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceStatus::Pass => write!(f, "PASS"),
            ComplianceStatus::Warn => write!(f, "WARN"),
            ComplianceStatus::Block => write!(f, "BLOCK"),
        }
    }
}

impl From<RuleSeverity> for ComplianceStatus {
    fn from(severity: RuleSeverity) -> Self {
        match severity {
            RuleSeverity::Warn => ComplianceStatus::Warn,
            RuleSeverity::Block => ComplianceStatus::Block,
        }
    }
}

/// One violated rule inside a compliance result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationSummary {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metrics: Value,
}

/// Outcome of evaluating all applicable rules at one lifecycle point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceResult {
    pub status: ComplianceStatus,
    #[serde(default)]
    pub rules_passed: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<ViolationSummary>,
    #[serde(default)]
    pub blocks: Vec<ViolationSummary>,
    pub checked_at: DateTime<Utc>,
}

impl ComplianceResult {
    /// An all-clear result with no rules applied.
    pub fn pass() -> Self {
        Self {
            status: ComplianceStatus::Pass,
            rules_passed: Vec::new(),
            warnings: Vec::new(),
            blocks: Vec::new(),
            checked_at: Utc::now(),
        }
    }
}

/// Compliance rule read model row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceRule {
    pub rule_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set_id: Option<Uuid>,
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
    pub evaluation_count: i64,
    pub violation_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_evaluated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_violated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl ComplianceRule {
    /// Active and inside the [effective_from, effective_to) window.
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.status == RuleStatus::Active
            && self.effective_from <= at
            && self.effective_to.map(|to| to > at).unwrap_or(true)
    }

    /// Whether the rule scope covers this account/household pair.
    pub fn matches_scope(&self, account_id: &str, household_id: Option<&str>) -> bool {
        match self.scope {
            RuleScope::Global => true,
            RuleScope::Account => self.scope_id.as_deref() == Some(account_id),
            RuleScope::Household => {
                household_id.is_some() && self.scope_id.as_deref() == household_id
            }
        }
    }

    /// Whether the rule evaluates at this lifecycle point.
    pub fn has_point(&self, point: EvaluationPoint) -> bool {
        self.evaluation_points.contains(&point)
    }

    /// Substitute `{metric}` / `{value}` / `{threshold}` in the template.
    pub fn explanation(&self, metric_value: &Value) -> String {
        let metric = value_to_plain_string(metric_value);
        let threshold = value_to_plain_string(&self.predicate.value);
        if self.explanation_template.is_empty() {
            return format!("Metric {metric} compared to {threshold}");
        }
        self.explanation_template
            .replace("{metric}", &metric)
            .replace("{value}", &metric)
            .replace("{threshold}", &threshold)
    }
}

/// Compliance rule set read model row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceRuleSet {
    pub rule_set_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: i32,
    pub status: String,
    pub effective_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

/// Stored record of one rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceEvaluation {
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

/// Stored record of one rule violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceViolation {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Input for creating or updating a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInput {
    pub rule_key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub severity: RuleSeverity,
    pub scope: RuleScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub predicate: Predicate,
    #[serde(default)]
    pub explanation_template: String,
    pub evaluation_points: Vec<EvaluationPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RuleStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set_id: Option<Uuid>,
    pub actor_id: String,
}

/// Input for publishing a rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set_id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    pub actor_id: String,
}
