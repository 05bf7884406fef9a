//! Compliance read model projection: rules, rule sets, evaluations,
//! violations.
//!
//! The evaluation and violation counters on rules are at-least-once:
//! re-delivery of the same event increments them again. Everything else
//! converges under re-delivery.

use std::sync::Arc;

use async_trait::async_trait;

use backoffice_common::compliance::{
    ComplianceEvaluation, ComplianceRule, ComplianceRuleSet, ComplianceViolation, RuleStatus,
};
use backoffice_common::error::CoreResult;
use backoffice_common::events::{
    from_payload, Event, EventType, RuleDeletedPayload, RuleEvaluatedPayload,
    RuleSetPublishedPayload, RuleStatusPayload, RuleUpsertPayload,
    RuleViolationDetectedPayload,
};

use crate::projections::EventConsumer;
use crate::readmodel::ReadModelStore;

/// Maintains the compliance tables from rule lifecycle and evaluation
/// events.
pub struct ComplianceProjection {
    read: Arc<dyn ReadModelStore>,
}

impl ComplianceProjection {
    pub fn new(read: Arc<dyn ReadModelStore>) -> Self {
        Self { read }
    }

    async fn on_rule_upsert(&self, event: &Event) -> CoreResult<()> {
        let payload: RuleUpsertPayload = from_payload(&event.payload)?;
        let rule = ComplianceRule {
            rule_id: payload.rule_id,
            rule_set_id: payload.rule_set_id,
            rule_key: payload.rule_key,
            name: payload.name,
            description: payload.description,
            version: payload.version,
            severity: payload.severity,
            scope: payload.scope,
            scope_id: payload.scope_id,
            predicate: payload.predicate,
            explanation_template: payload.explanation_template,
            evaluation_points: payload.evaluation_points,
            status: payload.status,
            effective_from: payload.effective_from,
            effective_to: payload.effective_to,
            evaluation_count: 0,
            violation_count: 0,
            last_evaluated_at: None,
            last_violated_at: None,
            created_at: event.occurred_at,
            created_by: payload.created_by,
            updated_at: event.occurred_at,
            updated_by: payload.updated_by,
        };
        self.read.upsert_rule(rule).await?;
        Ok(())
    }

    async fn on_rule_status(&self, event: &Event, status: RuleStatus) -> CoreResult<()> {
        let payload: RuleStatusPayload = from_payload(&event.payload)?;
        self.read
            .set_rule_status(payload.rule_id, status, &payload.updated_by, event.occurred_at)
            .await?;
        Ok(())
    }

    async fn on_rule_evaluated(&self, event: &Event) -> CoreResult<()> {
        // The OMS-side summary event shares this type but has no
        // evaluationId; it belongs to the order projection.
        if event.payload.get("evaluationId").is_none() {
            return Ok(());
        }
        let payload: RuleEvaluatedPayload = from_payload(&event.payload)?;
        let evaluation = ComplianceEvaluation {
            evaluation_id: payload.evaluation_id,
            rule_id: payload.rule_id,
            rule_version: payload.rule_version,
            order_id: payload.order_id,
            account_id: payload.account_id,
            evaluation_point: payload.evaluation_point,
            result: payload.result,
            metric_value: payload.metric_value,
            threshold: payload.threshold,
            metric_snapshot: payload.metric_snapshot,
            explanation: payload.explanation,
            evaluated_at: payload.evaluated_at,
        };
        self.read.record_rule_evaluation(evaluation).await?;
        Ok(())
    }

    async fn on_rule_violation(&self, event: &Event) -> CoreResult<()> {
        let payload: RuleViolationDetectedPayload = from_payload(&event.payload)?;
        let violation = ComplianceViolation {
            violation_id: payload.violation_id,
            rule_id: payload.rule_id,
            rule_name: payload.rule_name,
            rule_version: payload.rule_version,
            severity: payload.severity,
            scope: payload.scope,
            scope_id: payload.scope_id,
            order_id: payload.order_id,
            account_id: payload.account_id,
            evaluation_point: payload.evaluation_point,
            metric_value: payload.metric_value,
            threshold: payload.threshold,
            status: payload.status,
            explanation: payload.explanation,
            metric_snapshot: payload.metric_snapshot,
            evaluated_at: payload.evaluated_at,
            resolved_at: None,
        };
        self.read.record_rule_violation(violation).await?;
        Ok(())
    }

    async fn on_rule_set_published(&self, event: &Event) -> CoreResult<()> {
        let payload: RuleSetPublishedPayload = from_payload(&event.payload)?;
        let rule_set = ComplianceRuleSet {
            rule_set_id: payload.rule_set_id,
            name: payload.name,
            description: payload.description,
            version: payload.version,
            status: payload.status,
            effective_from: payload.effective_from,
            effective_to: payload.effective_to,
            created_at: event.occurred_at,
            created_by: payload.published_by.clone(),
            updated_at: event.occurred_at,
            updated_by: payload.published_by,
        };
        self.read.upsert_rule_set(rule_set).await?;
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for ComplianceProjection {
    fn name(&self) -> &'static str {
        "compliance-projection"
    }

    async fn handle(&self, event: &Event) -> CoreResult<()> {
        match event.event_type {
            EventType::RuleCreated | EventType::RuleUpdated => self.on_rule_upsert(event).await,
            EventType::RuleEnabled => self.on_rule_status(event, RuleStatus::Active).await,
            EventType::RuleDisabled => self.on_rule_status(event, RuleStatus::Inactive).await,
            EventType::RuleDeleted => {
                let payload: RuleDeletedPayload = from_payload(&event.payload)?;
                self.read.delete_rule(payload.rule_id).await?;
                Ok(())
            }
            EventType::RuleEvaluated => self.on_rule_evaluated(event).await,
            EventType::RuleViolationDetected => self.on_rule_violation(event).await,
            EventType::RuleSetPublished => self.on_rule_set_published(event).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_common::compliance::{
        ComplianceStatus, EvaluationPoint, Predicate, PredicateOperator, RuleScope, RuleSeverity,
    };
    use backoffice_common::events::{to_payload, Actor, Aggregate};
    use crate::readmodel::MemoryReadModels;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn upsert_payload(rule_id: Uuid, version: i32) -> RuleUpsertPayload {
        RuleUpsertPayload {
            rule_id,
            rule_key: "max_duration".to_string(),
            name: "Max duration".to_string(),
            description: None,
            version,
            severity: RuleSeverity::Block,
            scope: RuleScope::Account,
            scope_id: Some("ACC-1".to_string()),
            predicate: Predicate {
                metric: "portfolio.duration".to_string(),
                operator: PredicateOperator::Le,
                value: json!(5),
                instrument_filter: None,
            },
            explanation_template: String::new(),
            evaluation_points: vec![EvaluationPoint::PreTrade],
            status: backoffice_common::compliance::RuleStatus::Active,
            effective_from: Utc::now() - chrono::Duration::days(1),
            effective_to: None,
            rule_set_id: None,
            created_by: "ops".to_string(),
            updated_by: "ops".to_string(),
        }
    }

    fn rule_event(event_type: EventType, rule_id: Uuid, payload: serde_json::Value) -> Event {
        Event::new(
            event_type,
            Aggregate::rule(rule_id),
            Actor::user("ops"),
            Uuid::new_v4(),
            payload,
        )
    }

    #[tokio::test]
    async fn test_rule_create_update_preserves_counters() {
        let read = Arc::new(MemoryReadModels::new());
        let projection = ComplianceProjection::new(read.clone());
        let rule_id = Uuid::new_v4();

        projection
            .handle(&rule_event(
                EventType::RuleCreated,
                rule_id,
                to_payload(&upsert_payload(rule_id, 1)).unwrap(),
            ))
            .await
            .unwrap();

        // One evaluation lands before the update
        let evaluation = RuleEvaluatedPayload {
            evaluation_id: Uuid::new_v4(),
            rule_id,
            rule_version: 1,
            order_id: Uuid::new_v4(),
            account_id: "ACC-1".to_string(),
            evaluation_point: EvaluationPoint::PreTrade,
            result: ComplianceStatus::Pass,
            metric_value: json!(4.0),
            threshold: json!(5),
            metric_snapshot: json!({}),
            explanation: "ok".to_string(),
            evaluated_at: Utc::now(),
        };
        projection
            .handle(&rule_event(
                EventType::RuleEvaluated,
                rule_id,
                to_payload(&evaluation).unwrap(),
            ))
            .await
            .unwrap();

        projection
            .handle(&rule_event(
                EventType::RuleUpdated,
                rule_id,
                to_payload(&upsert_payload(rule_id, 2)).unwrap(),
            ))
            .await
            .unwrap();

        let rule = read.get_rule(rule_id).await.unwrap().unwrap();
        assert_eq!(rule.version, 2);
        assert_eq!(rule.evaluation_count, 1);
    }

    #[tokio::test]
    async fn test_status_events_flip_rule_status() {
        let read = Arc::new(MemoryReadModels::new());
        let projection = ComplianceProjection::new(read.clone());
        let rule_id = Uuid::new_v4();

        projection
            .handle(&rule_event(
                EventType::RuleCreated,
                rule_id,
                to_payload(&upsert_payload(rule_id, 1)).unwrap(),
            ))
            .await
            .unwrap();

        let status_payload = RuleStatusPayload {
            rule_id,
            status: RuleStatus::Inactive,
            updated_by: "ops".to_string(),
        };
        projection
            .handle(&rule_event(
                EventType::RuleDisabled,
                rule_id,
                to_payload(&status_payload).unwrap(),
            ))
            .await
            .unwrap();

        let rule = read.get_rule(rule_id).await.unwrap().unwrap();
        assert_eq!(rule.status, RuleStatus::Inactive);
    }

    #[tokio::test]
    async fn test_violation_recorded_and_counted() {
        let read = Arc::new(MemoryReadModels::new());
        let projection = ComplianceProjection::new(read.clone());
        let rule_id = Uuid::new_v4();
        let order_id = Uuid::new_v4();

        projection
            .handle(&rule_event(
                EventType::RuleCreated,
                rule_id,
                to_payload(&upsert_payload(rule_id, 1)).unwrap(),
            ))
            .await
            .unwrap();

        let violation = RuleViolationDetectedPayload {
            violation_id: Uuid::new_v4(),
            rule_id,
            rule_name: "Max duration".to_string(),
            rule_version: 1,
            severity: RuleSeverity::Block,
            scope: RuleScope::Account,
            scope_id: Some("ACC-1".to_string()),
            order_id,
            account_id: "ACC-1".to_string(),
            evaluation_point: EvaluationPoint::PreTrade,
            metric_value: json!(6.0),
            threshold: json!(5),
            status: "ACTIVE".to_string(),
            explanation: "duration over limit".to_string(),
            metric_snapshot: json!({}),
            evaluated_at: Utc::now(),
        };
        projection
            .handle(&rule_event(
                EventType::RuleViolationDetected,
                rule_id,
                to_payload(&violation).unwrap(),
            ))
            .await
            .unwrap();

        let rule = read.get_rule(rule_id).await.unwrap().unwrap();
        assert_eq!(rule.violation_count, 1);
        assert_eq!(read.violations_by_order(order_id).await.unwrap().len(), 1);
    }
}
