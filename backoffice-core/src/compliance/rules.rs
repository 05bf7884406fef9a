//! Rule lifecycle commands: create, update, enable, disable, delete,
//! and rule-set publication.

use chrono::Utc;
use uuid::Uuid;

use backoffice_common::compliance::{RuleInput, RuleSetInput, RuleStatus};
use backoffice_common::error::{CoreError, CoreResult, ValidationError};
use backoffice_common::events::{
    to_payload, Actor, Aggregate, Event, EventType, RuleDeletedPayload, RuleSetPublishedPayload,
    RuleStatusPayload, RuleUpsertPayload,
};

use super::ComplianceService;

impl ComplianceService {
    /// Create a new rule. The rule key must be unique across rules.
    pub async fn create_rule(&self, input: RuleInput, correlation_id: Uuid) -> CoreResult<Uuid> {
        if input.rule_key.is_empty() {
            return Err(ValidationError::required("ruleKey").into());
        }
        if input.name.is_empty() {
            return Err(ValidationError::required("name").into());
        }
        if input.actor_id.is_empty() {
            return Err(ValidationError::required("createdBy").into());
        }

        if self.read.rule_key_exists(&input.rule_key).await? {
            return Err(CoreError::conflict(format!(
                "ruleKey already exists: {}",
                input.rule_key
            )));
        }

        let rule_id = Uuid::new_v4();
        let payload = build_rule_payload(rule_id, input, 1);
        let event = Event::new(
            EventType::RuleCreated,
            Aggregate::rule(rule_id),
            Actor::user(&payload.created_by),
            correlation_id,
            to_payload(&payload)?,
        );
        self.pipeline.emit(event).await?;

        Ok(rule_id)
    }

    /// Update a rule, bumping its version. The rule key cannot change.
    pub async fn update_rule(
        &self,
        rule_id: Uuid,
        mut input: RuleInput,
        correlation_id: Uuid,
    ) -> CoreResult<Uuid> {
        if input.actor_id.is_empty() {
            return Err(ValidationError::required("updatedBy").into());
        }

        let existing = self
            .read
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Rule", rule_id))?;

        if !input.rule_key.is_empty() && input.rule_key != existing.rule_key {
            return Err(CoreError::conflict("ruleKey cannot be changed"));
        }
        input.rule_key = existing.rule_key.clone();
        if input.status.is_none() {
            input.status = Some(existing.status);
        }

        let payload = build_rule_payload(rule_id, input, existing.version + 1);
        let event = Event::new(
            EventType::RuleUpdated,
            Aggregate::rule(rule_id),
            Actor::user(&payload.updated_by),
            correlation_id,
            to_payload(&payload)?,
        );
        self.pipeline.emit(event).await?;

        Ok(rule_id)
    }

    /// Move a rule to ACTIVE.
    pub async fn enable_rule(
        &self,
        rule_id: Uuid,
        actor_id: &str,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        self.emit_rule_status(
            rule_id,
            RuleStatus::Active,
            EventType::RuleEnabled,
            actor_id,
            correlation_id,
        )
        .await
    }

    /// Move a rule to INACTIVE.
    pub async fn disable_rule(
        &self,
        rule_id: Uuid,
        actor_id: &str,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        self.emit_rule_status(
            rule_id,
            RuleStatus::Inactive,
            EventType::RuleDisabled,
            actor_id,
            correlation_id,
        )
        .await
    }

    /// Delete a rule. Forbidden once the rule has been evaluated.
    pub async fn delete_rule(
        &self,
        rule_id: Uuid,
        actor_id: &str,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        if actor_id.is_empty() {
            return Err(ValidationError::required("actorId").into());
        }

        let rule = self
            .read
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Rule", rule_id))?;
        if rule.evaluation_count > 0 {
            return Err(CoreError::conflict(
                "rule has evaluations and cannot be deleted",
            ));
        }

        let payload = RuleDeletedPayload {
            rule_id,
            deleted_by: actor_id.to_string(),
        };
        let event = Event::new(
            EventType::RuleDeleted,
            Aggregate::rule(rule_id),
            Actor::user(actor_id),
            correlation_id,
            to_payload(&payload)?,
        );
        self.pipeline.emit(event).await?;

        Ok(())
    }

    /// Publish a rule set.
    pub async fn publish_rule_set(
        &self,
        input: RuleSetInput,
        correlation_id: Uuid,
    ) -> CoreResult<Uuid> {
        if input.name.is_empty() {
            return Err(ValidationError::required("name").into());
        }
        if input.actor_id.is_empty() {
            return Err(ValidationError::required("actorId").into());
        }

        let rule_set_id = input.rule_set_id.unwrap_or_else(Uuid::new_v4);
        let payload = RuleSetPublishedPayload {
            rule_set_id,
            name: input.name,
            description: input.description,
            version: input.version.unwrap_or(1),
            status: input.status.unwrap_or_else(|| "PUBLISHED".to_string()),
            effective_from: input.effective_from.unwrap_or_else(Utc::now),
            effective_to: input.effective_to,
            published_by: input.actor_id.clone(),
        };
        let event = Event::new(
            EventType::RuleSetPublished,
            Aggregate::rule_set(rule_set_id),
            Actor::user(&input.actor_id),
            correlation_id,
            to_payload(&payload)?,
        );
        self.pipeline.emit(event).await?;

        Ok(rule_set_id)
    }

    async fn emit_rule_status(
        &self,
        rule_id: Uuid,
        status: RuleStatus,
        event_type: EventType,
        actor_id: &str,
        correlation_id: Uuid,
    ) -> CoreResult<()> {
        if actor_id.is_empty() {
            return Err(ValidationError::required("actorId").into());
        }
        self.read
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Rule", rule_id))?;

        let payload = RuleStatusPayload {
            rule_id,
            status,
            updated_by: actor_id.to_string(),
        };
        let event = Event::new(
            event_type,
            Aggregate::rule(rule_id),
            Actor::user(actor_id),
            correlation_id,
            to_payload(&payload)?,
        );
        self.pipeline.emit(event).await?;

        Ok(())
    }
}

fn build_rule_payload(rule_id: Uuid, input: RuleInput, version: i32) -> RuleUpsertPayload {
    RuleUpsertPayload {
        rule_id,
        rule_key: input.rule_key,
        name: input.name,
        description: input.description,
        version,
        severity: input.severity,
        scope: input.scope,
        scope_id: input.scope_id,
        predicate: input.predicate,
        explanation_template: input.explanation_template,
        evaluation_points: input.evaluation_points,
        status: input.status.unwrap_or_default(),
        effective_from: input.effective_from.unwrap_or_else(Utc::now),
        effective_to: input.effective_to,
        rule_set_id: input.rule_set_id,
        created_by: input.actor_id.clone(),
        updated_by: input.actor_id,
    }
}
