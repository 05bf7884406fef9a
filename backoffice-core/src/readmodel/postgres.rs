//! Postgres read models over the shared connection pool.
//!
//! Every write is an UPSERT keyed by the natural id; the events table
//! stays the system of record and these tables can be rebuilt from it.
//! Structured values (predicates, analytics, trades) are stored as
//! JSONB in their wire form.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
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

use super::ReadModelStore;

/// Create every read-model table. The `events` table is bootstrapped by
/// the event store's own migration.
pub async fn run_read_model_migrations(pool: &PgPool) -> Result<(), StorageError> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_id UUID PRIMARY KEY,
            account_id TEXT NOT NULL,
            instrument_id TEXT NOT NULL,
            side TEXT NOT NULL,
            quantity NUMERIC(20, 6) NOT NULL,
            order_type TEXT NOT NULL,
            limit_price NUMERIC(20, 8),
            curve_spread_bp NUMERIC(20, 8),
            time_in_force TEXT NOT NULL,
            state TEXT NOT NULL,
            batch_id UUID,
            compliance_result JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            last_state_change_at TIMESTAMPTZ NOT NULL,
            sent_to_ems_at TIMESTAMPTZ,
            fully_filled_at TIMESTAMPTZ,
            settled_at TIMESTAMPTZ
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_orders_account ON orders (account_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_orders_state ON orders (state)",
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            execution_id UUID PRIMARY KEY,
            order_id UUID NOT NULL,
            account_id TEXT NOT NULL,
            instrument_id TEXT NOT NULL,
            side TEXT NOT NULL,
            total_quantity NUMERIC(20, 6) NOT NULL,
            filled_quantity NUMERIC(20, 6) NOT NULL,
            avg_fill_price NUMERIC(20, 8),
            status TEXT NOT NULL,
            as_of_date TIMESTAMPTZ NOT NULL,
            slippage_total NUMERIC(20, 8),
            slippage_breakdown JSONB,
            deterministic_inputs JSONB,
            execution_start_time TIMESTAMPTZ,
            execution_end_time TIMESTAMPTZ,
            settlement_date TIMESTAMPTZ,
            settled_at TIMESTAMPTZ,
            explanation TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_executions_order ON executions (order_id)",
        r#"
        CREATE TABLE IF NOT EXISTS fills (
            fill_id UUID PRIMARY KEY,
            execution_id UUID NOT NULL,
            clip_index INT NOT NULL,
            quantity NUMERIC(20, 6) NOT NULL,
            price NUMERIC(20, 8) NOT NULL,
            fill_timestamp TIMESTAMPTZ NOT NULL,
            slippage_bps NUMERIC(20, 8) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_fills_execution ON fills (execution_id, clip_index)",
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            account_id TEXT NOT NULL,
            instrument_id TEXT NOT NULL,
            quantity NUMERIC(20, 6) NOT NULL,
            avg_cost NUMERIC(20, 8) NOT NULL,
            market_value NUMERIC(20, 6) NOT NULL,
            duration NUMERIC(20, 8) NOT NULL,
            dv01 NUMERIC(20, 8) NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (account_id, instrument_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS instruments (
            cusip TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            maturity_date TIMESTAMPTZ NOT NULL,
            ask_price NUMERIC(20, 8),
            ask_modified_duration NUMERIC(20, 8),
            coupon NUMERIC(20, 8),
            coupon_frequency INT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            account_id TEXT PRIMARY KEY,
            household_id TEXT,
            name TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS households (
            household_id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS yield_curves (
            as_of_date DATE NOT NULL,
            tenor_years NUMERIC(10, 4) NOT NULL,
            par_yield NUMERIC(10, 6) NOT NULL,
            source_url TEXT,
            source_hash TEXT,
            ingested_at TIMESTAMPTZ,
            ingested_by TEXT,
            PRIMARY KEY (as_of_date, tenor_years)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS compliance_rules (
            rule_id UUID PRIMARY KEY,
            rule_set_id UUID,
            rule_key TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            version INT NOT NULL,
            severity TEXT NOT NULL,
            scope TEXT NOT NULL,
            scope_id TEXT,
            predicate JSONB NOT NULL,
            explanation_template TEXT NOT NULL,
            evaluation_points JSONB NOT NULL,
            status TEXT NOT NULL,
            effective_from TIMESTAMPTZ NOT NULL,
            effective_to TIMESTAMPTZ,
            evaluation_count BIGINT NOT NULL DEFAULT 0,
            violation_count BIGINT NOT NULL DEFAULT 0,
            last_evaluated_at TIMESTAMPTZ,
            last_violated_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            updated_by TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_rules_key ON compliance_rules (rule_key)",
        "CREATE INDEX IF NOT EXISTS idx_rules_scope ON compliance_rules (status, scope, scope_id)",
        r#"
        CREATE TABLE IF NOT EXISTS compliance_rule_sets (
            rule_set_id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            version INT NOT NULL,
            status TEXT NOT NULL,
            effective_from TIMESTAMPTZ NOT NULL,
            effective_to TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            updated_by TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS compliance_evaluations (
            evaluation_id UUID PRIMARY KEY,
            rule_id UUID NOT NULL,
            rule_version INT NOT NULL,
            order_id UUID NOT NULL,
            account_id TEXT NOT NULL,
            evaluation_point TEXT NOT NULL,
            result TEXT NOT NULL,
            metric_value JSONB,
            threshold JSONB,
            metric_snapshot JSONB,
            explanation TEXT NOT NULL,
            evaluated_at TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_evaluations_order ON compliance_evaluations (order_id, evaluated_at)",
        r#"
        CREATE TABLE IF NOT EXISTS compliance_violations (
            violation_id UUID PRIMARY KEY,
            rule_id UUID NOT NULL,
            rule_name TEXT NOT NULL,
            rule_version INT NOT NULL,
            severity TEXT NOT NULL,
            scope TEXT NOT NULL,
            scope_id TEXT,
            order_id UUID NOT NULL,
            account_id TEXT NOT NULL,
            evaluation_point TEXT NOT NULL,
            metric_value JSONB,
            threshold JSONB,
            status TEXT NOT NULL,
            explanation TEXT NOT NULL,
            metric_snapshot JSONB,
            evaluated_at TIMESTAMPTZ NOT NULL,
            resolved_at TIMESTAMPTZ
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_violations_order ON compliance_violations (order_id, evaluated_at)",
        r#"
        CREATE TABLE IF NOT EXISTS portfolio_targets (
            target_id UUID PRIMARY KEY,
            scope TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            model_id TEXT,
            duration_target NUMERIC(20, 8) NOT NULL,
            bucket_weights JSONB NOT NULL,
            constraints JSONB,
            effective_from TIMESTAMPTZ NOT NULL,
            effective_to TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            created_by TEXT NOT NULL,
            account_id TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            proposal_id UUID PRIMARY KEY,
            account_id TEXT,
            household_id TEXT,
            as_of_date TIMESTAMPTZ NOT NULL,
            target_id UUID,
            trades JSONB NOT NULL,
            current_analytics JSONB NOT NULL,
            predicted_analytics JSONB NOT NULL,
            assumptions TEXT,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            created_by TEXT NOT NULL,
            approved_at TIMESTAMPTZ,
            approved_by TEXT,
            sent_to_oms_at TIMESTAMPTZ
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Read models over a shared Postgres pool.
pub struct PgReadModels {
    pool: PgPool,
}

impl PgReadModels {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn ge(err: sqlx::Error) -> StorageError {
    StorageError::Query(err.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, StorageError> {
    serde_json::to_value(value).map_err(|e| StorageError::Query(e.to_string()))
}

fn from_json<T: DeserializeOwned>(value: Value) -> Result<T, StorageError> {
    serde_json::from_value(value).map_err(|e| StorageError::Query(e.to_string()))
}

fn parse_wire<T: DeserializeOwned>(raw: String) -> Result<T, StorageError> {
    from_json(Value::String(raw))
}

fn from_json_opt<T: DeserializeOwned>(value: Option<Value>) -> Result<Option<T>, StorageError> {
    value.map(from_json).transpose()
}

fn row_to_order(row: &PgRow) -> Result<Order, StorageError> {
    Ok(Order {
        order_id: row.try_get("order_id").map_err(ge)?,
        account_id: row.try_get("account_id").map_err(ge)?,
        instrument_id: row.try_get("instrument_id").map_err(ge)?,
        side: parse_wire(row.try_get("side").map_err(ge)?)?,
        quantity: row.try_get("quantity").map_err(ge)?,
        order_type: parse_wire(row.try_get("order_type").map_err(ge)?)?,
        limit_price: row.try_get("limit_price").map_err(ge)?,
        curve_spread_bp: row.try_get("curve_spread_bp").map_err(ge)?,
        time_in_force: parse_wire(row.try_get("time_in_force").map_err(ge)?)?,
        state: parse_wire(row.try_get("state").map_err(ge)?)?,
        batch_id: row.try_get("batch_id").map_err(ge)?,
        compliance_result: from_json_opt(row.try_get("compliance_result").map_err(ge)?)?,
        created_at: row.try_get("created_at").map_err(ge)?,
        created_by: row.try_get("created_by").map_err(ge)?,
        updated_at: row.try_get("updated_at").map_err(ge)?,
        last_state_change_at: row.try_get("last_state_change_at").map_err(ge)?,
        sent_to_ems_at: row.try_get("sent_to_ems_at").map_err(ge)?,
        fully_filled_at: row.try_get("fully_filled_at").map_err(ge)?,
        settled_at: row.try_get("settled_at").map_err(ge)?,
    })
}

fn row_to_execution(row: &PgRow) -> Result<Execution, StorageError> {
    Ok(Execution {
        execution_id: row.try_get("execution_id").map_err(ge)?,
        order_id: row.try_get("order_id").map_err(ge)?,
        account_id: row.try_get("account_id").map_err(ge)?,
        instrument_id: row.try_get("instrument_id").map_err(ge)?,
        side: parse_wire(row.try_get("side").map_err(ge)?)?,
        total_quantity: row.try_get("total_quantity").map_err(ge)?,
        filled_quantity: row.try_get("filled_quantity").map_err(ge)?,
        avg_fill_price: row.try_get("avg_fill_price").map_err(ge)?,
        status: parse_wire(row.try_get("status").map_err(ge)?)?,
        as_of_date: row.try_get("as_of_date").map_err(ge)?,
        slippage_total: row.try_get("slippage_total").map_err(ge)?,
        slippage_breakdown: from_json_opt(row.try_get("slippage_breakdown").map_err(ge)?)?,
        deterministic_inputs: from_json_opt(row.try_get("deterministic_inputs").map_err(ge)?)?,
        execution_start_time: row.try_get("execution_start_time").map_err(ge)?,
        execution_end_time: row.try_get("execution_end_time").map_err(ge)?,
        settlement_date: row.try_get("settlement_date").map_err(ge)?,
        settled_at: row.try_get("settled_at").map_err(ge)?,
        explanation: row.try_get("explanation").map_err(ge)?,
        created_at: row.try_get("created_at").map_err(ge)?,
        updated_at: row.try_get("updated_at").map_err(ge)?,
    })
}

fn row_to_fill(row: &PgRow) -> Result<Fill, StorageError> {
    Ok(Fill {
        fill_id: row.try_get("fill_id").map_err(ge)?,
        execution_id: row.try_get("execution_id").map_err(ge)?,
        clip_index: row.try_get("clip_index").map_err(ge)?,
        quantity: row.try_get("quantity").map_err(ge)?,
        price: row.try_get("price").map_err(ge)?,
        timestamp: row.try_get("fill_timestamp").map_err(ge)?,
        slippage_bps: row.try_get("slippage_bps").map_err(ge)?,
        created_at: row.try_get("created_at").map_err(ge)?,
    })
}

fn row_to_position(row: &PgRow) -> Result<Position, StorageError> {
    Ok(Position {
        account_id: row.try_get("account_id").map_err(ge)?,
        instrument_id: row.try_get("instrument_id").map_err(ge)?,
        quantity: row.try_get("quantity").map_err(ge)?,
        avg_cost: row.try_get("avg_cost").map_err(ge)?,
        market_value: row.try_get("market_value").map_err(ge)?,
        duration: row.try_get("duration").map_err(ge)?,
        dv01: row.try_get("dv01").map_err(ge)?,
        updated_at: row.try_get("updated_at").map_err(ge)?,
    })
}

fn row_to_rule(row: &PgRow) -> Result<ComplianceRule, StorageError> {
    Ok(ComplianceRule {
        rule_id: row.try_get("rule_id").map_err(ge)?,
        rule_set_id: row.try_get("rule_set_id").map_err(ge)?,
        rule_key: row.try_get("rule_key").map_err(ge)?,
        name: row.try_get("name").map_err(ge)?,
        description: row.try_get("description").map_err(ge)?,
        version: row.try_get("version").map_err(ge)?,
        severity: parse_wire(row.try_get("severity").map_err(ge)?)?,
        scope: parse_wire(row.try_get("scope").map_err(ge)?)?,
        scope_id: row.try_get("scope_id").map_err(ge)?,
        predicate: from_json(row.try_get("predicate").map_err(ge)?)?,
        explanation_template: row.try_get("explanation_template").map_err(ge)?,
        evaluation_points: from_json(row.try_get("evaluation_points").map_err(ge)?)?,
        status: parse_wire(row.try_get("status").map_err(ge)?)?,
        effective_from: row.try_get("effective_from").map_err(ge)?,
        effective_to: row.try_get("effective_to").map_err(ge)?,
        evaluation_count: row.try_get("evaluation_count").map_err(ge)?,
        violation_count: row.try_get("violation_count").map_err(ge)?,
        last_evaluated_at: row.try_get("last_evaluated_at").map_err(ge)?,
        last_violated_at: row.try_get("last_violated_at").map_err(ge)?,
        created_at: row.try_get("created_at").map_err(ge)?,
        created_by: row.try_get("created_by").map_err(ge)?,
        updated_at: row.try_get("updated_at").map_err(ge)?,
        updated_by: row.try_get("updated_by").map_err(ge)?,
    })
}

fn row_to_evaluation(row: &PgRow) -> Result<ComplianceEvaluation, StorageError> {
    Ok(ComplianceEvaluation {
        evaluation_id: row.try_get("evaluation_id").map_err(ge)?,
        rule_id: row.try_get("rule_id").map_err(ge)?,
        rule_version: row.try_get("rule_version").map_err(ge)?,
        order_id: row.try_get("order_id").map_err(ge)?,
        account_id: row.try_get("account_id").map_err(ge)?,
        evaluation_point: parse_wire(row.try_get("evaluation_point").map_err(ge)?)?,
        result: parse_wire(row.try_get("result").map_err(ge)?)?,
        metric_value: row
            .try_get::<Option<Value>, _>("metric_value")
            .map_err(ge)?
            .unwrap_or(Value::Null),
        threshold: row
            .try_get::<Option<Value>, _>("threshold")
            .map_err(ge)?
            .unwrap_or(Value::Null),
        metric_snapshot: row
            .try_get::<Option<Value>, _>("metric_snapshot")
            .map_err(ge)?
            .unwrap_or(Value::Null),
        explanation: row.try_get("explanation").map_err(ge)?,
        evaluated_at: row.try_get("evaluated_at").map_err(ge)?,
    })
}

fn row_to_violation(row: &PgRow) -> Result<ComplianceViolation, StorageError> {
    Ok(ComplianceViolation {
        violation_id: row.try_get("violation_id").map_err(ge)?,
        rule_id: row.try_get("rule_id").map_err(ge)?,
        rule_name: row.try_get("rule_name").map_err(ge)?,
        rule_version: row.try_get("rule_version").map_err(ge)?,
        severity: parse_wire(row.try_get("severity").map_err(ge)?)?,
        scope: parse_wire(row.try_get("scope").map_err(ge)?)?,
        scope_id: row.try_get("scope_id").map_err(ge)?,
        order_id: row.try_get("order_id").map_err(ge)?,
        account_id: row.try_get("account_id").map_err(ge)?,
        evaluation_point: parse_wire(row.try_get("evaluation_point").map_err(ge)?)?,
        metric_value: row
            .try_get::<Option<Value>, _>("metric_value")
            .map_err(ge)?
            .unwrap_or(Value::Null),
        threshold: row
            .try_get::<Option<Value>, _>("threshold")
            .map_err(ge)?
            .unwrap_or(Value::Null),
        status: row.try_get("status").map_err(ge)?,
        explanation: row.try_get("explanation").map_err(ge)?,
        metric_snapshot: row
            .try_get::<Option<Value>, _>("metric_snapshot")
            .map_err(ge)?
            .unwrap_or(Value::Null),
        evaluated_at: row.try_get("evaluated_at").map_err(ge)?,
        resolved_at: row.try_get("resolved_at").map_err(ge)?,
    })
}

fn row_to_target(row: &PgRow) -> Result<PortfolioTarget, StorageError> {
    Ok(PortfolioTarget {
        target_id: row.try_get("target_id").map_err(ge)?,
        scope: parse_wire(row.try_get("scope").map_err(ge)?)?,
        scope_id: row.try_get("scope_id").map_err(ge)?,
        model_id: row.try_get("model_id").map_err(ge)?,
        duration_target: row.try_get("duration_target").map_err(ge)?,
        bucket_weights: from_json(row.try_get("bucket_weights").map_err(ge)?)?,
        constraints: from_json_opt(row.try_get("constraints").map_err(ge)?)?,
        effective_from: row.try_get("effective_from").map_err(ge)?,
        effective_to: row.try_get("effective_to").map_err(ge)?,
        created_at: row.try_get("created_at").map_err(ge)?,
        created_by: row.try_get("created_by").map_err(ge)?,
        account_id: row.try_get("account_id").map_err(ge)?,
    })
}

fn row_to_proposal(row: &PgRow) -> Result<Proposal, StorageError> {
    Ok(Proposal {
        proposal_id: row.try_get("proposal_id").map_err(ge)?,
        account_id: row.try_get("account_id").map_err(ge)?,
        household_id: row.try_get("household_id").map_err(ge)?,
        as_of_date: row.try_get("as_of_date").map_err(ge)?,
        target_id: row.try_get("target_id").map_err(ge)?,
        trades: from_json(row.try_get("trades").map_err(ge)?)?,
        current_analytics: from_json(row.try_get("current_analytics").map_err(ge)?)?,
        predicted_analytics: from_json(row.try_get("predicted_analytics").map_err(ge)?)?,
        assumptions: row.try_get("assumptions").map_err(ge)?,
        status: parse_wire(row.try_get("status").map_err(ge)?)?,
        created_at: row.try_get("created_at").map_err(ge)?,
        created_by: row.try_get("created_by").map_err(ge)?,
        approved_at: row.try_get("approved_at").map_err(ge)?,
        approved_by: row.try_get("approved_by").map_err(ge)?,
        sent_to_oms_at: row.try_get("sent_to_oms_at").map_err(ge)?,
    })
}

fn row_to_instrument(row: &PgRow) -> Result<Instrument, StorageError> {
    Ok(Instrument {
        cusip: row.try_get("cusip").map_err(ge)?,
        name: row.try_get("name").map_err(ge)?,
        maturity_date: row.try_get("maturity_date").map_err(ge)?,
        ask_price: row.try_get("ask_price").map_err(ge)?,
        ask_modified_duration: row.try_get("ask_modified_duration").map_err(ge)?,
        coupon: row.try_get("coupon").map_err(ge)?,
        coupon_frequency: row.try_get("coupon_frequency").map_err(ge)?,
    })
}

#[async_trait]
impl ReadModelStore for PgReadModels {
    // -- orders ------------------------------------------------------

    async fn upsert_order(&self, order: Order) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, account_id, instrument_id, side, quantity, order_type,
                limit_price, curve_spread_bp, time_in_force, state, batch_id,
                compliance_result, created_at, created_by, updated_at,
                last_state_change_at, sent_to_ems_at, fully_filled_at, settled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (order_id) DO UPDATE SET
                account_id = EXCLUDED.account_id,
                instrument_id = EXCLUDED.instrument_id,
                side = EXCLUDED.side,
                quantity = EXCLUDED.quantity,
                order_type = EXCLUDED.order_type,
                limit_price = EXCLUDED.limit_price,
                curve_spread_bp = EXCLUDED.curve_spread_bp,
                time_in_force = EXCLUDED.time_in_force,
                state = EXCLUDED.state,
                batch_id = EXCLUDED.batch_id,
                updated_at = EXCLUDED.updated_at,
                last_state_change_at = EXCLUDED.last_state_change_at
            "#,
        )
        .bind(order.order_id)
        .bind(&order.account_id)
        .bind(&order.instrument_id)
        .bind(order.side.to_string())
        .bind(order.quantity)
        .bind(order.order_type.to_string())
        .bind(order.limit_price)
        .bind(order.curve_spread_bp)
        .bind(order.time_in_force.to_string())
        .bind(order.state.to_string())
        .bind(order.batch_id)
        .bind(
            order
                .compliance_result
                .as_ref()
                .map(to_json)
                .transpose()?,
        )
        .bind(order.created_at)
        .bind(&order.created_by)
        .bind(order.updated_at)
        .bind(order.last_state_change_at)
        .bind(order.sent_to_ems_at)
        .bind(order.fully_filled_at)
        .bind(order.settled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StorageError> {
        let row = sqlx::query("SELECT * FROM orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn amend_order(
        &self,
        order_id: Uuid,
        amendment: &OrderAmendedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE orders SET
                quantity = COALESCE($2, quantity),
                order_type = COALESCE($3, order_type),
                limit_price = COALESCE($4, limit_price),
                curve_spread_bp = COALESCE($5, curve_spread_bp),
                updated_at = $6
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(amendment.quantity)
        .bind(amendment.order_type.map(|t| t.to_string()))
        .bind(amendment.limit_price)
        .bind(amendment.curve_spread_bp)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_order_state(
        &self,
        order_id: Uuid,
        state: OrderState,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE orders SET state = $2, last_state_change_at = $3, updated_at = $3 \
             WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(state.to_string())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_order_sent_to_ems(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE orders SET state = 'SENT', sent_to_ems_at = $2, \
             last_state_change_at = $2, updated_at = $2 WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_order_fully_filled(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE orders SET state = 'FILLED', fully_filled_at = $2, \
             last_state_change_at = $2, updated_at = $2 WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_order_settled(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE orders SET state = 'SETTLED', settled_at = $2, \
             last_state_change_at = $2, updated_at = $2 WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_order_compliance_result(
        &self,
        order_id: Uuid,
        result: &ComplianceResult,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE orders SET compliance_result = $2, updated_at = $3 WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(to_json(result)?)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- executions and fills ---------------------------------------

    async fn upsert_execution(&self, execution: Execution) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO executions (
                execution_id, order_id, account_id, instrument_id, side,
                total_quantity, filled_quantity, avg_fill_price, status, as_of_date,
                slippage_total, slippage_breakdown, deterministic_inputs,
                execution_start_time, execution_end_time, settlement_date,
                settled_at, explanation, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (execution_id) DO UPDATE SET
                filled_quantity = EXCLUDED.filled_quantity,
                avg_fill_price = EXCLUDED.avg_fill_price,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(execution.execution_id)
        .bind(execution.order_id)
        .bind(&execution.account_id)
        .bind(&execution.instrument_id)
        .bind(execution.side.to_string())
        .bind(execution.total_quantity)
        .bind(execution.filled_quantity)
        .bind(execution.avg_fill_price)
        .bind(execution.status.to_string())
        .bind(execution.as_of_date)
        .bind(execution.slippage_total)
        .bind(
            execution
                .slippage_breakdown
                .as_ref()
                .map(to_json)
                .transpose()?,
        )
        .bind(
            execution
                .deterministic_inputs
                .as_ref()
                .map(to_json)
                .transpose()?,
        )
        .bind(execution.execution_start_time)
        .bind(execution.execution_end_time)
        .bind(execution.settlement_date)
        .bind(execution.settled_at)
        .bind(&execution.explanation)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<Execution>, StorageError> {
        let row = sqlx::query("SELECT * FROM executions WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_execution).transpose()
    }

    async fn apply_execution_simulated(
        &self,
        payload: &ExecutionSimulatedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE executions SET
                filled_quantity = $2,
                avg_fill_price = $3,
                slippage_total = $4,
                slippage_breakdown = $5,
                deterministic_inputs = $6,
                status = $7,
                execution_start_time = $8,
                execution_end_time = $9,
                explanation = COALESCE($10, explanation),
                updated_at = $11
            WHERE execution_id = $1
            "#,
        )
        .bind(payload.execution_id)
        .bind(payload.filled_quantity)
        .bind(payload.avg_fill_price)
        .bind(payload.slippage_total)
        .bind(to_json(&payload.slippage_breakdown)?)
        .bind(to_json(&payload.deterministic_inputs)?)
        .bind(payload.status.to_string())
        .bind(payload.execution_start_time)
        .bind(payload.execution_end_time)
        .bind(&payload.explanation)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_execution_partially_filled(
        &self,
        execution_id: Uuid,
        filled_quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE executions SET status = 'PARTIALLY_FILLED', filled_quantity = $2, \
             updated_at = $3 WHERE execution_id = $1",
        )
        .bind(execution_id)
        .bind(filled_quantity)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_execution_filled(
        &self,
        execution_id: Uuid,
        filled_quantity: Decimal,
        avg_fill_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE executions SET status = 'FILLED', filled_quantity = $2, \
             avg_fill_price = $3, updated_at = $4 WHERE execution_id = $1",
        )
        .bind(execution_id)
        .bind(filled_quantity)
        .bind(avg_fill_price)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_execution_settled(
        &self,
        execution_id: Uuid,
        settlement_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE executions SET status = 'SETTLED', settlement_date = $2, \
             settled_at = $3, updated_at = $3 WHERE execution_id = $1",
        )
        .bind(execution_id)
        .bind(settlement_date)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_fill(&self, fill: Fill) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO fills (
                fill_id, execution_id, clip_index, quantity, price,
                fill_timestamp, slippage_bps, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (fill_id) DO NOTHING
            "#,
        )
        .bind(fill.fill_id)
        .bind(fill.execution_id)
        .bind(fill.clip_index)
        .bind(fill.quantity)
        .bind(fill.price)
        .bind(fill.timestamp)
        .bind(fill.slippage_bps)
        .bind(fill.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fills_by_execution(&self, execution_id: Uuid) -> Result<Vec<Fill>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM fills WHERE execution_id = $1 ORDER BY clip_index ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_fill).collect()
    }

    // -- positions ---------------------------------------------------

    async fn get_position(
        &self,
        account_id: &str,
        instrument_id: &str,
    ) -> Result<Option<Position>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM positions WHERE account_id = $1 AND instrument_id = $2",
        )
        .bind(account_id)
        .bind(instrument_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_position).transpose()
    }

    async fn upsert_position(&self, position: Position) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                account_id, instrument_id, quantity, avg_cost,
                market_value, duration, dv01, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (account_id, instrument_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                avg_cost = EXCLUDED.avg_cost,
                market_value = EXCLUDED.market_value,
                duration = EXCLUDED.duration,
                dv01 = EXCLUDED.dv01,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&position.account_id)
        .bind(&position.instrument_id)
        .bind(position.quantity)
        .bind(position.avg_cost)
        .bind(position.market_value)
        .bind(position.duration)
        .bind(position.dv01)
        .bind(position.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_position(
        &self,
        account_id: &str,
        instrument_id: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM positions WHERE account_id = $1 AND instrument_id = $2")
            .bind(account_id)
            .bind(instrument_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn positions_by_account(&self, account_id: &str) -> Result<Vec<Position>, StorageError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE account_id = $1")
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_position).collect()
    }

    async fn positions_by_household(
        &self,
        household_id: &str,
    ) -> Result<Vec<Position>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE account_id IN \
             (SELECT account_id FROM accounts WHERE household_id = $1)",
        )
        .bind(household_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_position).collect()
    }

    // -- reference data ---------------------------------------------

    async fn get_instrument(&self, cusip: &str) -> Result<Option<Instrument>, StorageError> {
        let row = sqlx::query("SELECT * FROM instruments WHERE cusip = $1")
            .bind(cusip)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_instrument).transpose()
    }

    async fn upsert_instrument(&self, instrument: Instrument) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO instruments (
                cusip, name, maturity_date, ask_price,
                ask_modified_duration, coupon, coupon_frequency
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (cusip) DO UPDATE SET
                name = EXCLUDED.name,
                maturity_date = EXCLUDED.maturity_date,
                ask_price = EXCLUDED.ask_price,
                ask_modified_duration = EXCLUDED.ask_modified_duration,
                coupon = EXCLUDED.coupon,
                coupon_frequency = EXCLUDED.coupon_frequency
            "#,
        )
        .bind(&instrument.cusip)
        .bind(&instrument.name)
        .bind(instrument.maturity_date)
        .bind(instrument.ask_price)
        .bind(instrument.ask_modified_duration)
        .bind(instrument.coupon)
        .bind(instrument.coupon_frequency)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(Account {
                account_id: r.try_get("account_id").map_err(ge)?,
                household_id: r.try_get("household_id").map_err(ge)?,
                name: r.try_get("name").map_err(ge)?,
            })
        })
        .transpose()
    }

    async fn upsert_account(&self, account: Account) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, household_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id) DO UPDATE SET
                household_id = EXCLUDED.household_id,
                name = EXCLUDED.name
            "#,
        )
        .bind(&account.account_id)
        .bind(&account.household_id)
        .bind(&account.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_household(&self, household: Household) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO households (household_id, name)
            VALUES ($1, $2)
            ON CONFLICT (household_id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(&household.household_id)
        .bind(&household.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- compliance --------------------------------------------------

    async fn upsert_rule(&self, rule: ComplianceRule) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO compliance_rules (
                rule_id, rule_set_id, rule_key, name, description, version,
                severity, scope, scope_id, predicate, explanation_template,
                evaluation_points, status, effective_from, effective_to,
                evaluation_count, violation_count, last_evaluated_at,
                last_violated_at, created_at, created_by, updated_at, updated_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21, $22, $23)
            ON CONFLICT (rule_id) DO UPDATE SET
                rule_set_id = EXCLUDED.rule_set_id,
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                version = EXCLUDED.version,
                severity = EXCLUDED.severity,
                scope = EXCLUDED.scope,
                scope_id = EXCLUDED.scope_id,
                predicate = EXCLUDED.predicate,
                explanation_template = EXCLUDED.explanation_template,
                evaluation_points = EXCLUDED.evaluation_points,
                status = EXCLUDED.status,
                effective_from = EXCLUDED.effective_from,
                effective_to = EXCLUDED.effective_to,
                updated_at = EXCLUDED.updated_at,
                updated_by = EXCLUDED.updated_by
            "#,
        )
        .bind(rule.rule_id)
        .bind(rule.rule_set_id)
        .bind(&rule.rule_key)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.version)
        .bind(rule.severity.to_string())
        .bind(rule.scope.to_string())
        .bind(&rule.scope_id)
        .bind(to_json(&rule.predicate)?)
        .bind(&rule.explanation_template)
        .bind(to_json(&rule.evaluation_points)?)
        .bind(rule.status.to_string())
        .bind(rule.effective_from)
        .bind(rule.effective_to)
        .bind(rule.evaluation_count)
        .bind(rule.violation_count)
        .bind(rule.last_evaluated_at)
        .bind(rule.last_violated_at)
        .bind(rule.created_at)
        .bind(&rule.created_by)
        .bind(rule.updated_at)
        .bind(&rule.updated_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<ComplianceRule>, StorageError> {
        let row = sqlx::query("SELECT * FROM compliance_rules WHERE rule_id = $1")
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_rule).transpose()
    }

    async fn rule_key_exists(&self, rule_key: &str) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM compliance_rules WHERE rule_key = $1 LIMIT 1")
            .bind(rule_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn set_rule_status(
        &self,
        rule_id: Uuid,
        status: RuleStatus,
        updated_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE compliance_rules SET status = $2, updated_by = $3, updated_at = $4 \
             WHERE rule_id = $1",
        )
        .bind(rule_id)
        .bind(status.to_string())
        .bind(updated_by)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM compliance_rules WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_rules_for(
        &self,
        account_id: &str,
        household_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ComplianceRule>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM compliance_rules
            WHERE status = 'ACTIVE'
              AND effective_from <= $1
              AND (effective_to IS NULL OR effective_to > $1)
              AND (
                scope = 'GLOBAL'
                OR (scope = 'HOUSEHOLD' AND scope_id = $2)
                OR (scope = 'ACCOUNT' AND scope_id = $3)
              )
            "#,
        )
        .bind(at)
        .bind(household_id.unwrap_or(""))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn record_rule_evaluation(
        &self,
        evaluation: ComplianceEvaluation,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO compliance_evaluations (
                evaluation_id, rule_id, rule_version, order_id, account_id,
                evaluation_point, result, metric_value, threshold,
                metric_snapshot, explanation, evaluated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (evaluation_id) DO NOTHING
            "#,
        )
        .bind(evaluation.evaluation_id)
        .bind(evaluation.rule_id)
        .bind(evaluation.rule_version)
        .bind(evaluation.order_id)
        .bind(&evaluation.account_id)
        .bind(evaluation.evaluation_point.to_string())
        .bind(evaluation.result.to_string())
        .bind(&evaluation.metric_value)
        .bind(&evaluation.threshold)
        .bind(&evaluation.metric_snapshot)
        .bind(&evaluation.explanation)
        .bind(evaluation.evaluated_at)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE compliance_rules SET evaluation_count = evaluation_count + 1, \
             last_evaluated_at = $2 WHERE rule_id = $1",
        )
        .bind(evaluation.rule_id)
        .bind(evaluation.evaluated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_rule_violation(
        &self,
        violation: ComplianceViolation,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO compliance_violations (
                violation_id, rule_id, rule_name, rule_version, severity, scope,
                scope_id, order_id, account_id, evaluation_point, metric_value,
                threshold, status, explanation, metric_snapshot, evaluated_at,
                resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (violation_id) DO NOTHING
            "#,
        )
        .bind(violation.violation_id)
        .bind(violation.rule_id)
        .bind(&violation.rule_name)
        .bind(violation.rule_version)
        .bind(violation.severity.to_string())
        .bind(violation.scope.to_string())
        .bind(&violation.scope_id)
        .bind(violation.order_id)
        .bind(&violation.account_id)
        .bind(violation.evaluation_point.to_string())
        .bind(&violation.metric_value)
        .bind(&violation.threshold)
        .bind(&violation.status)
        .bind(&violation.explanation)
        .bind(&violation.metric_snapshot)
        .bind(violation.evaluated_at)
        .bind(violation.resolved_at)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE compliance_rules SET violation_count = violation_count + 1, \
             last_violated_at = $2 WHERE rule_id = $1",
        )
        .bind(violation.rule_id)
        .bind(violation.evaluated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn evaluations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<ComplianceEvaluation>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM compliance_evaluations WHERE order_id = $1 ORDER BY evaluated_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_evaluation).collect()
    }

    async fn violations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<ComplianceViolation>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM compliance_violations WHERE order_id = $1 ORDER BY evaluated_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_violation).collect()
    }

    async fn upsert_rule_set(&self, rule_set: ComplianceRuleSet) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO compliance_rule_sets (
                rule_set_id, name, description, version, status,
                effective_from, effective_to, created_at, created_by,
                updated_at, updated_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (rule_set_id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                effective_from = EXCLUDED.effective_from,
                effective_to = EXCLUDED.effective_to,
                updated_at = EXCLUDED.updated_at,
                updated_by = EXCLUDED.updated_by
            "#,
        )
        .bind(rule_set.rule_set_id)
        .bind(&rule_set.name)
        .bind(&rule_set.description)
        .bind(rule_set.version)
        .bind(&rule_set.status)
        .bind(rule_set.effective_from)
        .bind(rule_set.effective_to)
        .bind(rule_set.created_at)
        .bind(&rule_set.created_by)
        .bind(rule_set.updated_at)
        .bind(&rule_set.updated_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- portfolio ---------------------------------------------------

    async fn upsert_target(&self, target: PortfolioTarget) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_targets (
                target_id, scope, scope_id, model_id, duration_target,
                bucket_weights, constraints, effective_from, effective_to,
                created_at, created_by, account_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (target_id) DO UPDATE SET
                scope = EXCLUDED.scope,
                scope_id = EXCLUDED.scope_id,
                model_id = EXCLUDED.model_id,
                duration_target = EXCLUDED.duration_target,
                bucket_weights = EXCLUDED.bucket_weights,
                constraints = EXCLUDED.constraints,
                effective_from = EXCLUDED.effective_from,
                effective_to = EXCLUDED.effective_to,
                account_id = EXCLUDED.account_id
            "#,
        )
        .bind(target.target_id)
        .bind(target.scope.to_string())
        .bind(&target.scope_id)
        .bind(&target.model_id)
        .bind(target.duration_target)
        .bind(to_json(&target.bucket_weights)?)
        .bind(target.constraints.as_ref().map(to_json).transpose()?)
        .bind(target.effective_from)
        .bind(target.effective_to)
        .bind(target.created_at)
        .bind(&target.created_by)
        .bind(&target.account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_target(&self, target_id: Uuid) -> Result<Option<PortfolioTarget>, StorageError> {
        let row = sqlx::query("SELECT * FROM portfolio_targets WHERE target_id = $1")
            .bind(target_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_target).transpose()
    }

    async fn upsert_proposal(&self, proposal: Proposal) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO proposals (
                proposal_id, account_id, household_id, as_of_date, target_id,
                trades, current_analytics, predicted_analytics, assumptions,
                status, created_at, created_by, approved_at, approved_by,
                sent_to_oms_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (proposal_id) DO UPDATE SET
                status = EXCLUDED.status,
                approved_at = EXCLUDED.approved_at,
                approved_by = EXCLUDED.approved_by,
                sent_to_oms_at = EXCLUDED.sent_to_oms_at
            "#,
        )
        .bind(proposal.proposal_id)
        .bind(&proposal.account_id)
        .bind(&proposal.household_id)
        .bind(proposal.as_of_date)
        .bind(proposal.target_id)
        .bind(to_json(&proposal.trades)?)
        .bind(to_json(&proposal.current_analytics)?)
        .bind(to_json(&proposal.predicted_analytics)?)
        .bind(&proposal.assumptions)
        .bind(proposal.status.to_string())
        .bind(proposal.created_at)
        .bind(&proposal.created_by)
        .bind(proposal.approved_at)
        .bind(&proposal.approved_by)
        .bind(proposal.sent_to_oms_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_proposal(&self, proposal_id: Uuid) -> Result<Option<Proposal>, StorageError> {
        let row = sqlx::query("SELECT * FROM proposals WHERE proposal_id = $1")
            .bind(proposal_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_proposal).transpose()
    }

    async fn set_proposal_approved(
        &self,
        proposal_id: Uuid,
        approved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE proposals SET status = 'APPROVED', approved_by = $2, approved_at = $3 \
             WHERE proposal_id = $1",
        )
        .bind(proposal_id)
        .bind(approved_by)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_proposal_sent_to_oms(
        &self,
        proposal_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE proposals SET status = 'SENT_TO_OMS', sent_to_oms_at = $2 \
             WHERE proposal_id = $1",
        )
        .bind(proposal_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
