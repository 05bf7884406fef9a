//! Command request types accepted by the order management engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{OrderSide, OrderType, TimeInForce};

/// Request to create a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
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
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub created_by: String,
}

/// Request to amend an existing order; only present fields change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmendOrderRequest {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_spread_bp: Option<Decimal>,
    pub updated_by: String,
}

/// Request to approve an order pending approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveOrderRequest {
    pub order_id: Uuid,
    pub approved_by: String,
}

/// Request to cancel an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub order_id: Uuid,
    pub cancelled_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request to dispatch an approved order to the execution simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToEmsRequest {
    pub order_id: Uuid,
    pub sent_by: String,
}

/// Batch order creation; each line is an independent create.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreateRequest {
    pub orders: Vec<CreateOrderRequest>,
}

/// Per-line outcome of a bulk create.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreateLineResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a bulk create: the allocated batch id plus per-line outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreateResult {
    pub batch_id: Uuid,
    pub results: Vec<BulkCreateLineResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_request_roundtrip() {
        let json = r#"{
            "accountId": "ACC-1",
            "instrumentId": "912828XG55",
            "side": "BUY",
            "quantity": 500000,
            "orderType": "LIMIT",
            "limitPrice": 101,
            "timeInForce": "DAY",
            "createdBy": "trader-1"
        }"#;

        let request: CreateOrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.side, OrderSide::Buy);
        assert_eq!(request.quantity, dec!(500000));
        assert_eq!(request.limit_price, Some(dec!(101)));
        assert!(request.curve_spread_bp.is_none());
    }

    #[test]
    fn test_time_in_force_defaults_to_day() {
        let json = r#"{
            "accountId": "ACC-1",
            "instrumentId": "912828XG55",
            "side": "SELL",
            "quantity": 1000,
            "orderType": "MARKET",
            "createdBy": "trader-1"
        }"#;

        let request: CreateOrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.time_in_force, TimeInForce::Day);
    }

    #[test]
    fn test_amend_request_omits_unchanged_fields() {
        let request = AmendOrderRequest {
            order_id: Uuid::new_v4(),
            quantity: Some(dec!(250000)),
            order_type: None,
            limit_price: None,
            curve_spread_bp: None,
            updated_by: "trader-1".to_string(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("quantity").is_some());
        assert!(value.get("limitPrice").is_none());
        assert!(value.get("orderType").is_none());
    }
}
