//! Reference data read by the engines. Ingest is an external concern;
//! these rows are assumed present in the read store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument master record keyed by CUSIP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub cusip: String,
    pub name: String,
    pub maturity_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_modified_duration: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_frequency: Option<i32>,
}

impl Instrument {
    /// Years between `as_of` and maturity, ACT/365.25.
    pub fn years_to_maturity(&self, as_of: DateTime<Utc>) -> f64 {
        let seconds = (self.maturity_date - as_of).num_seconds() as f64;
        seconds / (24.0 * 3600.0 * 365.25)
    }
}

/// Trading account, optionally grouped into a household.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
    pub name: String,
}

/// Household grouping of accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub household_id: String,
    pub name: String,
}
